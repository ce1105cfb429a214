//! Connection establishment
//!
//! TCP (directly or through a forward proxy), then TLS for `wss`, then the
//! WebSocket upgrade. Failures are classified as HTTP rejections (the
//! endpoint answered the upgrade with a plain HTTP response) or transport
//! rejections (no HTTP response at all).

use rustls::pki_types::ServerName;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::Response;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, info};
use url::Host;
use wspipe_transport::DialError;

use crate::config::DialConfig;
use crate::connection::WebSocketConnection;
use crate::proxy::{authority, connect_through_proxy, tcp_connect};

/// Dial the tunnel endpoint described by `config`.
///
/// No timeout of its own; TCP, TLS and the proxy impose theirs.
pub async fn establish(config: &DialConfig) -> Result<WebSocketConnection, DialError> {
    let url = config.target();
    let reject = |reason: String| DialError::TransportRejection {
        url: url.to_string(),
        reason,
    };

    let host = url
        .host()
        .ok_or_else(|| reject("URL has no host".to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| reject("URL has no port".to_string()))?;

    info!("Connecting to {}", url);

    let tcp_stream = match config.forward_proxy() {
        Some(proxy) => connect_through_proxy(proxy, &authority(&host, port))
            .await
            .map_err(reject)?,
        None => tcp_connect(&host, port)
            .await
            .map_err(|e| reject(format!("TCP connect failed: {}", e)))?,
    };
    if let Err(e) = tcp_stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {}", e);
    }

    let stream = if config.is_secure() {
        let server_name = server_name(&host).map_err(reject)?;
        let tls_stream = config
            .tls()
            .connector()
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| reject(format!("TLS handshake failed: {}", e)))?;
        debug!("TLS handshake complete with {}", host);
        MaybeTlsStream::Rustls(tls_stream)
    } else {
        MaybeTlsStream::Plain(tcp_stream)
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| reject(format!("Invalid request: {}", e)))?;
    for (name, value) in config.headers() {
        request.headers_mut().append(name.clone(), value.clone());
    }

    match tokio_tungstenite::client_async_with_config(request, stream, None).await {
        Ok((ws_stream, response)) => {
            debug!("Upgrade accepted: {}", response.status());
            let connection = WebSocketConnection::new(ws_stream);
            info!("WebSocket connection established to {}", url);
            Ok(connection)
        }
        Err(WsError::Http(response)) => Err(http_rejection(config, response)),
        Err(e) => Err(reject(format!("WebSocket handshake failed: {}", e))),
    }
}

fn server_name(host: &Host<&str>) -> Result<ServerName<'static>, String> {
    match host {
        Host::Domain(domain) => ServerName::try_from(domain.to_string())
            .map_err(|e| format!("Invalid server name {:?}: {}", domain, e)),
        Host::Ipv4(ip) => Ok(ServerName::IpAddress(std::net::IpAddr::V4(*ip).into())),
        Host::Ipv6(ip) => Ok(ServerName::IpAddress(std::net::IpAddr::V6(*ip).into())),
    }
}

fn http_rejection(config: &DialConfig, response: Response<Option<Vec<u8>>>) -> DialError {
    let status = response.status();
    let body = config.captures_rejection_body().then(|| {
        response
            .body()
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    });

    DialError::HttpRejection {
        url: config.target().to_string(),
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        body,
    }
}
