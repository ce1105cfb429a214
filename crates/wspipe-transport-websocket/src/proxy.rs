//! HTTP CONNECT through a forward proxy
//!
//! ```text
//! CONNECT tunnel.example.com:443 HTTP/1.1
//! Host: tunnel.example.com:443
//! Proxy-Authorization: Basic <base64(user:pass)>
//! ```
//!
//! Any 2xx answer means the proxy has opened a raw TCP tunnel to the target;
//! TLS and the WebSocket upgrade then run on top of it.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::Host;

use crate::config::ForwardProxy;

/// Upper bound on the size of the proxy's response head
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

const MAX_RESPONSE_HEADERS: usize = 64;

/// Open a TCP connection to `host` (with the given port), directly
pub(crate) async fn tcp_connect(host: &Host<&str>, port: u16) -> std::io::Result<TcpStream> {
    match host {
        Host::Domain(domain) => TcpStream::connect((*domain, port)).await,
        Host::Ipv4(ip) => TcpStream::connect((*ip, port)).await,
        Host::Ipv6(ip) => TcpStream::connect((*ip, port)).await,
    }
}

/// Format `host:port` the way a request target needs it (brackets for IPv6)
pub(crate) fn authority(host: &Host<&str>, port: u16) -> String {
    match host {
        Host::Ipv6(ip) => format!("[{}]:{}", ip, port),
        other => format!("{}:{}", other, port),
    }
}

/// Ask the proxy for a tunnel to `target_authority`.
///
/// Errors are returned as human-readable reasons; the caller classifies
/// them as transport rejections.
pub(crate) async fn connect_through_proxy(
    proxy: &ForwardProxy,
    target_authority: &str,
) -> Result<TcpStream, String> {
    let proxy_url = proxy.url();
    let proxy_host = proxy_url
        .host()
        .ok_or_else(|| "proxy URL has no host".to_string())?;
    let proxy_port = proxy_url.port_or_known_default().unwrap_or(80);

    debug!(
        "Connecting to forward proxy {} for {}",
        proxy.display_addr(),
        target_authority
    );

    let mut stream = tcp_connect(&proxy_host, proxy_port)
        .await
        .map_err(|e| format!("proxy {}: {}", proxy.display_addr(), e))?;

    let request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nProxy-Authorization: {auth}\r\n\r\n",
        target = target_authority,
        auth = proxy.authorization()
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| format!("Failed to send CONNECT request: {}", e))?;

    let head = read_response_head(&mut stream).await?;
    let (code, reason) = parse_response_head(&head)?;

    if !(200..300).contains(&code) {
        return Err(format!(
            "proxy {} refused CONNECT: {} {}",
            proxy.display_addr(),
            code,
            reason
        ));
    }

    debug!("Forward proxy tunnel established ({} {})", code, reason);
    Ok(stream)
}

/// Read up to and including the blank line ending the response head.
///
/// Reads one byte at a time so nothing past the head is consumed; the bytes
/// after it belong to the tunnelled connection.
async fn read_response_head(stream: &mut TcpStream) -> Result<Vec<u8>, String> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err("proxy response head too large".to_string());
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| format!("Failed to read CONNECT response: {}", e))?;
        if n == 0 {
            return Err("proxy closed the connection during CONNECT".to_string());
        }
        head.push(byte[0]);
    }

    Ok(head)
}

fn parse_response_head(head: &[u8]) -> Result<(u16, String), String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err("incomplete CONNECT response".to_string());
        }
        Err(e) => return Err(format!("malformed CONNECT response: {}", e)),
    }

    let code = response
        .code
        .ok_or_else(|| "CONNECT response without status".to_string())?;
    let reason = response.reason.unwrap_or_default().to_string();
    Ok((code, reason))
}
