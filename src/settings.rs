//! Validated startup settings
//!
//! Flags are parsed once by clap, then turned into an immutable [`Settings`]
//! that the rest of startup reads from.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use wspipe_auth::CredentialSpec;
use wspipe_transport::ConfigError;
use wspipe_transport_websocket::DialConfig;

use crate::Cli;

/// Parse a duration literal such as `10s`, `500ms`, `2m` or `1h`.
///
/// A bare integer is taken as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);

    if digits.is_empty() {
        return Err(format!("invalid duration {:?}: missing number", raw));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration {:?}: {}", raw, e))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
        other => Err(format!(
            "invalid duration {:?}: unknown unit {:?} (use ms, s, m or h)",
            raw, other
        )),
    }
}

/// Everything the client needs to start, validated
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: String,
    pub write_timeout: Duration,
    pub auth: Option<CredentialSpec>,
    /// Forward proxy URL and its credential; set only when both were given
    pub forward_proxy: Option<(String, CredentialSpec)>,
    pub client_certificate: Option<(PathBuf, PathBuf)>,
    pub verbose: bool,
    pub insecure_conn: bool,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let client_certificate = match (cli.cert, cli.key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::CertificateLoad(
                    "--cert was given without --key".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::CertificateLoad(
                    "--key was given without --cert".to_string(),
                ))
            }
        };

        let forward_proxy = match (cli.fproxy, cli.fpauth) {
            (Some(url), Some(auth)) => Some((url, CredentialSpec::parse(&auth))),
            (None, None) => None,
            (Some(_), None) => {
                warn!("--fproxy given without --fpauth; not using a forward proxy");
                None
            }
            (None, Some(_)) => {
                warn!("--fpauth given without --fproxy; ignoring it");
                None
            }
        };

        Ok(Self {
            target: cli.target_url,
            write_timeout: cli.write_timeout,
            auth: cli.auth.as_deref().map(CredentialSpec::parse),
            forward_proxy,
            client_certificate,
            verbose: cli.verbose,
            insecure_conn: cli.insecure_conn,
        })
    }

    /// Resolve credentials and assemble the dial configuration.
    ///
    /// Secret files are read here, before any network activity.
    pub fn dial_config(&self) -> Result<DialConfig> {
        let mut builder = DialConfig::builder(&self.target)
            .insecure_skip_verify(self.insecure_conn)
            .capture_rejection_body(self.verbose);

        if let Some(spec) = &self.auth {
            let credential = spec
                .resolve()
                .context("Failed to load the tunnel credential (--auth)")?;
            builder = builder.basic_auth(credential);
        }

        if let Some((url, spec)) = &self.forward_proxy {
            let credential = spec
                .resolve()
                .context("Failed to load the forward proxy credential (--fpauth)")?;
            debug!("Routing through forward proxy {}", url);
            builder = builder.forward_proxy(url, credential);
        }

        if let Some((cert, key)) = &self.client_certificate {
            builder = builder.client_certificate(cert, key);
        }

        let config = builder.build().context("Invalid connection settings")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use wspipe_auth::SecretError;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["wspipe"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn secret_file(contents: &str, mode: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(mode)).unwrap();
        file
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert_eq!(parse_duration("0s"), Ok(Duration::ZERO));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_cli(cli(&["wss://tunnel.example.com/proxy/db/22"])).unwrap();
        assert_eq!(settings.target, "wss://tunnel.example.com/proxy/db/22");
        assert_eq!(settings.write_timeout, Duration::from_secs(10));
        assert!(settings.auth.is_none());
        assert!(settings.forward_proxy.is_none());
        assert!(settings.client_certificate.is_none());
        assert!(!settings.verbose);
        assert!(!settings.insecure_conn);
    }

    #[test]
    fn test_flag_spellings() {
        let settings = Settings::from_cli(cli(&[
            "--write_timeout",
            "3s",
            "--insecure_conn",
            "--verbose",
            "--auth",
            "alice:secret",
            "ws://127.0.0.1:8086/proxy/localhost/22",
        ]))
        .unwrap();
        assert_eq!(settings.write_timeout, Duration::from_secs(3));
        assert!(settings.insecure_conn);
        assert!(settings.verbose);
        assert_eq!(
            settings.auth,
            Some(CredentialSpec::Inline("alice:secret".to_string()))
        );

        let settings = Settings::from_cli(cli(&[
            "--write-timeout",
            "500ms",
            "--insecure-conn",
            "ws://127.0.0.1:8086/",
        ]))
        .unwrap();
        assert_eq!(settings.write_timeout, Duration::from_millis(500));
        assert!(settings.insecure_conn);
    }

    #[test]
    fn test_invalid_write_timeout_rejected_by_parser() {
        let argv = ["wspipe", "--write_timeout", "soon", "ws://127.0.0.1/"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_cert_requires_key() {
        let err = Settings::from_cli(cli(&["--cert", "client.pem", "ws://127.0.0.1/"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::CertificateLoad(_)));

        let err =
            Settings::from_cli(cli(&["--key", "client.key", "ws://127.0.0.1/"])).unwrap_err();
        assert!(matches!(err, ConfigError::CertificateLoad(_)));
    }

    #[test]
    fn test_proxy_needs_both_url_and_credential() {
        let settings = Settings::from_cli(cli(&[
            "--fproxy",
            "http://proxy.example.com:3128",
            "ws://127.0.0.1/",
        ]))
        .unwrap();
        assert!(settings.forward_proxy.is_none());

        let settings = Settings::from_cli(cli(&[
            "--fproxy",
            "http://proxy.example.com:3128",
            "--fpauth",
            "@/etc/wspipe/proxy",
            "ws://127.0.0.1/",
        ]))
        .unwrap();
        let (url, spec) = settings.forward_proxy.unwrap();
        assert_eq!(url, "http://proxy.example.com:3128");
        assert_eq!(spec, CredentialSpec::File(PathBuf::from("/etc/wspipe/proxy")));
    }

    #[test]
    fn test_dial_config_from_settings() {
        let secret = secret_file("  bob:hunter2\n", 0o600);
        let auth = format!("@{}", secret.path().display());

        let settings = Settings::from_cli(cli(&[
            "--auth",
            &auth,
            "--fproxy",
            "http://proxy.example.com:3128",
            "--fpauth",
            "proxyuser:proxypass",
            "--verbose",
            "wss://tunnel.example.com/proxy/db/22",
        ]))
        .unwrap();
        let config = settings.dial_config().unwrap();

        assert!(config.is_secure());
        assert!(config.captures_rejection_body());
        assert!(config.headers().contains_key("authorization"));
        let proxy = config.forward_proxy().unwrap();
        assert_eq!(proxy.url().username(), "proxyuser");
        assert_eq!(proxy.url().password(), Some("proxypass"));
    }

    #[test]
    fn test_insecure_secret_file_is_fatal() {
        let secret = secret_file("bob:hunter2", 0o644);
        let auth = format!("@{}", secret.path().display());

        let settings = Settings::from_cli(cli(&["--auth", &auth, "ws://127.0.0.1/"])).unwrap();
        let err = settings.dial_config().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SecretError>(),
            Some(SecretError::InsecurePermissions { .. })
        ));
    }

    #[test]
    fn test_wrong_scheme_is_fatal() {
        let settings = Settings::from_cli(cli(&["https://tunnel.example.com/"])).unwrap();
        let err = settings.dial_config().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnsupportedScheme { .. })
        ));
    }
}
