//! HTTP Basic Authentication (RFC 7617)
//!
//! ```text
//! Authorization: Basic <base64(username:password)>
//! ```
//!
//! The same encoding is used for `Proxy-Authorization` when negotiating with
//! a forward proxy.

use crate::Credential;
use base64::Engine;

/// Render a credential as a Basic authorization header value
pub fn basic_authorization(credential: &Credential) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(credential.secret_string().as_bytes());
    format!("Basic {}", encoded)
}

/// Decode a Basic authorization header value back into a credential.
///
/// Returns `None` for other schemes, invalid base64, or a payload that is
/// not `user:pass`.
pub fn decode_basic_authorization(header: &str) -> Option<Credential> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    Credential::parse(&decoded).ok()
}
