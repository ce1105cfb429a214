//! Credentials for the tunnel endpoint and the forward proxy
//!
//! A credential is given on the command line either inline (`user:pass`) or
//! as a reference to a secret file (`@/path/to/file`). Both forms resolve to a
//! [`Credential`], which can then be rendered as an HTTP Basic
//! `Authorization` header value.

pub mod basic;
pub mod credential;

pub use basic::{basic_authorization, decode_basic_authorization};
pub use credential::{Credential, CredentialSpec, SecretError, FILE_REFERENCE_MARKER};
