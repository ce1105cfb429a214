//! Credential specifications and their resolution
//!
//! # Format
//!
//! ```text
//! user:pass          inline credential
//! @/path/to/secret   secret file containing `user:pass`
//! ```
//!
//! Secret files are checked before they are read. The mode may grant the
//! owner read/write and nothing else: `0600` and `0400` are accepted, any
//! group/other bit or the owner execute bit is rejected.
//!
//! Passwords containing `:` cannot be expressed; the resolved string must
//! split into exactly two fields.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Prefix marking a credential spec as a reference to a secret file
pub const FILE_REFERENCE_MARKER: char = '@';

/// Permission bits a secret file must not carry (owner execute, all group/other)
#[cfg(unix)]
const FORBIDDEN_MODE_BITS: u32 = 0o177;

/// Errors raised while resolving a credential
#[derive(Error, Debug)]
pub enum SecretError {
    /// The secret file is accessible beyond its owner
    #[error("valid permissions for {path:?} is 0600, was {mode:04o}")]
    InsecurePermissions { path: PathBuf, mode: u32 },

    /// The secret file could not be inspected or read
    #[error("failed to read secret file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The resolved secret is not of the form `user:pass`
    #[error("invalid secrets format: expected <username>:<password>")]
    MalformedFormat,
}

/// A credential as given on the command line
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSpec {
    /// `user:pass` given directly
    Inline(String),
    /// Path of a file holding `user:pass`
    File(PathBuf),
}

impl CredentialSpec {
    /// Interpret a raw flag value, recognizing the `@<path>` form
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(FILE_REFERENCE_MARKER) {
            Some(path) => Self::File(PathBuf::from(path)),
            None => Self::Inline(raw.to_string()),
        }
    }

    /// Resolve to a username/password pair.
    ///
    /// File-backed specs are re-read on every call.
    pub fn resolve(&self) -> Result<Credential, SecretError> {
        match self {
            Self::Inline(secret) => Credential::parse(secret),
            Self::File(path) => {
                let contents = read_secret_file(path)?;
                Credential::parse(contents.trim())
            }
        }
    }
}

impl fmt::Debug for CredentialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(<redacted>)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// A resolved username/password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse `user:pass`. Exactly one `:` and two non-empty fields.
    pub fn parse(secret: &str) -> Result<Self, SecretError> {
        let fields: Vec<&str> = secret.split(':').collect();
        match fields.as_slice() {
            [username, password] if !username.is_empty() && !password.is_empty() => {
                Ok(Self::new(*username, *password))
            }
            _ => Err(SecretError::MalformedFormat),
        }
    }

    /// The `user:pass` form, as carried by HTTP Basic authentication
    pub fn secret_string(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn read_secret_file(path: &Path) -> Result<String, SecretError> {
    let io_err = |source| SecretError::Io {
        path: path.to_path_buf(),
        source,
    };

    let metadata = std::fs::metadata(path).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode() & 0o777;
        if mode & FORBIDDEN_MODE_BITS != 0 {
            return Err(SecretError::InsecurePermissions {
                path: path.to_path_buf(),
                mode,
            });
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    debug!("Reading secret from {:?}", path);
    std::fs::read_to_string(path).map_err(io_err)
}
