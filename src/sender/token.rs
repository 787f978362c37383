use parking_lot::RwLock;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Failed to read token file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Token file {path} is not valid: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Supplier of the bearer token used against the cloud OMF endpoint. The
/// token rotates outside this process, so delivery refreshes it before
/// every transmission.
#[cfg_attr(test, mockall::automock)]
pub trait TokenSource: Send + Sync {
    /// Re-read the backing store. On failure the previous token stays in
    /// effect.
    fn refresh(&self) -> Result<(), TokenError>;

    /// The current token value.
    fn bearer(&self) -> String;
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
}

/// Token source backed by a JSON file maintained by an external login
/// agent, holding an `access_token` field.
#[derive(Debug)]
pub struct FileTokenSource {
    path: PathBuf,
    token: RwLock<String>,
}

impl FileTokenSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            token: RwLock::new(String::new()),
        }
    }
}

impl TokenSource for FileTokenSource {
    fn refresh(&self) -> Result<(), TokenError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| TokenError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        let parsed: TokenFile =
            serde_json::from_str(&raw).map_err(|source| TokenError::Parse {
                path: self.path.display().to_string(),
                source,
            })?;
        *self.token.write() = parsed.access_token;
        Ok(())
    }

    fn bearer(&self) -> String {
        self.token.read().clone()
    }
}
