//! Access to the git credential.
//!
//! The secret id names where the token lives. The file-backed source treats
//! it as a path: absolute ids are used as-is, relative ids are resolved under
//! the configured secrets directory (so a mounted secret volume laid out as
//! `projects/<p>/secrets/<name>/versions/<v>` works unchanged).

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("failed to access secret version {id}: {source}")]
    Read {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("secret version {id} is empty")]
    Empty { id: String },

    #[error("secret version {id} is not valid UTF-8")]
    InvalidUtf8 { id: String },
}

/// Fetches secret payloads by id.
pub trait SecretSource: Send + Sync {
    fn fetch_secret(&self, id: &str) -> impl Future<Output = Result<Vec<u8>, SecretError>> + Send;
}

/// Decodes a token payload, dropping surrounding whitespace such as the
/// trailing newline most secret files end with.
pub fn decode_secret(id: &str, payload: Vec<u8>) -> Result<String, SecretError> {
    let text = String::from_utf8(payload).map_err(|_| SecretError::InvalidUtf8 {
        id: id.to_string(),
    })?;
    let token = text.trim();
    if token.is_empty() {
        return Err(SecretError::Empty { id: id.to_string() });
    }
    Ok(token.to_string())
}

/// Reads secrets from files.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    dir: PathBuf,
}

impl FileSecretSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSecretSource { dir: dir.into() }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        let id_path = Path::new(id);
        if id_path.is_absolute() {
            id_path.to_path_buf()
        } else {
            self.dir.join(id_path)
        }
    }
}

impl SecretSource for FileSecretSource {
    async fn fetch_secret(&self, id: &str) -> Result<Vec<u8>, SecretError> {
        let path = self.path_for(id);
        let payload = tokio::fs::read(&path).await.map_err(|source| SecretError::Read {
            id: id.to_string(),
            source,
        })?;
        debug!(id, bytes = payload.len(), "accessed secret");
        Ok(payload)
    }
}
