//! Manifest rendering ("hydration").
//!
//! Each batch clears the output directory of the output repository and then
//! runs the external renderer over the base library, the overlays and the
//! updated inventory. Every renderer path is resolved against the source
//! repository:
//!
//! ```text
//! hydrate -b <src>/<base> -o <src>/<overlays> -y <src>/<output> <src>/<inventory>
//! ```
//!
//! In unified mode both roots are the same checkout.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Marker file kept in the output directory so git tracks it when empty.
pub const KEEP_FILE: &str = ".gitkeep";

/// Default bound on one renderer run.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum HydrateError {
    #[error("unable to clean output directory {path}: {source}")]
    Clean {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start command {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error running command {binary}: {status}\n{stderr}")]
    Failed {
        binary: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("command {binary} timed out after {timeout:?}")]
    TimedOut { binary: PathBuf, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, HydrateError>;

/// Removes everything in `dir` except a top-level [`KEEP_FILE`].
///
/// A missing directory is already clean.
pub fn clear_output_dir(dir: &Path) -> Result<()> {
    let clean_err = |source| HydrateError::Clean {
        path: dir.to_path_buf(),
        source,
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(clean_err(e)),
    };

    let mut removed = 0usize;
    for entry in entries {
        let entry = entry.map_err(clean_err)?;
        if entry.file_name() == KEEP_FILE {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(clean_err)?;
        if file_type.is_dir() {
            std::fs::remove_dir_all(&path).map_err(clean_err)?;
        } else {
            std::fs::remove_file(&path).map_err(clean_err)?;
        }
        removed += 1;
    }

    debug!(dir = %dir.display(), removed, "cleared output directory");
    Ok(())
}

/// Paths for one renderer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderInvocation {
    pub base: PathBuf,
    pub overlay: PathBuf,
    pub output: PathBuf,
    pub inventory: PathBuf,
    /// Directory cleared before rendering. Not passed to the renderer.
    pub clean: PathBuf,
}

impl RenderInvocation {
    /// Resolves the renderer arguments against the source repository and the
    /// directory to clear against the output repository.
    pub fn resolve(
        source_root: &Path,
        output_root: &Path,
        base_dir: &Path,
        overlay_dir: &Path,
        output_dir: &Path,
        inventory_path: &Path,
    ) -> Self {
        RenderInvocation {
            base: source_root.join(base_dir),
            overlay: source_root.join(overlay_dir),
            output: source_root.join(output_dir),
            inventory: source_root.join(inventory_path),
            clean: output_root.join(output_dir),
        }
    }

    pub fn args(&self) -> Vec<OsString> {
        vec![
            "-b".into(),
            self.base.clone().into(),
            "-o".into(),
            self.overlay.clone().into(),
            "-y".into(),
            self.output.clone().into(),
            self.inventory.clone().into(),
        ]
    }
}

/// Runs the renderer.
pub trait Renderer: Send + Sync {
    fn render(&self, invocation: &RenderInvocation) -> impl Future<Output = Result<()>> + Send;
}

/// Clears the output repository's output directory, then renders.
pub async fn hydrate<R: Renderer>(renderer: &R, invocation: &RenderInvocation) -> Result<()> {
    clear_output_dir(&invocation.clean)?;
    renderer.render(invocation).await
}

/// Runs the renderer as a child process.
///
/// Its stdout and stderr are streamed to this process's own as they arrive;
/// stderr is also kept so a failure can report it.
#[derive(Debug, Clone)]
pub struct HydrateCli {
    pub binary: PathBuf,
    pub timeout: Duration,
}

impl HydrateCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        HydrateCli {
            binary: binary.into(),
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }
}

impl Renderer for HydrateCli {
    async fn render(&self, invocation: &RenderInvocation) -> Result<()> {
        let args = invocation.args();
        info!(binary = %self.binary.display(), ?args, "running renderer");

        let mut child = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HydrateError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            let (status, _, stderr) = tokio::join!(
                child.wait(),
                relay(stdout, tokio::io::stdout(), false),
                relay(stderr, tokio::io::stderr(), true),
            );
            (status, stderr)
        };

        let outcome = tokio::time::timeout(self.timeout, run).await;
        let (status, stderr) = match outcome {
            Ok((Ok(status), stderr)) => (status, stderr),
            Ok((Err(source), _)) => {
                return Err(HydrateError::Spawn {
                    binary: self.binary.clone(),
                    source,
                });
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    debug!(binary = %self.binary.display(), error = %e, "unable to kill renderer");
                }
                return Err(HydrateError::TimedOut {
                    binary: self.binary.clone(),
                    timeout: self.timeout,
                });
            }
        };

        if !status.success() {
            return Err(HydrateError::Failed {
                binary: self.binary.clone(),
                status,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Copies `reader` to `writer` until EOF, returning the bytes read when
/// `keep` is set.
///
/// The reader is drained even after `writer` fails, so the child never
/// blocks on a full pipe.
async fn relay<R, W>(reader: Option<R>, mut writer: W, keep: bool) -> Vec<u8>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut kept = Vec::new();
    let Some(mut reader) = reader else {
        return kept;
    };

    let mut forwarding = true;
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "renderer output pipe closed");
                break;
            }
        };
        if keep {
            kept.extend_from_slice(&buf[..n]);
        }
        if forwarding {
            let written = match writer.write_all(&buf[..n]).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                debug!(error = %e, "stopped forwarding renderer output");
                forwarding = false;
            }
        }
    }
    kept
}
