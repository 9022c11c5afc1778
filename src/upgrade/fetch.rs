//! Bundle download through an external transfer tool.
//!
//! The updater never links an HTTP or TLS stack; it runs `wget` or `curl`
//! (or whatever `fetch_tools` names) and watches the partial file grow.
//! Content lands in `<dest>.tmp` and is renamed to `<dest>` only after the
//! tool exits successfully, so `dest` never exists in a partial state.

use crate::constants::TEMP_SUFFIX;
use crate::core::FetchError;
use crate::utils::fs::with_suffix;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// User-requested cancellation, shared between the input loop and a
/// running stage.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An external program able to download `{url}` into `{output}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTool {
    /// Program name looked up on `PATH`, or an absolute path.
    pub program: String,
    /// Arguments; `{url}` and `{output}` are substituted.
    #[serde(default)]
    pub args: Vec<String>,
}

impl FetchTool {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// `wget`, falling back to `curl`.
    ///
    /// Certificate checks are disabled because the device ships without a
    /// CA bundle and has no reliable clock; integrity comes from the
    /// checksum instead.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("wget", &["--no-check-certificate", "-q", "-O", "{output}", "{url}"]),
            Self::new("curl", &["-k", "-s", "-L", "-o", "{output}", "{url}"]),
        ]
    }

    fn resolve(&self) -> Option<PathBuf> {
        which::which(&self.program).ok()
    }

    fn render_args(&self, url: &str, output: &Path) -> Vec<OsString> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| OsString::from(arg.replace("{url}", url).replace("{output}", &output)))
            .collect()
    }
}

enum Step {
    Exited(io::Result<ExitStatus>),
    Tick,
}

/// Runs fetch tools with progress polling and cooperative cancellation.
#[derive(Debug, Clone)]
pub struct Fetcher {
    tools: Vec<FetchTool>,
    interval: Duration,
}

impl Fetcher {
    #[must_use]
    pub fn new(tools: Vec<FetchTool>, interval: Duration) -> Self {
        Self { tools, interval }
    }

    /// Downloads `url` to `dest`.
    ///
    /// `on_progress(downloaded, total)` is called every poll interval; when
    /// the expected size is unknown `total` equals `downloaded`. Returns the
    /// final size in bytes.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NoTool`] if no configured tool could be started
    /// - [`FetchError::Failed`] if the tool exits non-zero, produces no output
    ///   file or produces an empty one
    /// - [`FetchError::Cancelled`] if `cancel` was raised during the transfer
    ///
    /// On every error path the `.tmp` file is removed and `dest` is absent.
    pub async fn fetch<F>(
        &self,
        url: &str,
        dest: &Path,
        expected_size: Option<u64>,
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> Result<u64, FetchError>
    where
        F: FnMut(u64, u64),
    {
        let tmp = with_suffix(dest, TEMP_SUFFIX);
        discard(&tmp);
        discard(dest);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (tool, mut child) = self.spawn(url, &tmp)?;
        info!("Downloading {} with {}", url, tool);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let status = loop {
            let step = tokio::select! {
                status = child.wait() => Step::Exited(status),
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Exited(status) => break status,
                Step::Tick => {
                    if cancel.is_cancelled() {
                        info!("Download cancelled");
                        if let Err(e) = child.kill().await {
                            warn!("Failed to stop {}: {}", tool, e);
                        }
                        discard(&tmp);
                        return Err(FetchError::Cancelled);
                    }
                    let downloaded = file_len(&tmp);
                    on_progress(downloaded, expected_size.unwrap_or(downloaded));
                }
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                discard(&tmp);
                return Err(e.into());
            }
        };

        if !status.success() {
            discard(&tmp);
            return Err(FetchError::exited(&tool, status));
        }

        let size = match tokio::fs::metadata(&tmp).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(FetchError::Failed {
                    tool,
                    reason: "produced no output file".to_string(),
                });
            }
        };
        if size == 0 {
            discard(&tmp);
            return Err(FetchError::Failed {
                tool,
                reason: "produced an empty file".to_string(),
            });
        }
        on_progress(size, size);

        if let Err(e) = tokio::fs::rename(&tmp, dest).await {
            discard(&tmp);
            return Err(e.into());
        }

        debug!("Downloaded {} bytes to {}", size, dest.display());
        Ok(size)
    }

    fn spawn(&self, url: &str, tmp: &Path) -> Result<(String, Child), FetchError> {
        for tool in &self.tools {
            let Some(program) = tool.resolve() else {
                debug!("Fetch tool {} not found on PATH", tool.program);
                continue;
            };

            let spawned = Command::new(&program)
                .args(tool.render_args(url, tmp))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            match spawned {
                Ok(child) => return Ok((tool.program.clone(), child)),
                Err(e) => warn!("Failed to start {}: {}", program.display(), e),
            }
        }
        Err(FetchError::NoTool)
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
