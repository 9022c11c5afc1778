use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// The one-way transfer of control to the relaunch entry point.
///
/// Building a `Handoff` does nothing; [`exec`](Self::exec) replaces the
/// process image, so every cleanup must already have happened. On Unix it
/// only returns if the replacement itself failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "the update is not finished until control is handed off"]
pub struct Handoff {
    shell: PathBuf,
    launcher: PathBuf,
    working_dir: PathBuf,
}

impl Handoff {
    pub fn new(shell: impl Into<PathBuf>, launcher: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            launcher: launcher.into(),
            working_dir: working_dir.into(),
        }
    }

    #[must_use]
    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.launcher).current_dir(&self.working_dir);
        cmd
    }

    /// Replaces the current process with `<shell> <launcher>`, inheriting
    /// the environment. Returns the error if the exec failed.
    #[cfg(unix)]
    pub fn exec(self) -> io::Error {
        use std::os::unix::process::CommandExt;

        info!("Handing off to {} {}", self.shell.display(), self.launcher.display());
        self.command().exec()
    }

    /// Starts the launcher and exits with its status.
    #[cfg(not(unix))]
    pub fn exec(self) -> io::Error {
        info!("Handing off to {} {}", self.shell.display(), self.launcher.display());
        match self.command().status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(0)),
            Err(e) => e,
        }
    }
}
