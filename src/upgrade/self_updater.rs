use crate::config::{UpdateLayout, UpdaterConfig};
use crate::constants::{INSTALL_JOURNAL_FILE, TEMP_SUFFIX};
use crate::core::{InstallError, UpdateError};
use crate::ui::{PowerWarning, ProgressDisplay};
use crate::upgrade::backup::{BackupManager, BackupSet};
use crate::upgrade::fetch::{CancelFlag, Fetcher};
use crate::upgrade::handoff::Handoff;
use crate::upgrade::install::{InUseResources, InstallJournal, InstallReport, Installer};
use crate::upgrade::plan::UpdatePlan;
use crate::upgrade::rollback::{RollbackManager, RollbackReport};
use crate::upgrade::status::{StatusReporter, UpdateStatus};
use crate::upgrade::task::{Foreground, ProgressState, StageView, spawn_async, spawn_blocking};
use crate::upgrade::verification::{ChecksumVerifier, Verification};
use crate::utils::fs::{remove_file_if_exists, with_suffix};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DOWNLOADING: &str = "Downloading update...";
pub const CANCEL_HINT: &str = "B Cancel";
pub const VERIFYING: &str = "Verifying checksum...";
pub const INSTALLING: &str = "Installing update...";
pub const RESTORING: &str = "Install failed, restoring backup...";
pub const COMPLETE: &str = "Update complete!";
pub const CANCELLED: &str = "Update cancelled";

/// Sub-phase of [`UpdateState::Installing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Backup,
    Extract,
}

/// States of one update run, in the order they can be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Downloading,
    Verifying,
    Installing(InstallPhase),
    Succeeded,
    RollingBack,
    Done,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Downloading => write!(f, "downloading"),
            Self::Verifying => write!(f, "verifying"),
            Self::Installing(InstallPhase::Backup) => write!(f, "installing (backup)"),
            Self::Installing(InstallPhase::Extract) => write!(f, "installing (extract)"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::RollingBack => write!(f, "rolling back"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Everything a finished run produced. The only thing left to do with it
/// is [`Handoff::exec`].
#[derive(Debug)]
pub struct Completion {
    /// The installed version, or why the run did not install one
    pub outcome: Result<String, UpdateError>,
    /// The record written for the next generation, if any
    pub status: Option<UpdateStatus>,
    /// States entered, in order
    pub trail: Vec<UpdateState>,
    /// Cleanup of an interrupted previous run
    pub recovered: Option<RollbackReport>,
    /// Rollback of this run's failed install
    pub rollback: Option<RollbackReport>,
    pub handoff: Handoff,
}

/// Runs one update attempt from plan to handoff.
///
/// The sequence is strictly linear: prepare, load plan, download, verify,
/// back up, extract, then commit. Every stage after the plan runs as one
/// background task while the display loop stays responsive. A failed
/// extraction is the only thing that triggers rollback; earlier failures
/// have not touched the installation.
///
/// # Examples
///
/// ```rust,no_run
/// use miyoopod_updater::config::UpdaterConfig;
/// use miyoopod_updater::ui::LogDisplay;
/// use miyoopod_updater::upgrade::Updater;
///
/// # async fn example() -> anyhow::Result<()> {
/// let updater = Updater::new(UpdaterConfig::load(None)?, LogDisplay::new())?;
/// let completion = updater.run().await;
/// let err = completion.handoff.exec(); // only returns if exec failed
/// # Err(err.into())
/// # }
/// ```
pub struct Updater<D: ProgressDisplay> {
    pipeline: Pipeline,
    display: D,
    power: PowerWarning,
}

impl<D: ProgressDisplay> Updater<D> {
    pub fn new(config: UpdaterConfig, display: D) -> anyhow::Result<Self> {
        let layout = config.layout()?;
        let in_use = InUseResources::detect(&layout);
        let fetcher = Fetcher::new(config.fetch_tools.clone(), config.progress_interval());

        Ok(Self {
            pipeline: Pipeline {
                config,
                layout,
                fetcher,
                in_use,
                cancel: CancelFlag::new(),
                progress: ProgressState::new(),
                trail: Vec::new(),
                recovered: None,
                rollback: None,
            },
            display,
            power: PowerWarning::new(),
        })
    }

    /// Replaces the detected in-use resources.
    #[must_use]
    pub fn with_in_use(mut self, in_use: InUseResources) -> Self {
        self.pipeline.in_use = in_use;
        self
    }

    /// Shares the power monitor's warning state with the display loop.
    #[must_use]
    pub fn with_power_warning(mut self, power: PowerWarning) -> Self {
        self.power = power;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &UpdateLayout {
        &self.pipeline.layout
    }

    /// The flag cancel keys raise during the download.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.pipeline.cancel.clone()
    }

    pub async fn run(self) -> Completion {
        let Self {
            mut pipeline,
            mut display,
            power,
        } = self;

        let (outcome, status) = {
            let mut fg = Foreground::new(&mut display, pipeline.config.poll_interval(), power);
            let result = pipeline.run(&mut fg).await;
            fg.finish();
            result
        };

        let layout = &pipeline.layout;
        Completion {
            outcome,
            status,
            trail: pipeline.trail,
            recovered: pipeline.recovered,
            rollback: pipeline.rollback,
            handoff: Handoff::new(&layout.shell, &layout.launcher, &layout.install_root),
        }
    }
}

type Outcome = (Result<String, UpdateError>, Option<UpdateStatus>);

struct Pipeline {
    config: UpdaterConfig,
    layout: UpdateLayout,
    fetcher: Fetcher,
    in_use: InUseResources,
    cancel: CancelFlag,
    progress: Arc<ProgressState>,
    trail: Vec<UpdateState>,
    recovered: Option<RollbackReport>,
    rollback: Option<RollbackReport>,
}

impl Pipeline {
    async fn run<D: ProgressDisplay>(&mut self, fg: &mut Foreground<'_, D>) -> Outcome {
        self.enter(UpdateState::Idle);
        self.prepare();

        let plan = match UpdatePlan::load(&self.layout.plan_path) {
            Ok(plan) => plan,
            Err(err) => {
                self.dispose_unusable_plan(&err);
                return self.fail(fg, String::new(), err).await;
            }
        };
        info!("Updating to version {} from {}", plan.version, plan.url);

        let outcome = match self.attempt(fg, &plan).await {
            Ok(()) => self.commit(fg, &plan).await,
            Err(err) if err.is_cancelled() => self.abandon(fg).await,
            Err(err) => self.fail(fg, plan.version.clone(), err).await,
        };
        UpdatePlan::remove(&self.layout.plan_path);
        outcome
    }

    fn enter(&mut self, state: UpdateState) {
        debug!("Update state: {}", state);
        self.trail.push(state);
    }

    /// Removes leftovers of earlier runs before anything else happens.
    fn prepare(&mut self) {
        self.discard_download();
        discard(&self.layout.legacy_download_path);
        self.recovered = RollbackManager::recover_interrupted(&self.layout);
    }

    /// A missing plan has nothing to delete and a plan that failed to read
    /// for another reason is kept for a retry; an invalid plan can never
    /// succeed, so it goes.
    fn dispose_unusable_plan(&self, err: &UpdateError) {
        match err {
            UpdateError::PlanInvalid { .. } => UpdatePlan::remove(&self.layout.plan_path),
            UpdateError::PlanUnreadable { source, .. } if source.kind() != io::ErrorKind::NotFound => {
                warn!("Keeping unreadable update plan for a later retry");
            }
            _ => {}
        }
    }

    async fn attempt<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
        plan: &UpdatePlan,
    ) -> Result<(), UpdateError> {
        self.download(fg, plan).await?;
        self.verify(fg, plan).await?;
        self.backup(fg).await?;
        self.extract(fg).await
    }

    async fn download<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
        plan: &UpdatePlan,
    ) -> Result<(), UpdateError> {
        self.enter(UpdateState::Downloading);
        self.progress.reset();

        let fetcher = self.fetcher.clone();
        let url = plan.url.clone();
        let dest = self.layout.download_path.clone();
        let expected = plan.expected_size();
        let cancel = self.cancel.clone();
        let progress = Arc::clone(&self.progress);
        let rx = spawn_async(async move {
            fetcher
                .fetch(&url, &dest, expected, &cancel, move |done, total| {
                    progress.set(done, if expected.is_some() { total } else { 0 });
                })
                .await
        });

        let view = StageView {
            name: "download",
            status: DOWNLOADING,
            hint: CANCEL_HINT,
            cancel: Some(&self.cancel),
        };
        let size = fg.drive(view, &self.progress, rx).await??;
        info!("Downloaded {} bytes", size);
        Ok(())
    }

    async fn verify<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
        plan: &UpdatePlan,
    ) -> Result<(), UpdateError> {
        let Some(expected) = plan.checksum() else {
            warn!("Update plan has no checksum; installing unverified bundle");
            return Ok(());
        };

        self.enter(UpdateState::Verifying);
        self.progress.reset();

        let archive = self.layout.download_path.clone();
        let progress = Arc::clone(&self.progress);
        let wanted = expected.clone();
        let rx = spawn_blocking(move || {
            ChecksumVerifier::check(&archive, Some(&wanted), |done, total| progress.set(done, total))
        });

        let view = StageView {
            name: "verify",
            status: VERIFYING,
            hint: "",
            cancel: None,
        };
        match fg.drive(view, &self.progress, rx).await?.map_err(UpdateError::ChecksumError)? {
            Verification::Mismatch { actual } => Err(UpdateError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            Verification::Matched | Verification::Skipped => Ok(()),
        }
    }

    async fn backup<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
    ) -> Result<(), UpdateError> {
        self.enter(UpdateState::Installing(InstallPhase::Backup));
        self.progress.reset();

        let installer = self.installer();
        let layout = self.layout.clone();
        let rx = spawn_blocking(move || -> Result<(), UpdateError> {
            let preview = installer.preview(&layout.download_path)?;
            let set = BackupSet::standard(&layout).with_archive_targets(preview.overwrites);
            BackupManager::from_layout(&layout).backup(&set)?;
            Ok(())
        });

        let view = StageView {
            name: "backup",
            status: INSTALLING,
            hint: "",
            cancel: None,
        };
        fg.drive(view, &self.progress, rx).await?
    }

    /// Extracts the bundle; on failure this is where rollback happens.
    async fn extract<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
    ) -> Result<(), UpdateError> {
        self.enter(UpdateState::Installing(InstallPhase::Extract));
        self.progress.reset();

        let installer = self.installer();
        let archive = self.layout.download_path.clone();
        let journal_path = self.layout.backup_root.join(INSTALL_JOURNAL_FILE);
        let progress = Arc::clone(&self.progress);
        let rx = spawn_blocking({
            let journal_path = journal_path.clone();
            move || {
                let mut journal = match InstallJournal::create(&journal_path) {
                    Ok(journal) => journal,
                    Err(e) => return (InstallJournal::in_memory(), Err(InstallError::Journal(e))),
                };
                let result = installer.install(&archive, &mut journal, |done, total| {
                    progress.set(done as u64, total as u64);
                });
                (journal, result)
            }
        });

        let view = StageView {
            name: "install",
            status: INSTALLING,
            hint: "",
            cancel: None,
        };
        let (journal, result): (InstallJournal, Result<InstallReport, UpdateError>) =
            match fg.drive(view, &self.progress, rx).await {
                Ok((journal, result)) => (journal, result.map_err(UpdateError::from)),
                Err(aborted) => (load_journal(&journal_path), Err(aborted)),
            };

        match result {
            Ok(report) => {
                if !report.staged.is_empty() {
                    info!("{} file(s) staged for the launcher to swap in", report.staged.len());
                }
                Ok(())
            }
            Err(err) => {
                error!("Install failed: {}", err);
                self.roll_back(fg, journal).await;
                Err(err)
            }
        }
    }

    async fn roll_back<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
        journal: InstallJournal,
    ) {
        self.enter(UpdateState::RollingBack);
        self.progress.reset();

        let manager = RollbackManager::from_layout(&self.layout);
        let rx = spawn_blocking(move || manager.rollback(&journal));

        let view = StageView {
            name: "rollback",
            status: RESTORING,
            hint: "",
            cancel: None,
        };
        match fg.drive(view, &self.progress, rx).await {
            Ok(report) => self.rollback = Some(report),
            Err(e) => error!("Rollback did not finish: {}", e),
        }
    }

    async fn commit<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
        plan: &UpdatePlan,
    ) -> Outcome {
        self.enter(UpdateState::Succeeded);
        self.discard_download();
        BackupManager::from_layout(&self.layout).cleanup();
        UpdatePlan::remove(&self.layout.plan_path);

        let status = self.write_status(UpdateStatus::succeeded(&plan.version));
        info!("Updated to version {}", plan.version);

        fg.hold(COMPLETE, 1.0, self.config.message_pause() / 2).await;
        self.enter(UpdateState::Done);
        (Ok(plan.version.clone()), status)
    }

    async fn abandon<D: ProgressDisplay>(&mut self, fg: &mut Foreground<'_, D>) -> Outcome {
        info!("Update cancelled by user");
        self.discard_download();

        fg.hold(CANCELLED, 0.0, self.config.message_pause() / 2).await;
        self.enter(UpdateState::Done);
        (Err(UpdateError::Cancelled), None)
    }

    async fn fail<D: ProgressDisplay>(
        &mut self,
        fg: &mut Foreground<'_, D>,
        version: String,
        err: UpdateError,
    ) -> Outcome {
        error!("Update failed: {}", err);
        self.discard_download();
        // A backup that never completed, or a rollback that could not remove it
        BackupManager::from_layout(&self.layout).cleanup();

        let status = self.write_status(UpdateStatus::failed(version, err.to_string()));

        fg.hold(err.user_message(), 0.0, self.config.message_pause()).await;
        self.enter(UpdateState::Done);
        (Err(err), status)
    }

    fn write_status(&self, status: UpdateStatus) -> Option<UpdateStatus> {
        match StatusReporter::new(&self.layout.status_path).write_status(&status) {
            Ok(()) => Some(status),
            Err(e) => {
                error!("Failed to write update status: {:#}", e);
                None
            }
        }
    }

    fn installer(&self) -> Installer {
        Installer::new(&self.layout, self.in_use.clone())
    }

    fn discard_download(&self) {
        discard(&self.layout.download_path);
        discard(&with_suffix(&self.layout.download_path, TEMP_SUFFIX));
    }
}

fn load_journal(path: &Path) -> InstallJournal {
    InstallJournal::load(path).unwrap_or_else(|e| {
        warn!("Cannot read install journal {}: {}", path.display(), e);
        InstallJournal::in_memory()
    })
}

fn discard(path: &Path) {
    match remove_file_if_exists(path) {
        Ok(true) => debug!("Removed {}", path.display()),
        Ok(false) => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
