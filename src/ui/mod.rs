//! Presentation for the update screen
//!
//! The update pipeline only talks to a [`ProgressDisplay`]: it draws a
//! status line, a progress fraction and a hint, and polls for keys. It never
//! renders anything itself.
//!
//! # Modules
//!
//! - [`terminal`] - `indicatif` progress bar colored with the host theme
//! - [`theme`] - The host application's palettes and settings lookup
//! - [`power`] - Power button watch for the "Do not power off!" overlay

pub mod power;
pub mod terminal;
pub mod theme;

pub use power::{PowerButtonMonitor, PowerWarning};
pub use terminal::TerminalDisplay;
pub use theme::{Palette, load_theme_name};

use tracing::{debug, info, warn};

/// A button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    A,
    B,
    Menu,
    Other,
}

impl Key {
    /// B and MENU both cancel a running download.
    #[must_use]
    pub const fn is_cancel(self) -> bool {
        matches!(self, Self::B | Self::Menu)
    }
}

/// Display and input collaborator of the update screen.
pub trait ProgressDisplay {
    /// Draws one frame. `fraction` is clamped to `0.0..=1.0` by callers.
    fn draw_progress(&mut self, status: &str, fraction: f64, hint: &str);

    /// Returns the next pending key press without blocking.
    fn poll_key(&mut self) -> Option<Key>;

    /// Shows or hides the power-off warning overlay.
    fn set_power_warning(&mut self, _visible: bool) {}

    /// Called once before handoff.
    fn finish(&mut self) {}
}

impl<T: ProgressDisplay + ?Sized> ProgressDisplay for &mut T {
    fn draw_progress(&mut self, status: &str, fraction: f64, hint: &str) {
        (**self).draw_progress(status, fraction, hint);
    }

    fn poll_key(&mut self) -> Option<Key> {
        (**self).poll_key()
    }

    fn set_power_warning(&mut self, visible: bool) {
        (**self).set_power_warning(visible);
    }

    fn finish(&mut self) {
        (**self).finish();
    }
}

impl ProgressDisplay for Box<dyn ProgressDisplay + Send> {
    fn draw_progress(&mut self, status: &str, fraction: f64, hint: &str) {
        (**self).draw_progress(status, fraction, hint);
    }

    fn poll_key(&mut self) -> Option<Key> {
        (**self).poll_key()
    }

    fn set_power_warning(&mut self, visible: bool) {
        (**self).set_power_warning(visible);
    }

    fn finish(&mut self) {
        (**self).finish();
    }
}

/// Reports the update screen through `tracing` instead of drawing it.
///
/// Used for headless runs and `--no-progress`. Only status changes are
/// logged at info level; progress goes to debug in 10% steps.
#[derive(Debug, Default)]
pub struct LogDisplay {
    last_status: String,
    last_decile: Option<u8>,
    warning: bool,
}

impl LogDisplay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressDisplay for LogDisplay {
    fn draw_progress(&mut self, status: &str, fraction: f64, _hint: &str) {
        if status != self.last_status {
            info!("{}", status);
            self.last_status = status.to_string();
            self.last_decile = None;
        }

        let decile = (fraction.clamp(0.0, 1.0) * 10.0) as u8;
        if self.last_decile != Some(decile) {
            debug!("{}: {}%", status, u32::from(decile) * 10);
            self.last_decile = Some(decile);
        }
    }

    fn poll_key(&mut self) -> Option<Key> {
        None
    }

    fn set_power_warning(&mut self, visible: bool) {
        if visible && !self.warning {
            warn!("Do not power off!");
        }
        self.warning = visible;
    }
}
