use crate::ui::theme::{Palette, Rgb, WARNING};
use crate::ui::{Key, ProgressDisplay};
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const BAR_LEN: u64 = 1000;
const BAR_WIDTH: usize = 40;

/// Progress screen on a terminal.
///
/// Colors come from the host theme. Ctrl-C is read as the MENU key, so an
/// interactive run can be cancelled the same way as on the device.
pub struct TerminalDisplay {
    bar: ProgressBar,
    palette: Palette,
    interrupted: Arc<AtomicBool>,
    warning: bool,
}

impl TerminalDisplay {
    /// Must be called inside a Tokio runtime; the Ctrl-C listener is a task.
    #[must_use]
    pub fn new(palette: Palette) -> Self {
        let bar = ProgressBar::new(BAR_LEN);
        bar.set_style(bar_style(&palette));

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Ctrl-C received");
                flag.store(true, Ordering::SeqCst);
            }
        });

        Self {
            bar,
            palette,
            interrupted,
            warning: false,
        }
    }
}

fn paint(text: &str, color: Rgb) -> ColoredString {
    text.truecolor(color.0, color.1, color.2)
}

fn bar_style(palette: &Palette) -> ProgressStyle {
    let (filled_color, empty_color) = (palette.progress, palette.progress_bg);
    ProgressStyle::with_template("{msg}\n{themed_bar} {percent:>3}% {prefix}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key("themed_bar", move |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let filled = ((state.fraction() * BAR_WIDTH as f32).round() as usize).min(BAR_WIDTH);
            let _ = write!(
                w,
                "{}{}",
                paint(&"━".repeat(filled), filled_color),
                paint(&"━".repeat(BAR_WIDTH - filled), empty_color)
            );
        })
}

impl ProgressDisplay for TerminalDisplay {
    fn draw_progress(&mut self, status: &str, fraction: f64, hint: &str) {
        let message = if self.warning {
            paint("Do not power off!", WARNING).bold().to_string()
        } else {
            paint(status, self.palette.header_text).bold().to_string()
        };
        self.bar.set_message(message);
        self.bar.set_prefix(paint(hint, self.palette.dim).to_string());
        self.bar.set_position((fraction.clamp(0.0, 1.0) * BAR_LEN as f64) as u64);
    }

    fn poll_key(&mut self) -> Option<Key> {
        self.interrupted.swap(false, Ordering::SeqCst).then_some(Key::Menu)
    }

    fn set_power_warning(&mut self, visible: bool) {
        self.warning = visible;
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}
