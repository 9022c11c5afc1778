//! Power button watch.
//!
//! Cutting power mid-install is the one failure rollback cannot fix, so a
//! press of the power button during an update shows a warning overlay
//! instead of going unnoticed.

use crate::constants::POWER_WARNING_DURATION;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

const EV_KEY: u16 = 0x01;
const KEY_POWER: u16 = 116;
const KEY_PRESSED: i32 = 1;

/// Size of `struct input_event`: a `timeval` of two C longs, then
/// type, code and value.
const EVENT_SIZE: usize = 2 * std::mem::size_of::<usize>() + 8;

/// One decoded Linux input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    #[must_use]
    pub const fn is_power_press(&self) -> bool {
        self.kind == EV_KEY && self.code == KEY_POWER && self.value == KEY_PRESSED
    }
}

/// Decodes one `input_event` record, ignoring the timestamp.
#[must_use]
pub fn parse_input_event(buf: &[u8]) -> Option<InputEvent> {
    let tail = buf.get(EVENT_SIZE - 8..EVENT_SIZE)?;
    Some(InputEvent {
        kind: u16::from_le_bytes([tail[0], tail[1]]),
        code: u16::from_le_bytes([tail[2], tail[3]]),
        value: i32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]),
    })
}

/// Whether the power warning is currently showing.
#[derive(Debug, Clone, Default)]
pub struct PowerWarning(Arc<Mutex<Option<Instant>>>);

impl PowerWarning {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows the warning for the next few seconds.
    pub fn trigger(&self) {
        if let Ok(mut until) = self.0.lock() {
            *until = Some(Instant::now() + POWER_WARNING_DURATION);
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0
            .lock()
            .map(|until| until.is_some_and(|t| Instant::now() < t))
            .unwrap_or(false)
    }
}

/// Background reader of the input device.
pub struct PowerButtonMonitor;

impl PowerButtonMonitor {
    /// Starts watching `device`. Returns `None` if it cannot be opened,
    /// which just means no warning will ever be shown.
    pub fn start(device: &Path, warning: PowerWarning) -> Option<JoinHandle<()>> {
        let file = match File::open(device) {
            Ok(file) => file,
            Err(e) => {
                debug!("Power button monitor disabled ({}): {}", device.display(), e);
                return None;
            }
        };

        thread::Builder::new()
            .name("power-monitor".to_string())
            .spawn(move || watch(file, &warning))
            .map_err(|e| debug!("Cannot start power button monitor: {}", e))
            .ok()
    }
}

fn watch<R: Read>(mut device: R, warning: &PowerWarning) {
    let mut buf = [0u8; EVENT_SIZE];
    loop {
        match device.read_exact(&mut buf) {
            Ok(()) => {
                if parse_input_event(&buf).is_some_and(|ev| ev.is_power_press()) {
                    debug!("Power button pressed during update");
                    warning.trigger();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                warn!("Power button monitor stopped: {}", e);
                return;
            }
        }
    }
}
