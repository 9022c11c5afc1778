//! A [`ProgressDisplay`] that records frames and replays scripted keys.

use crate::ui::{Key, ProgressDisplay};
use std::collections::VecDeque;

/// One drawn frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub status: String,
    pub fraction: f64,
    pub hint: String,
}

#[derive(Debug, Default)]
pub struct RecordingDisplay {
    frames: Vec<Frame>,
    keys: VecDeque<Key>,
    power_warning_shown: bool,
    finished: bool,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys are handed out one per poll, in order.
    pub fn with_keys(keys: Vec<Key>) -> Self {
        Self {
            keys: keys.into(),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Distinct status texts in the order they first appeared.
    pub fn statuses(&self) -> Vec<String> {
        let mut statuses: Vec<String> = Vec::new();
        for frame in &self.frames {
            if statuses.last() != Some(&frame.status) {
                statuses.push(frame.status.clone());
            }
        }
        statuses
    }

    pub fn last_status(&self) -> Option<&str> {
        self.frames.last().map(|f| f.status.as_str())
    }

    pub fn power_warning_shown(&self) -> bool {
        self.power_warning_shown
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl ProgressDisplay for RecordingDisplay {
    fn draw_progress(&mut self, status: &str, fraction: f64, hint: &str) {
        self.frames.push(Frame {
            status: status.to_string(),
            fraction,
            hint: hint.to_string(),
        });
    }

    fn poll_key(&mut self) -> Option<Key> {
        self.keys.pop_front()
    }

    fn set_power_warning(&mut self, visible: bool) {
        self.power_warning_shown |= visible;
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
