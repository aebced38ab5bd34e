//! Attention guidance
//!
//! Points the learner at the next control: given a target selector, the
//! cue finds the target's rectangle in the current layout and shows a
//! pointer at its centre for a fixed window.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::TutorEvent;

/// Selectors of the controls the learning flow points at
pub mod targets {
    pub const LISTEN_CONTROL: &str = ".listen-button";
    pub const MICROPHONE: &str = ".repeat-button";
    pub const CHOICE_GRID: &str = ".recognition-grid";
    pub const CANVAS: &str = ".drawing-canvas";
    pub const NEXT_CONTROL: &str = ".next-button";
}

/// Viewport rectangle of a rendered element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Currently rendered elements, keyed by selector
pub type Layout = HashMap<String, Rect>;

/// Transient pointer over a target
pub struct GuidanceCue {
    duration: Duration,
    event_tx: broadcast::Sender<TutorEvent>,
    hide_task: Option<JoinHandle<()>>,
}

impl GuidanceCue {
    pub fn new(duration: Duration, event_tx: broadcast::Sender<TutorEvent>) -> Self {
        Self {
            duration,
            event_tx,
            hide_task: None,
        }
    }

    /// Show the pointer over `target`
    ///
    /// A target that isn't rendered is not an error; nothing is shown.
    /// Showing a new cue replaces any cue still on screen.
    pub fn show(&mut self, target: &str, layout: &Layout) {
        let Some(rect) = layout.get(target) else {
            debug!(target, "guidance target not rendered, skipping cue");
            return;
        };

        if let Some(task) = self.hide_task.take() {
            task.abort();
        }

        let (x, y) = rect.center();
        debug!(target, x, y, "showing guidance cue");
        let _ = self.event_tx.send(TutorEvent::CueShown {
            target: target.to_string(),
            x,
            y,
        });

        let event_tx = self.event_tx.clone();
        let duration = self.duration;
        self.hide_task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = event_tx.send(TutorEvent::CueHidden);
        }));
    }
}

impl Drop for GuidanceCue {
    fn drop(&mut self) {
        if let Some(task) = self.hide_task.take() {
            task.abort();
        }
    }
}
