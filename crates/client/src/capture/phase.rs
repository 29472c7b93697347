//! Capture lifecycle.

use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use stitchcap_core::Error;

/// Where a capture is. Phases only move forward; any phase may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    #[default]
    Idle,
    Preparing,
    BackgroundReady,
    Stitching,
    Exporting,
    Done,
    Failed,
}

impl CapturePhase {
    fn next(self) -> Option<CapturePhase> {
        match self {
            CapturePhase::Idle => Some(CapturePhase::Preparing),
            CapturePhase::Preparing => Some(CapturePhase::BackgroundReady),
            CapturePhase::BackgroundReady => Some(CapturePhase::Stitching),
            CapturePhase::Stitching => Some(CapturePhase::Exporting),
            CapturePhase::Exporting => Some(CapturePhase::Done),
            CapturePhase::Done | CapturePhase::Failed => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_advance_to(self, to: CapturePhase) -> bool {
        match to {
            CapturePhase::Failed => !matches!(self, CapturePhase::Done | CapturePhase::Failed),
            _ => self.next() == Some(to),
        }
    }
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapturePhase::Idle => "idle",
            CapturePhase::Preparing => "preparing",
            CapturePhase::BackgroundReady => "background_ready",
            CapturePhase::Stitching => "stitching",
            CapturePhase::Exporting => "exporting",
            CapturePhase::Done => "done",
            CapturePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives one capture through its phases, publishing each to `slot` and
/// logging how long the previous phase took.
pub(crate) struct PhaseTracker<'a> {
    slot: &'a Mutex<CapturePhase>,
    current: CapturePhase,
    started: Instant,
    phase_started: Instant,
}

impl<'a> PhaseTracker<'a> {
    /// Enter `Preparing`.
    pub(crate) fn start(slot: &'a Mutex<CapturePhase>) -> Self {
        let now = Instant::now();
        let mut tracker = Self { slot, current: CapturePhase::Idle, started: now, phase_started: now };
        tracker.advance(CapturePhase::Preparing);
        tracker
    }

    pub(crate) fn current(&self) -> CapturePhase {
        self.current
    }

    pub(crate) fn advance(&mut self, to: CapturePhase) {
        debug_assert!(self.current.can_advance_to(to), "illegal transition {} -> {}", self.current, to);
        let elapsed_ms = self.phase_started.elapsed().as_millis() as u64;
        tracing::info!(from = %self.current, to = %to, elapsed_ms, "capture phase");
        self.current = to;
        self.phase_started = Instant::now();
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = to;
    }

    /// Enter `Done`; returns total elapsed milliseconds.
    pub(crate) fn finish(mut self) -> u64 {
        self.advance(CapturePhase::Done);
        let total_ms = self.started.elapsed().as_millis() as u64;
        tracing::info!(total_ms, "capture finished");
        total_ms
    }

    pub(crate) fn fail(mut self, error: &Error) {
        tracing::error!(phase = %self.current, error = %error, "capture failed");
        self.advance(CapturePhase::Failed);
    }
}
