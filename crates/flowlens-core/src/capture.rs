//! Capture gating shared between the lifecycle service and the collector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Two orthogonal capture flags: `capturing` (global on/off) and `paused`
/// (temporary suspension while the engine stays up).
///
/// Cloneable handle over shared atomics: the proxy service writes the flags
/// under its lifecycle lock, the collector reads them lock-free on the
/// engine thread. Capture starts enabled and unpaused.
#[derive(Debug, Clone)]
pub struct CaptureState {
    capturing: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureState {
    /// Creates a new capture state with capture enabled.
    pub fn new() -> Self {
        Self {
            capturing: Arc::new(AtomicBool::new(true)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether exchanges should currently be recorded.
    ///
    /// Hot path for the collector: two atomic loads.
    #[inline]
    pub fn should_capture(&self) -> bool {
        self.capturing.load(Ordering::Relaxed) && !self.paused.load(Ordering::Relaxed)
    }

    /// Whether capture is globally enabled.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Relaxed)
    }

    /// Whether capture is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Globally enables or disables capture.
    pub fn set_capturing(&self, on: bool) {
        self.capturing.store(on, Ordering::Relaxed);
    }

    /// Suspends or resumes capture without touching the global flag.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }
}
