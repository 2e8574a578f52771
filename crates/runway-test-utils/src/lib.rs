//! Test utilities and mock types for runway development.
//!
//! Provides a [`MockController`] that counts its lifecycle calls, and
//! reusable fixtures (a recording [`Model`](runway_core::Model) and polling
//! helpers) in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{wait_until, ConstantSpeedModel, RecordingModel};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use runway_core::{Actuator, AtomicF64, Controller, ControllerError};

#[derive(Default)]
struct MockState {
    enabled: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
    fail_next: AtomicBool,
    panic_next: AtomicBool,
    value: AtomicF64,
}

/// Controller double.
///
/// Clones share their counters, so a test can keep one handle while the
/// manager owns another.
#[derive(Clone)]
pub struct MockController {
    name: String,
    authority: Option<Actuator>,
    state: Arc<MockState>,
}

impl MockController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authority: None,
            state: Arc::new(MockState::default()),
        }
    }

    /// Require `actuator` authority to start.
    pub fn with_authority(mut self, actuator: Actuator) -> Self {
        self.authority = Some(actuator);
        self
    }

    /// Successful `start` calls.
    pub fn starts(&self) -> u64 {
        self.state.starts.load(Ordering::SeqCst)
    }

    /// `stop` calls, including no-op ones.
    pub fn stops(&self) -> u64 {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// Make the next `start` return an error.
    pub fn fail_next_start(&self) {
        self.state.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next `start` panic.
    pub fn panic_next_start(&self) {
        self.state.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn set_value(&self, value: f64) {
        self.state.value.store(value);
    }
}

impl Controller for MockController {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<(), ControllerError> {
        if self.state.panic_next.swap(false, Ordering::SeqCst) {
            panic!("mock controller '{}' panicked on start", self.name);
        }
        if self.state.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ControllerError::StartFailed {
                name: self.name.clone(),
                reason: "injected failure".into(),
            });
        }
        if !self.state.enabled.swap(true, Ordering::SeqCst) {
            self.state.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&self) {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        self.state.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    fn current_value(&self) -> f64 {
        self.state.value.load()
    }

    fn required_authority(&self) -> Option<Actuator> {
        self.authority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let a = MockController::new("m").with_authority(Actuator::Brake);
        let b = a.clone();
        a.start().unwrap();
        a.start().unwrap();
        assert_eq!(b.starts(), 1);
        assert!(b.is_enabled());
        assert_eq!(b.required_authority(), Some(Actuator::Brake));
        b.stop();
        assert!(!a.is_enabled());
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let m = MockController::new("m");
        m.fail_next_start();
        assert!(m.start().is_err());
        assert!(m.start().is_ok());
    }
}
