//! One-frame-in-flight admission gate.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdmissionState {
    /// Ready to accept a frame.
    Idle = 0,
    /// A frame is in flight; new frames are dropped.
    Processing = 1,
}

/// Two-state machine deciding whether an arriving frame is processed.
///
/// The check and the `Idle → Processing` transition are a single
/// compare-and-swap, so two frames can never both be admitted.
#[derive(Debug)]
pub struct AdmissionGate {
    state: AtomicU8,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(AdmissionState::Idle as u8),
        }
    }
}

impl AdmissionGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> AdmissionState {
        match self.state.load(Ordering::Acquire) {
            0 => AdmissionState::Idle,
            _ => AdmissionState::Processing,
        }
    }

    /// Admit a frame if idle. The returned permit holds the gate in
    /// `Processing` until it is dropped.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        self.state
            .compare_exchange(
                AdmissionState::Idle as u8,
                AdmissionState::Processing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| AdmissionPermit {
                gate: Arc::clone(self),
            })
    }
}

/// Proof that one frame is in flight. Dropping it returns the gate to
/// `Idle`, whether the frame succeeded or failed.
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate
            .state
            .store(AdmissionState::Idle as u8, Ordering::Release);
    }
}
