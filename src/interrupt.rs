//! Checkpoint-and-exit on termination signals.
//!
//! The handler only records which signal arrived. Engines poll
//! [`pending_signal`] between iterations, write their files and then exit
//! through the sampler, so nothing non-async-signal-safe runs in the handler.

use std::sync::atomic::{AtomicI32, Ordering};

use log::warn;
use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Signals that trigger a checkpoint.
pub const CHECKPOINT_SIGNALS: [Signal; 3] = [Signal::SIGTERM, Signal::SIGINT, Signal::SIGALRM];

static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signal: c_int) {
    PENDING_SIGNAL.store(signal, Ordering::SeqCst);
}

/// The most recent checkpoint signal received since the guard was installed.
pub fn pending_signal() -> Option<Signal> {
    match PENDING_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        raw => Signal::try_from(raw).ok(),
    }
}

/// Installs the checkpoint handlers and restores the previous ones on drop.
#[derive(Debug)]
pub struct SignalGuard {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalGuard {
    pub fn install() -> nix::Result<Self> {
        PENDING_SIGNAL.store(0, Ordering::SeqCst);
        let action = SigAction::new(
            SigHandler::Handler(record_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let mut guard = Self {
            previous: Vec::with_capacity(CHECKPOINT_SIGNALS.len()),
        };
        for signal in CHECKPOINT_SIGNALS {
            // SAFETY: the handler only stores to an atomic.
            let previous = unsafe { sigaction(signal, &action) }?;
            guard.previous.push((signal, previous));
        }
        Ok(guard)
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for (signal, previous) in self.previous.drain(..).rev() {
            // SAFETY: restores an action that was installed before.
            if let Err(err) = unsafe { sigaction(signal, &previous) } {
                warn!("Failed to restore handler for {}: {}", signal, err);
            }
        }
        PENDING_SIGNAL.store(0, Ordering::SeqCst);
    }
}
