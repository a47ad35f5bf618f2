// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog - Mailbox shared by the host and coprocessor tasks

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use pdiprog_mailbox::{AtomicMailbox, CompletionSignal, CompletionWait};

/// The mailbox.  The host task writes commands, the coprocessor task
/// executes them.
pub(crate) static MAILBOX: AtomicMailbox = AtomicMailbox::new();

/// Raised by the coprocessor task each time a command completes.
pub(crate) static COMPLETION: Completion = Completion::new();

/// Completion signal between the coprocessor and host tasks.
pub(crate) struct Completion {
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl Completion {
    pub(crate) const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }
}

impl CompletionSignal for Completion {
    fn raise(&self) {
        self.signal.signal(());
    }
}

impl CompletionWait for Completion {
    fn reset(&self) {
        self.signal.reset();
    }

    async fn wait(&self, timeout_ms: u32) -> bool {
        let timeout = Duration::from_millis(timeout_ms as u64);
        match with_timeout(timeout, self.signal.wait()).await {
            Ok(()) => true,
            Err(_) => {
                debug!("Completion not signalled within {timeout_ms}ms");
                false
            }
        }
    }
}
