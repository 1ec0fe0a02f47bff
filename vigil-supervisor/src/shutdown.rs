//! Process-wide cooperative shutdown flag

use crate::error::{Result, SupervisorError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cancellation flag shared between the signal listener and the control loop.
///
/// Clones observe the same flag. Setting it is idempotent and it is never cleared.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            sender: Arc::new(tx),
            receiver: rx,
        }
    }

    /// Request shutdown. Returns `true` only for the call that set the flag.
    pub fn trigger(&self) -> bool {
        self.sender.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        })
    }

    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of `self`, so this cannot fail.
        let _ = receiver.wait_for(|requested| *requested).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Install interrupt and terminate listeners that trigger `shutdown`.
///
/// The listener task does nothing but set the flag; every repeated signal is a no-op.
///
/// # Errors
///
/// Returns an error if the OS signal handlers cannot be installed.
pub fn listen_for_signals(shutdown: ShutdownSignal) -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).map_err(SupervisorError::Signal)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::Signal)?;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = sigint.recv() => if received.is_none() { break },
                    received = sigterm.recv() => if received.is_none() { break },
                }
                shutdown.trigger();
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger();
            }
        }))
    }
}
