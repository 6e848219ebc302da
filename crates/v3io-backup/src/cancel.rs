//! Session wide cancellation.
//!

use core::time::Duration;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::warn;

/// A cancellation signal shared by every component of a session.
///
/// No message is ever sent on the channel, cancelling drops the only sender
/// so every clone of the receiver observes a disconnect. This lets workers
/// wait on the signal inside a `select!` next to their queues.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);

        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Cancel the session. Idempotent.
    pub fn cancel(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether the session was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration`, returns `true` if cancelled before it elapsed.
    pub fn wait(&self, duration: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(duration),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Cancel the session on SIGINT or SIGTERM.
    ///
    /// Only one handler can be installed per process.
    pub fn cancel_on_signal(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            warn!("Received a termination signal, cancelling the backup");
            token.cancel();
        })
    }

    /// Receiver that becomes ready once the session is cancelled.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}
