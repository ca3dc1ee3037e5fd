//! Transfer progress notifications
//!
//! Transfer clients return a single `Result`; byte-level progress travels on
//! a separate channel. The reporter is finished when the transfer reaches
//! its terminal result, after which every clone of it is silent and the
//! receiver observes the channel closing.
//!
//! # Example
//!
//! ```
//! use stream_ingestr::upload::{progress_channel, TransferProgress};
//!
//! let (reporter, mut rx) = progress_channel();
//! reporter.report(10, 100);
//! reporter.finish();
//! reporter.report(20, 100); // ignored
//!
//! assert_eq!(rx.try_recv().unwrap(), TransferProgress { bytes_sent: 10, bytes_total: 100 });
//! assert!(rx.try_recv().is_err());
//! ```

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Bytes moved so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

impl TransferProgress {
    /// Completion ratio in `[0.0, 1.0]`
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            1.0
        } else {
            self.bytes_sent as f64 / self.bytes_total as f64
        }
    }
}

/// Receiving end of a progress channel
pub type ProgressReceiver = mpsc::UnboundedReceiver<TransferProgress>;

/// Sending end of a progress channel
///
/// Cheap to clone; all clones share the same finished state.
#[derive(Clone, Debug, Default)]
pub struct ProgressReporter {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<TransferProgress>>>>,
}

/// Create a connected reporter and receiver
pub fn progress_channel() -> (ProgressReporter, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressReporter {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        rx,
    )
}

impl ProgressReporter {
    /// Reporter that drops every event
    pub fn noop() -> Self {
        Self::default()
    }

    /// Emit a progress event; no-op once finished
    pub fn report(&self, bytes_sent: u64, bytes_total: u64) {
        if let Ok(guard) = self.tx.lock() {
            if let Some(tx) = guard.as_ref() {
                // Receiver may have gone away; progress is best effort
                let _ = tx.send(TransferProgress {
                    bytes_sent,
                    bytes_total,
                });
            }
        }
    }

    /// Close the channel; later reports are ignored
    pub fn finish(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.tx.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}
