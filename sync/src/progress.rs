//! Progress reporting for sync runs
//!
//! Ephemeral phase and count updates over an unbounded channel. Nothing
//! here is persisted; UI layers drain the channel for progress bars.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The orchestrator's externally visible phases, in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Connecting,
    Analyzing,
    Comparing,
    Uploading,
    Downloading,
    Finalizing,
    Complete,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncPhase::Connecting => "connecting",
            SyncPhase::Analyzing => "analyzing",
            SyncPhase::Comparing => "comparing",
            SyncPhase::Uploading => "uploading",
            SyncPhase::Downloading => "downloading",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// One progress update: the current phase plus item counts where the phase
/// has them (uploading/downloading).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub current: usize,
    pub total: usize,
}

/// Receiving side of the progress stream.
pub struct ProgressChannel {
    receiver: mpsc::UnboundedReceiver<SyncProgress>,
}

impl ProgressChannel {
    pub fn new() -> (ProgressReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ProgressReporter { sender }, Self { receiver })
    }

    pub async fn recv(&mut self) -> Option<SyncProgress> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SyncProgress> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<SyncProgress> {
        let mut updates = Vec::new();
        while let Ok(update) = self.receiver.try_recv() {
            updates.push(update);
        }
        updates
    }
}

/// Sending side, held by the engine for the duration of a run. Send
/// failures are ignored: a dropped receiver must never fail a sync.
#[derive(Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<SyncProgress>,
}

impl ProgressReporter {
    pub fn phase(&self, phase: SyncPhase) {
        let _ = self.sender.send(SyncProgress {
            phase,
            current: 0,
            total: 0,
        });
    }

    pub fn items(&self, phase: SyncPhase, current: usize, total: usize) {
        let _ = self.sender.send(SyncProgress {
            phase,
            current,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn phases_arrive_in_order() {
        let (reporter, mut channel) = ProgressChannel::new();
        reporter.phase(SyncPhase::Connecting);
        reporter.items(SyncPhase::Uploading, 1, 3);
        reporter.phase(SyncPhase::Complete);

        assert_eq!(channel.recv().await.unwrap().phase, SyncPhase::Connecting);
        let upload = channel.recv().await.unwrap();
        assert_eq!(upload.phase, SyncPhase::Uploading);
        assert_eq!((upload.current, upload.total), (1, 3));
        assert_eq!(channel.recv().await.unwrap().phase, SyncPhase::Complete);
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (reporter, channel) = ProgressChannel::new();
        drop(channel);
        reporter.phase(SyncPhase::Analyzing);
    }
}
