//! Leadership gate
//!
//! Leader election itself is an external capability; the processor only
//! needs "am I leader right now" as a boolean channel. The external
//! elector flips the sender side, the processor watches the receiver.

use tokio::sync::watch;

/// Sender half, driven by the external elector.
#[derive(Clone)]
pub struct LeaderElection {
    sender: watch::Sender<bool>,
}

/// Receiver half, held by a namespace processor.
pub type LeaderGate = watch::Receiver<bool>;

impl LeaderElection {
    /// Create a gate that starts out not leading.
    pub fn new() -> (Self, LeaderGate) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, receiver)
    }

    /// Create a gate that is permanently leading, for single-process
    /// deployments and tests.
    pub fn standalone() -> (Self, LeaderGate) {
        let (election, gate) = Self::new();
        election.acquire();
        (election, gate)
    }

    /// Mark this process as the namespace leader.
    pub fn acquire(&self) {
        let _ = self.sender.send(true);
    }

    /// Relinquish leadership.
    pub fn resign(&self) {
        let _ = self.sender.send(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_follows_election() {
        let (election, mut gate) = LeaderElection::new();
        assert!(!*gate.borrow());

        election.acquire();
        gate.changed().await.unwrap();
        assert!(*gate.borrow());

        election.resign();
        gate.changed().await.unwrap();
        assert!(!*gate.borrow());
    }

    #[test]
    fn standalone_gate_is_leader() {
        let (_election, gate) = LeaderElection::standalone();
        assert!(*gate.borrow());
    }
}
