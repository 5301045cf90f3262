use std::collections::VecDeque;

use counsel_shared::protocol::IceCandidate;

/// Remote ICE candidates that arrived before the remote description.
///
/// Candidates are only ever deferred, never dropped: [`IceQueue::drain`]
/// hands them back in arrival order once a description is set.
#[derive(Debug, Default)]
pub struct IceQueue {
    pending: VecDeque<IceCandidate>,
}

impl IceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_arrival_order() {
        let mut queue = IceQueue::new();
        for i in 0..3 {
            queue.push(IceCandidate::new(format!("candidate:{i}")));
        }
        assert_eq!(queue.len(), 3);

        let drained: Vec<String> = queue.drain().into_iter().map(|c| c.candidate).collect();
        assert_eq!(drained, ["candidate:0", "candidate:1", "candidate:2"]);
        assert!(queue.is_empty());
    }
}
