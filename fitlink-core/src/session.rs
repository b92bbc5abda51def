//! Sender-side conversation: one batch in flight at a time.

use crate::record::Record;

/// Conversation phase of the sending endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// No batch in flight.
    Idle,
    /// At least one send call succeeded; waiting for the peer's receipt.
    /// There is no timeout on this phase: the conversation waits
    /// indefinitely for the acknowledgment. Known wire-protocol
    /// limitation, kept as-is.
    AwaitingPeerAck,
    /// An acknowledgment arrived; waiting for the user to start a new cycle.
    Confirmed,
}

/// Tracks the three-phase conversation and retains the staged batch so a
/// failed dispatch can be retried without re-entering the records.
#[derive(Debug)]
pub struct SenderSession {
    state: ConversationState,
    pending: Option<Vec<Record>>,
}

impl SenderSession {
    pub fn new() -> Self {
        Self {
            state: ConversationState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Batch retained for retry, if any.
    pub fn pending_batch(&self) -> Option<&[Record]> {
        self.pending.as_deref()
    }

    /// Stage a batch for dispatch. The batch stays here until the cycle
    /// is confirmed and acknowledged or replaced by a new one; the state
    /// moves only on send outcomes.
    pub fn begin_dispatch(&mut self, batch: Vec<Record>) {
        self.pending = Some(batch);
        self.state = ConversationState::Idle;
    }

    /// Stage a reset command: same conversation shape, nothing to retain.
    pub fn begin_reset(&mut self) {
        self.pending = None;
        self.state = ConversationState::Idle;
    }

    /// One peer accepted the send call.
    pub fn on_send_success(&mut self) {
        if self.state != ConversationState::Confirmed {
            self.state = ConversationState::AwaitingPeerAck;
        }
    }

    /// One peer's send call failed. Back to Idle; the staged batch stays
    /// for retry. Other peers' sends are unaffected.
    pub fn on_send_failure(&mut self) {
        if self.state != ConversationState::Confirmed {
            self.state = ConversationState::Idle;
        }
    }

    /// An acknowledgment arrived. Returns true when it moved the
    /// conversation to Confirmed; duplicate or late acks are no-ops.
    pub fn on_ack(&mut self) -> bool {
        if self.state == ConversationState::AwaitingPeerAck {
            self.state = ConversationState::Confirmed;
            true
        } else {
            false
        }
    }

    /// User acknowledged the confirmation; close the cycle.
    pub fn acknowledge(&mut self) {
        if self.state == ConversationState::Confirmed {
            self.state = ConversationState::Idle;
            self.pending = None;
        }
    }
}

impl Default for SenderSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<Record> {
        vec![Record::new("Push-ups", 3, 15)]
    }

    #[test]
    fn starts_idle() {
        let session = SenderSession::new();
        assert_eq!(session.state(), ConversationState::Idle);
        assert!(session.pending_batch().is_none());
    }

    #[test]
    fn send_success_awaits_ack() {
        let mut session = SenderSession::new();
        session.begin_dispatch(batch());
        session.on_send_success();
        assert_eq!(session.state(), ConversationState::AwaitingPeerAck);
    }

    #[test]
    fn send_failure_preserves_batch() {
        let mut session = SenderSession::new();
        session.begin_dispatch(batch());
        session.on_send_success();
        session.on_send_failure();
        assert_eq!(session.state(), ConversationState::Idle);
        assert_eq!(session.pending_batch(), Some(batch().as_slice()));
    }

    #[test]
    fn ack_confirms_once() {
        let mut session = SenderSession::new();
        session.begin_dispatch(batch());
        session.on_send_success();
        assert!(session.on_ack());
        assert_eq!(session.state(), ConversationState::Confirmed);
        // A duplicate ack is a no-op, not an error.
        assert!(!session.on_ack());
        assert_eq!(session.state(), ConversationState::Confirmed);
    }

    #[test]
    fn ack_while_idle_is_noop() {
        let mut session = SenderSession::new();
        assert!(!session.on_ack());
        assert_eq!(session.state(), ConversationState::Idle);
    }

    #[test]
    fn late_send_failure_keeps_confirmed() {
        let mut session = SenderSession::new();
        session.begin_dispatch(batch());
        session.on_send_success();
        session.on_ack();
        session.on_send_failure();
        assert_eq!(session.state(), ConversationState::Confirmed);
    }

    #[test]
    fn acknowledge_closes_cycle() {
        let mut session = SenderSession::new();
        session.begin_dispatch(batch());
        session.on_send_success();
        session.on_ack();
        session.acknowledge();
        assert_eq!(session.state(), ConversationState::Idle);
        assert!(session.pending_batch().is_none());
    }

    #[test]
    fn acknowledge_before_confirm_changes_nothing() {
        let mut session = SenderSession::new();
        session.begin_dispatch(batch());
        session.on_send_success();
        session.acknowledge();
        assert_eq!(session.state(), ConversationState::AwaitingPeerAck);
        assert!(session.pending_batch().is_some());
    }

    #[test]
    fn reset_dispatch_has_no_pending_batch() {
        let mut session = SenderSession::new();
        session.begin_dispatch(batch());
        session.begin_reset();
        assert!(session.pending_batch().is_none());
        session.on_send_success();
        assert!(session.on_ack());
    }
}
