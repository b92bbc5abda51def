//! Host-driven API: ExchangeCore receives events from the endpoint's
//! runtime and returns actions for the host to perform. All state
//! mutation funnels through this single owner; transport callbacks never
//! touch conversation or log state directly.

use std::collections::HashMap;

use crate::codec::{self, EncodeError};
use crate::identity::DeviceId;
use crate::protocol::{self, RESET_OK_TOKEN};
use crate::record::Record;
use crate::session::{ConversationState, SenderSession};
use crate::wire::{self, FrameEncodeError};

/// Action for the host to perform.
#[derive(Debug)]
pub enum OutboundAction {
    /// Send an already-framed message to one peer.
    SendMessage(DeviceId, Vec<u8>),
}

/// Point-in-time view of endpoint state handed to observers.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub conversation: ConversationState,
    pub status: String,
    pub log: Vec<Record>,
}

/// Handle returned by subscribe; pass back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(u64);

type ObserverFn = Box<dyn Fn(&Snapshot) + Send + Sync>;

/// Error staging a dispatch. The caller keeps the batch in every case.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no reachable peer")]
    NoPeerReachable,
    #[error("nothing selected to send")]
    EmptyBatch,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("framing failed: {0}")]
    Frame(#[from] FrameEncodeError),
}

/// Main coordinator for one endpoint, in either role. The host passes
/// inbound messages and send outcomes; the core returns outbound actions
/// and notifies observers of every visible change.
pub struct ExchangeCore {
    device_id: DeviceId,
    session: SenderSession,
    log: Vec<Record>,
    status: String,
    observers: HashMap<u64, ObserverFn>,
    next_observer: u64,
}

impl ExchangeCore {
    pub fn new() -> Self {
        Self::with_device_id(DeviceId::generate())
    }

    pub fn with_device_id(device_id: DeviceId) -> Self {
        Self {
            device_id,
            session: SenderSession::new(),
            log: Vec::new(),
            status: "Ready".to_string(),
            observers: HashMap::new(),
            next_observer: 0,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn conversation(&self) -> ConversationState {
        self.session.state()
    }

    /// Received records, oldest first.
    pub fn log(&self) -> &[Record] {
        &self.log
    }

    /// Batch retained for retry after a failed dispatch, if any.
    pub fn pending_batch(&self) -> Option<&[Record]> {
        self.session.pending_batch()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            conversation: self.session.state(),
            status: self.status.clone(),
            log: self.log.clone(),
        }
    }

    /// Register an observer called after every visible state change, on
    /// the endpoint's single authoritative context.
    pub fn subscribe<F>(&mut self, observer: F) -> ObserverHandle
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.insert(id, Box::new(observer));
        ObserverHandle(id)
    }

    pub fn unsubscribe(&mut self, handle: ObserverHandle) {
        self.observers.remove(&handle.0);
    }

    /// Stage a batch for dispatch and return the encoded payload. The
    /// caller's copy of the batch is untouched; a clone is retained for
    /// retry until the cycle closes.
    pub fn begin_dispatch(&mut self, batch: &[Record]) -> Result<Vec<u8>, DispatchError> {
        if batch.is_empty() {
            return Err(DispatchError::EmptyBatch);
        }
        let payload = codec::encode_batch(batch)?;
        self.session.begin_dispatch(batch.to_vec());
        self.status = format!("Dispatching {} record(s)", batch.len());
        self.notify();
        Ok(payload)
    }

    /// Stage a reset command (zero-length payload on the reset path).
    pub fn begin_reset(&mut self) {
        self.session.begin_reset();
        self.status = "Dispatching reset".to_string();
        self.notify();
    }

    /// Discovery resolved an empty peer set; nothing was sent.
    pub fn on_no_peers(&mut self) {
        self.status = "No reachable peer".to_string();
        self.notify();
    }

    /// One peer accepted the send call.
    pub fn on_send_success(&mut self, peer: DeviceId) {
        log::debug!("send accepted by {}", peer);
        self.session.on_send_success();
        self.status = "Sent, awaiting confirmation".to_string();
        self.notify();
    }

    /// One peer's send call failed. The conversation reverts so the
    /// staged batch can be retried; other peers' sends are unaffected.
    pub fn on_send_failure(&mut self, peer: DeviceId, reason: &str) {
        log::warn!("send to {} failed: {}", peer, reason);
        self.session.on_send_failure();
        self.status = format!("Send to {} failed: {}", peer, reason);
        self.notify();
    }

    /// User acknowledged a confirmed cycle; back to Idle.
    pub fn acknowledge(&mut self) {
        self.session.acknowledge();
        self.status = "Ready".to_string();
        self.notify();
    }

    /// Demultiplex one inbound message by path and react exactly once.
    /// Unknown paths are ignored; decode anomalies are logged, never
    /// surfaced (the channel is unauthenticated and must tolerate noise).
    pub fn on_message(
        &mut self,
        source: DeviceId,
        path: &str,
        payload: &[u8],
    ) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        match path {
            protocol::DATA_PATH => {
                let records = codec::decode_batch(payload);
                if records.is_empty() {
                    // Fully malformed payload: no ack, state untouched.
                    log::warn!("payload from {} produced no records, ignoring", source);
                    return actions;
                }
                let count = records.len();
                self.log.extend(records);
                log::info!("appended {} record(s) from {}", count, source);
                self.status = format!("Log updated ({} entries)", self.log.len());
                if let Ok(frame) = wire::encode_envelope(protocol::ACK_PATH, Vec::new()) {
                    actions.push(OutboundAction::SendMessage(source, frame));
                }
                self.notify();
            }
            protocol::ACK_PATH => {
                if self.session.on_ack() {
                    log::info!("receipt confirmed by {}", source);
                    self.status = "Peer confirmed receipt".to_string();
                    self.notify();
                } else {
                    log::debug!("duplicate or late ack from {}, ignoring", source);
                }
            }
            protocol::RESET_PATH => {
                // A command, not data: clear unconditionally, then confirm.
                log::info!("reset command from {}", source);
                self.log.clear();
                self.status = "Log reset by peer".to_string();
                if let Ok(frame) =
                    wire::encode_envelope(protocol::CONFIRM_PATH, RESET_OK_TOKEN.to_vec())
                {
                    actions.push(OutboundAction::SendMessage(source, frame));
                }
                self.notify();
            }
            protocol::CONFIRM_PATH => {
                // Token is informational only; never parsed for control.
                let token = String::from_utf8_lossy(payload);
                if self.session.on_ack() {
                    log::info!("reset confirmed by {} ({})", source, token);
                    self.status = format!("Peer confirmed reset ({})", token);
                    self.notify();
                } else {
                    log::debug!("duplicate or late confirm from {}, ignoring", source);
                }
            }
            other => {
                log::debug!("ignoring message from {} on unknown path {:?}", source, other);
            }
        }
        actions
    }

    fn notify(&self) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in self.observers.values() {
            observer(&snapshot);
        }
    }
}

impl Default for ExchangeCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ACK_PATH, CONFIRM_PATH, DATA_PATH, RESET_PATH};
    use crate::wire::decode_frame;
    use crate::Message;
    use std::sync::{Arc, Mutex};

    fn unpack(action: &OutboundAction) -> (DeviceId, String, Vec<u8>) {
        let OutboundAction::SendMessage(to, frame) = action;
        let (msg, _) = decode_frame(frame).unwrap();
        match msg {
            Message::Envelope { path, payload } => (*to, path, payload),
            other => panic!("expected Envelope, got {:?}", other),
        }
    }

    fn sample_batch() -> Vec<Record> {
        vec![Record::new("Push-ups", 3, 15), Record::new("Squats", 4, 20)]
    }

    #[test]
    fn data_message_appends_and_acks() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        let actions = core.on_message(peer, DATA_PATH, b"Push-ups;3;15|Squats;4;20");
        assert_eq!(core.log(), sample_batch().as_slice());
        assert_eq!(actions.len(), 1);
        let (to, path, payload) = unpack(&actions[0]);
        assert_eq!(to, peer);
        assert_eq!(path, ACK_PATH);
        assert!(payload.is_empty());
    }

    #[test]
    fn data_appends_never_replaces() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        core.on_message(peer, DATA_PATH, b"Push-ups;3;15");
        core.on_message(peer, DATA_PATH, b"Push-ups;3;15");
        // Duplicates are kept; the log only ever grows.
        assert_eq!(core.log().len(), 2);
    }

    #[test]
    fn malformed_payload_no_ack_no_append() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        let actions = core.on_message(peer, DATA_PATH, b"garbage-without-fields");
        assert!(actions.is_empty());
        assert!(core.log().is_empty());
    }

    #[test]
    fn partially_corrupt_payload_still_applies() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        let actions = core.on_message(peer, DATA_PATH, b"A;1;2|BAD|B;3;4");
        assert_eq!(core.log().len(), 2);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn unknown_path_is_ignored() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        let actions = core.on_message(peer, "/something-else", b"Push-ups;3;15");
        assert!(actions.is_empty());
        assert!(core.log().is_empty());
        assert_eq!(core.conversation(), ConversationState::Idle);
    }

    #[test]
    fn ack_confirms_and_duplicate_is_noop() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        core.begin_dispatch(&sample_batch()).unwrap();
        core.on_send_success(peer);
        assert_eq!(core.conversation(), ConversationState::AwaitingPeerAck);
        core.on_message(peer, ACK_PATH, b"");
        assert_eq!(core.conversation(), ConversationState::Confirmed);
        core.on_message(peer, ACK_PATH, b"");
        assert_eq!(core.conversation(), ConversationState::Confirmed);
    }

    #[test]
    fn ack_while_idle_is_discarded() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        core.on_message(peer, ACK_PATH, b"");
        assert_eq!(core.conversation(), ConversationState::Idle);
    }

    #[test]
    fn send_failure_reverts_and_keeps_batch() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        let batch = sample_batch();
        core.begin_dispatch(&batch).unwrap();
        core.on_send_success(peer);
        core.on_send_failure(peer, "connection reset");
        assert_eq!(core.conversation(), ConversationState::Idle);
        assert_eq!(core.pending_batch(), Some(batch.as_slice()));
        assert!(core.snapshot().status.contains("failed"));
    }

    #[test]
    fn begin_dispatch_rejects_empty_batch() {
        let mut core = ExchangeCore::new();
        assert!(matches!(
            core.begin_dispatch(&[]),
            Err(DispatchError::EmptyBatch)
        ));
        assert_eq!(core.conversation(), ConversationState::Idle);
    }

    #[test]
    fn begin_dispatch_rejects_separator_name() {
        let mut core = ExchangeCore::new();
        let batch = vec![Record::new("Push|ups", 3, 15)];
        assert!(matches!(
            core.begin_dispatch(&batch),
            Err(DispatchError::Encode(_))
        ));
        assert!(core.pending_batch().is_none());
    }

    #[test]
    fn reset_clears_log_and_confirms_with_token() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        core.on_message(peer, DATA_PATH, b"Push-ups;3;15");
        assert_eq!(core.log().len(), 1);
        let actions = core.on_message(peer, RESET_PATH, b"");
        assert!(core.log().is_empty());
        assert_eq!(actions.len(), 1);
        let (to, path, payload) = unpack(&actions[0]);
        assert_eq!(to, peer);
        assert_eq!(path, CONFIRM_PATH);
        assert_eq!(payload, RESET_OK_TOKEN);
    }

    #[test]
    fn reset_on_empty_log_still_confirms() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        let actions = core.on_message(peer, RESET_PATH, b"");
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn observers_see_log_updates_until_unsubscribed() {
        let mut core = ExchangeCore::new();
        let peer = DeviceId::generate();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = core.subscribe(move |snapshot| {
            sink.lock().unwrap().push(snapshot.log.len());
        });
        core.on_message(peer, DATA_PATH, b"Push-ups;3;15");
        assert_eq!(seen.lock().unwrap().as_slice(), &[1]);
        core.unsubscribe(handle);
        core.on_message(peer, DATA_PATH, b"Squats;4;20");
        assert_eq!(seen.lock().unwrap().as_slice(), &[1]);
    }

    // Full cycle with two cores wired by relaying their action lists, the
    // way the endpoint runtimes do over TCP.
    fn relay(from: &mut ExchangeCore, to: &mut ExchangeCore, actions: Vec<OutboundAction>) {
        let from_id = from.device_id();
        for action in actions {
            let (target, path, payload) = {
                let OutboundAction::SendMessage(target, frame) = &action;
                let (msg, _) = decode_frame(frame).unwrap();
                match msg {
                    Message::Envelope { path, payload } => (*target, path, payload),
                    other => panic!("expected Envelope, got {:?}", other),
                }
            };
            assert_eq!(target, to.device_id());
            let replies = to.on_message(from_id, &path, &payload);
            relay(to, from, replies);
        }
    }

    #[test]
    fn end_to_end_batch_cycle() {
        let mut wrist = ExchangeCore::new();
        let mut handheld = ExchangeCore::new();
        let batch = sample_batch();

        let payload = wrist.begin_dispatch(&batch).unwrap();
        assert_eq!(payload, b"Push-ups;3;15|Squats;4;20");
        wrist.on_send_success(handheld.device_id());

        let actions = handheld.on_message(wrist.device_id(), DATA_PATH, &payload);
        assert_eq!(handheld.log(), batch.as_slice());
        relay(&mut handheld, &mut wrist, actions);

        assert_eq!(wrist.conversation(), ConversationState::Confirmed);
    }

    #[test]
    fn end_to_end_reset_cycle() {
        let mut wrist = ExchangeCore::new();
        let mut handheld = ExchangeCore::new();
        handheld.on_message(wrist.device_id(), DATA_PATH, b"Push-ups;3;15");
        assert_eq!(handheld.log().len(), 1);

        wrist.begin_reset();
        wrist.on_send_success(handheld.device_id());
        let actions = handheld.on_message(wrist.device_id(), RESET_PATH, b"");
        relay(&mut handheld, &mut wrist, actions);

        assert!(handheld.log().is_empty());
        assert_eq!(wrist.conversation(), ConversationState::Confirmed);
        assert!(wrist.snapshot().status.contains("RESET_OK"));
    }
}
