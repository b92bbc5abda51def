//! FitLink wire protocol: message paths, reset token, and message types.

use serde::{Deserialize, Serialize};

use crate::identity::DeviceId;

/// Current protocol version. Used in beacon and handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Path for a batch of workout records (wrist -> handheld).
pub const DATA_PATH: &str = "/workout-entry";
/// Path for the empty-payload receipt acknowledgment (handheld -> wrist).
pub const ACK_PATH: &str = "/workout-validated";
/// Path for the reset command (wrist -> handheld, empty payload).
pub const RESET_PATH: &str = "/reset_counter";
/// Path for the reset confirmation (handheld -> wrist).
pub const CONFIRM_PATH: &str = "/reset_confirm";

/// Fixed token carried by a reset confirmation. Informational only; the
/// receiving side never parses it for control decisions.
pub const RESET_OK_TOKEN: &[u8] = b"RESET_OK";

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Discovery: advertise presence and the TCP port accepting envelopes.
    Beacon {
        protocol_version: u8,
        device_id: DeviceId,
        listen_port: u16,
    },
    /// Path-addressed payload. The path selects the handler on the
    /// receiving endpoint; unknown paths are ignored there.
    Envelope { path: String, payload: Vec<u8> },
}
