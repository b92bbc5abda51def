//! FitLink sync protocol reference implementation.
//! Host-driven: no I/O; endpoints pass events in and perform the
//! returned actions.

pub mod codec;
pub mod endpoint;
pub mod identity;
pub mod protocol;
pub mod record;
pub mod session;
pub mod wire;

pub use codec::{decode_batch, encode_batch, EncodeError};
pub use endpoint::{DispatchError, ExchangeCore, ObserverHandle, OutboundAction, Snapshot};
pub use identity::DeviceId;
pub use protocol::{
    Message, ACK_PATH, CONFIRM_PATH, DATA_PATH, PROTOCOL_VERSION, RESET_OK_TOKEN, RESET_PATH,
};
pub use record::Record;
pub use session::{ConversationState, SenderSession};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
