//! Listener transport: accept wrist connections, handshake, feed inbound
//! envelopes into the core, and write the returned actions back on the
//! same link.

use std::sync::Arc;

use fitlink_core::wire::{decode_frame, MAX_FRAME_LEN};
use fitlink_core::{DeviceId, ExchangeCore, Message, OutboundAction, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

const HANDSHAKE_SIZE: usize = 1 + 16; // version + device_id
const LEN_SIZE: usize = 4;

/// Scoped handle for the accept loop. Dropping it stops accepting new
/// connections; release is guaranteed even on early-exit paths.
pub struct ListenerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind the listen port and spawn the accept loop. Binding happens here
/// so a port conflict surfaces before the endpoint reports itself ready.
pub async fn spawn_listener(
    core: Arc<Mutex<ExchangeCore>>,
    my_id: DeviceId,
    transport_port: u16,
) -> std::io::Result<ListenerHandle> {
    let listener = TcpListener::bind(("0.0.0.0", transport_port)).await?;
    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    log::debug!("connection from {}", addr);
                    let core = core.clone();
                    tokio::spawn(async move {
                        let mut stream = stream;
                        match handshake_accept(&mut stream, my_id).await {
                            Ok(peer_id) => run_connection(stream, peer_id, core).await,
                            Err(e) => log::warn!("handshake with {} failed: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    log::error!("accept failed: {}", e);
                    break;
                }
            }
        }
    });
    Ok(ListenerHandle { task })
}

async fn handshake_accept(stream: &mut TcpStream, my_id: DeviceId) -> std::io::Result<DeviceId> {
    let (mut r, mut w) = stream.split();
    let mut buf = [0u8; HANDSHAKE_SIZE];
    r.read_exact(&mut buf).await?;
    if buf[0] != PROTOCOL_VERSION {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unsupported protocol version",
        ));
    }
    let mut device_id = [0u8; 16];
    device_id.copy_from_slice(&buf[1..17]);

    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..17].copy_from_slice(my_id.as_bytes());
    w.write_all(&out).await?;
    w.flush().await?;
    Ok(DeviceId::from_bytes(device_id))
}

/// Pump one connection: read framed envelopes, apply them through the
/// core, write the resulting replies (acks, confirmations) straight
/// back. A connection dying mid-exchange just closes the loop; the
/// wrist retries on its side.
async fn run_connection(stream: TcpStream, peer_id: DeviceId, core: Arc<Mutex<ExchangeCore>>) {
    let (mut reader, mut writer) = stream.into_split();
    log::info!("link with {} established", peer_id);
    loop {
        let mut len_buf = [0u8; LEN_SIZE];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN as usize {
            break;
        }
        let mut body = vec![0u8; len];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }
        let mut frame = Vec::with_capacity(LEN_SIZE + len);
        frame.extend_from_slice(&len_buf);
        frame.extend_from_slice(&body);
        let msg = match decode_frame(&frame) {
            Ok((msg, _)) => msg,
            Err(e) => {
                log::warn!("undecodable frame from {}: {}", peer_id, e);
                continue;
            }
        };
        if let Message::Envelope { path, payload } = msg {
            let actions = { core.lock().await.on_message(peer_id, &path, &payload) };
            for action in actions {
                let OutboundAction::SendMessage(to, bytes) = action;
                if to != peer_id {
                    // Replies only ever target the message's source.
                    log::warn!("no route to {}, dropping reply", to);
                    continue;
                }
                let written = async {
                    writer.write_all(&bytes).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    log::warn!("reply to {} failed: {}", peer_id, e);
                    return;
                }
            }
        }
    }
    log::info!("link with {} closed", peer_id);
}
