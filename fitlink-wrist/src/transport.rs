//! Outbound transport: one TCP link per discovered peer, handshake +
//! length-prefixed frames. Every send reports its own outcome so the
//! dispatcher can track peers independently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use fitlink_core::wire::{decode_frame, MAX_FRAME_LEN};
use fitlink_core::{DeviceId, ExchangeCore, Message, OutboundAction, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::discovery::PeerTable;

const HANDSHAKE_SIZE: usize = 1 + 16; // version + device_id
const LEN_SIZE: usize = 4;

struct SendRequest {
    frame: Vec<u8>,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Live links keyed by peer. Cloneable handle shared between the
/// transport tasks and the dispatcher.
#[derive(Clone)]
pub struct PeerLinks {
    inner: Arc<Mutex<HashMap<DeviceId, mpsc::UnboundedSender<SendRequest>>>>,
}

impl PeerLinks {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send one framed message to a peer and wait for the write outcome.
    pub async fn send(&self, peer_id: DeviceId, frame: Vec<u8>) -> std::io::Result<()> {
        let tx = { self.inner.lock().await.get(&peer_id).cloned() };
        let Some(tx) = tx else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "peer not connected",
            ));
        };
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(SendRequest {
            frame,
            done: done_tx,
        })
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "link closed"))?;
        done_rx.await.map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link closed before the send completed",
            )
        })?
    }

    async fn insert(&self, peer_id: DeviceId, tx: mpsc::UnboundedSender<SendRequest>) {
        self.inner.lock().await.insert(peer_id, tx);
    }

    async fn remove(&self, peer_id: DeviceId) {
        self.inner.lock().await.remove(&peer_id);
    }
}

impl Default for PeerLinks {
    fn default() -> Self {
        Self::new()
    }
}

/// Run transport: connect outbound whenever discovery pushes a newly
/// seen peer, then keep the link until either side drops it.
pub async fn run_transport(
    core: Arc<Mutex<ExchangeCore>>,
    links: PeerLinks,
    table: PeerTable,
    my_id: DeviceId,
    mut connect_rx: mpsc::UnboundedReceiver<(DeviceId, SocketAddr)>,
) {
    while let Some((peer_id, addr)) = connect_rx.recv().await {
        let core = core.clone();
        let links = links.clone();
        let table = table.clone();
        tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(mut stream) => match handshake_connect(&mut stream, my_id).await {
                    Ok(confirmed_id) => run_link(stream, confirmed_id, core, links, table).await,
                    Err(e) => {
                        log::warn!("handshake with {} failed: {}", addr, e);
                        table.remove(peer_id).await;
                    }
                },
                Err(e) => {
                    log::warn!("connect to {} failed: {}", addr, e);
                    // Let the next beacon trigger a fresh attempt.
                    table.remove(peer_id).await;
                }
            }
        });
    }
}

async fn handshake_connect(stream: &mut TcpStream, my_id: DeviceId) -> std::io::Result<DeviceId> {
    let (mut r, mut w) = stream.split();
    let out = handshake_bytes(my_id);
    w.write_all(&out).await?;
    w.flush().await?;
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
    Ok(DeviceId::from_bytes(device_id))
}

fn handshake_bytes(my_id: DeviceId) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..17].copy_from_slice(my_id.as_bytes());
    out
}

/// Pump one established link: writer task drains send requests and
/// reports each outcome; the read half feeds inbound envelopes (acks,
/// confirms) into the core and performs any returned actions.
async fn run_link(
    stream: TcpStream,
    peer_id: DeviceId,
    core: Arc<Mutex<ExchangeCore>>,
    links: PeerLinks,
    table: PeerTable,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SendRequest>();
    links.insert(peer_id, tx).await;
    log::info!("link to {} established", peer_id);

    let (mut reader, mut writer) = stream.into_split();
    tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            let result = async {
                writer.write_all(&req.frame).await?;
                writer.flush().await
            }
            .await;
            let failed = result.is_err();
            let _ = req.done.send(result);
            if failed {
                break;
            }
        }
        // Remaining requests fail when their result slots drop.
    });

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
                if let Err(e) = links.send(to, bytes).await {
                    log::warn!("reply to {} failed: {}", to, e);
                }
            }
        }
    }

    links.remove(peer_id).await;
    // Drop the peer from the table too, so its next beacon reconnects.
    table.remove(peer_id).await;
    log::info!("link to {} closed", peer_id);
}
