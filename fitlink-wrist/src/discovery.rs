//! LAN discovery, listener side: receive handheld beacons, maintain the
//! reachable-peer table, hand newly seen peers to the transport.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fitlink_core::wire::decode_frame;
use fitlink_core::{DeviceId, Message, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Multicast group shared with the handheld announcer.
pub const MULTICAST_GROUP: &str = "239.255.77.77";
/// Peer considered unreachable if no beacon for this long.
const PEER_TIMEOUT: Duration = Duration::from_secs(16);
/// How often stale peers are pruned.
const PRUNE_INTERVAL: Duration = Duration::from_secs(4);

struct PeerState {
    addr: SocketAddr,
    last_seen: Instant,
}

/// Reachable peers as discovery currently sees them. The `reachable()`
/// snapshot is the peer resolution step of a dispatch and is only
/// trusted for the duration of that send window.
#[derive(Clone)]
pub struct PeerTable {
    inner: Arc<Mutex<HashMap<DeviceId, PeerState>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn reachable(&self) -> Vec<DeviceId> {
        self.inner.lock().await.keys().copied().collect()
    }

    /// Drop a peer whose link died or whose connect failed, so the next
    /// beacon re-adds it and triggers a fresh connect.
    pub async fn remove(&self, peer_id: DeviceId) {
        self.inner.lock().await.remove(&peer_id);
    }

    /// Record a beacon. Returns true when the peer was not in the table.
    pub(crate) async fn insert(&self, peer_id: DeviceId, addr: SocketAddr) -> bool {
        let mut table = self.inner.lock().await;
        let is_new = !table.contains_key(&peer_id);
        table.insert(
            peer_id,
            PeerState {
                addr,
                last_seen: Instant::now(),
            },
        );
        is_new
    }

    async fn prune(&self) -> Vec<DeviceId> {
        let now = Instant::now();
        let mut table = self.inner.lock().await;
        let stale: Vec<DeviceId> = table
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_seen) >= PEER_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            table.remove(id);
        }
        stale
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Run discovery: receive beacons on the multicast group, update the
/// table, push newly seen peers to the transport for connection.
pub async fn run_discovery(
    table: PeerTable,
    my_id: DeviceId,
    discovery_port: u16,
    connect_tx: mpsc::UnboundedSender<(DeviceId, SocketAddr)>,
) -> std::io::Result<()> {
    let socket = make_multicast_socket(discovery_port).await?;
    let recv_table = table.clone();
    let recv_task =
        tokio::spawn(async move { recv_loop(socket, recv_table, my_id, connect_tx).await });
    let prune_task = tokio::spawn(async move { prune_loop(table).await });
    let _ = tokio::try_join!(recv_task, prune_task);
    Ok(())
}

async fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", discovery_port))?;
    let multicast: std::net::Ipv4Addr =
        MULTICAST_GROUP
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
            })?;
    std_sock.join_multicast_v4(&multicast, &std::net::Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_nonblocking(true)?;
    tokio::net::UdpSocket::from_std(std_sock)
}

async fn recv_loop(
    socket: UdpSocket,
    table: PeerTable,
    my_id: DeviceId,
    connect_tx: mpsc::UnboundedSender<(DeviceId, SocketAddr)>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 2048];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let Ok((msg, _)) = decode_frame(&buf[..n]) else {
                    continue;
                };
                let Message::Beacon {
                    protocol_version,
                    device_id,
                    listen_port,
                } = msg
                else {
                    continue;
                };
                if protocol_version != PROTOCOL_VERSION || device_id == my_id {
                    continue;
                }
                let addr = SocketAddr::new(from.ip(), listen_port);
                if table.insert(device_id, addr).await {
                    log::info!("discovered peer {} at {}", device_id, addr);
                    let _ = connect_tx.send((device_id, addr));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

async fn prune_loop(table: PeerTable) -> std::io::Result<()> {
    loop {
        tokio::time::sleep(PRUNE_INTERVAL).await;
        for peer_id in table.prune().await {
            log::info!("peer {} is no longer reachable", peer_id);
        }
    }
}
