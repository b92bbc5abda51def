//! LAN discovery, announcer side: multicast a periodic beacon carrying
//! the TCP listen port so the wrist can find us.

use std::net::SocketAddr;
use std::time::Duration;

use fitlink_core::wire::encode_frame;
use fitlink_core::{DeviceId, Message, PROTOCOL_VERSION};
use tokio::net::UdpSocket;

/// Multicast group shared with the wrist listener.
pub const MULTICAST_GROUP: &str = "239.255.77.77";
/// Beacon interval.
const BEACON_INTERVAL: Duration = Duration::from_secs(4);

/// Announce presence forever. Send errors are logged and retried on the
/// next interval; a quiet network is not fatal.
pub async fn run_announcer(
    device_id: DeviceId,
    discovery_port: u16,
    transport_port: u16,
) -> std::io::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_multicast_ttl_v4(1)?;
    let beacon = Message::Beacon {
        protocol_version: PROTOCOL_VERSION,
        device_id,
        listen_port: transport_port,
    };
    let frame = encode_frame(&beacon)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let dest: SocketAddr = format!("{}:{}", MULTICAST_GROUP, discovery_port)
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;
    loop {
        if let Err(e) = socket.send_to(&frame, dest).await {
            log::warn!("beacon send failed: {}", e);
        }
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}
