//! Dispatch controller: send a staged batch (or a reset command) to
//! every reachable peer, tracking each peer's outcome independently.

use std::sync::Arc;

use fitlink_core::wire;
use fitlink_core::{DeviceId, DispatchError, ExchangeCore, Record, DATA_PATH, RESET_PATH};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::discovery::PeerTable;
use crate::transport::PeerLinks;

/// Outcome of one dispatch round, in completion order.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: Vec<DeviceId>,
    pub failed: Vec<(DeviceId, String)>,
}

/// Send one batch to every reachable peer. The caller keeps its copy of
/// the batch; on any error nothing has been sent and the conversation
/// state is unchanged.
pub async fn send_batch(
    core: &Arc<Mutex<ExchangeCore>>,
    table: &PeerTable,
    links: &PeerLinks,
    batch: &[Record],
) -> Result<DispatchReport, DispatchError> {
    let reachable = table.reachable().await;
    if reachable.is_empty() {
        core.lock().await.on_no_peers();
        return Err(DispatchError::NoPeerReachable);
    }
    let payload = { core.lock().await.begin_dispatch(batch)? };
    dispatch_payload(core, links, reachable, DATA_PATH, payload).await
}

/// Reset variant: identical shape, zero-length payload on the reset path.
pub async fn send_reset(
    core: &Arc<Mutex<ExchangeCore>>,
    table: &PeerTable,
    links: &PeerLinks,
) -> Result<DispatchReport, DispatchError> {
    let reachable = table.reachable().await;
    if reachable.is_empty() {
        core.lock().await.on_no_peers();
        return Err(DispatchError::NoPeerReachable);
    }
    core.lock().await.begin_reset();
    dispatch_payload(core, links, reachable, RESET_PATH, Vec::new()).await
}

async fn dispatch_payload(
    core: &Arc<Mutex<ExchangeCore>>,
    links: &PeerLinks,
    reachable: Vec<DeviceId>,
    path: &str,
    payload: Vec<u8>,
) -> Result<DispatchReport, DispatchError> {
    // Encode once; every peer gets the same bytes.
    let frame = wire::encode_envelope(path, payload)?;
    let mut sends = JoinSet::new();
    for peer_id in reachable {
        let links = links.clone();
        let frame = frame.clone();
        sends.spawn(async move { (peer_id, links.send(peer_id, frame).await) });
    }
    // Collect every outcome; one failure never cancels the rest, and
    // there is no automatic retry.
    let mut report = DispatchReport::default();
    while let Some(joined) = sends.join_next().await {
        let Ok((peer_id, result)) = joined else {
            continue;
        };
        match result {
            Ok(()) => {
                core.lock().await.on_send_success(peer_id);
                report.delivered.push(peer_id);
            }
            Err(e) => {
                let reason = e.to_string();
                core.lock().await.on_send_failure(peer_id, &reason);
                report.failed.push((peer_id, reason));
            }
        }
    }
    Ok(report)
}
