// FitLink wrist endpoint: discovery listener, outbound transport, and the
// line-oriented intent loop standing in for the watch face.

mod config;
mod discovery;
mod dispatch;
mod transport;

use std::sync::Arc;

use fitlink_core::{ConversationState, DeviceId, ExchangeCore, Record};
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("fitlink-wrist {}", VERSION);
            return Ok(());
        }
    }
    env_logger::init();

    let cfg = config::load();
    let device_id = DeviceId::generate();
    let core = Arc::new(Mutex::new(ExchangeCore::with_device_id(device_id)));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        {
            // The status line is the whole "UI" of the wrist stand-in.
            let mut c = core.lock().await;
            c.subscribe(|snapshot| println!("[{:?}] {}", snapshot.conversation, snapshot.status));
        }

        let table = discovery::PeerTable::new();
        let links = transport::PeerLinks::new();
        let (connect_tx, connect_rx) = tokio::sync::mpsc::unbounded_channel();

        let disc_table = table.clone();
        let disc_port = cfg.discovery_port;
        tokio::spawn(async move {
            if let Err(e) = discovery::run_discovery(disc_table, device_id, disc_port, connect_tx).await {
                log::error!("discovery stopped: {}", e);
            }
        });
        tokio::spawn(transport::run_transport(
            core.clone(),
            links.clone(),
            table.clone(),
            device_id,
            connect_rx,
        ));
        log::info!("wrist {} listening for beacons on {}", device_id, cfg.discovery_port);

        tokio::select! {
            r = intent_loop(&core, &table, &links) => r,
            r = shutdown_signal() => r.map_err(anyhow::Error::from),
        }
    })
}

/// Read user intents from stdin and forward them into the protocol layer.
async fn intent_loop(
    core: &Arc<Mutex<ExchangeCore>>,
    table: &discovery::PeerTable,
    links: &transport::PeerLinks,
) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut selection: Vec<Record> = Vec::new();
    print_help();

    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("add") => {
                let name = parts.next();
                let sets = parts.next().and_then(|s| s.parse::<u32>().ok());
                let reps = parts.next().and_then(|s| s.parse::<u32>().ok());
                match (name, sets, reps) {
                    (Some(name), Some(sets), Some(reps)) => {
                        selection.push(Record::new(name, sets, reps));
                        println!("selected {} record(s)", selection.len());
                    }
                    _ => println!("usage: add <name> <sets> <reps>"),
                }
            }
            Some("send") => {
                // Prefer the fresh selection; fall back to the batch a
                // failed dispatch left staged for retry.
                let batch = if selection.is_empty() {
                    core.lock().await.pending_batch().map(|b| b.to_vec())
                } else {
                    Some(selection.clone())
                };
                let Some(batch) = batch else {
                    println!("nothing selected; use: add <name> <sets> <reps>");
                    continue;
                };
                match dispatch::send_batch(core, table, links, &batch).await {
                    Ok(report) => {
                        selection.clear();
                        println!(
                            "dispatched to {} peer(s), {} failed",
                            report.delivered.len(),
                            report.failed.len()
                        );
                    }
                    Err(e) => println!("dispatch failed: {}", e),
                }
            }
            Some("reset") => match dispatch::send_reset(core, table, links).await {
                Ok(report) => println!(
                    "reset sent to {} peer(s), {} failed",
                    report.delivered.len(),
                    report.failed.len()
                ),
                Err(e) => println!("reset failed: {}", e),
            },
            Some("done") => {
                let mut c = core.lock().await;
                if c.conversation() == ConversationState::Confirmed {
                    c.acknowledge();
                } else {
                    println!("nothing to acknowledge");
                }
            }
            Some("status") => {
                let c = core.lock().await;
                let snapshot = c.snapshot();
                println!("[{:?}] {}", snapshot.conversation, snapshot.status);
                println!("reachable peers: {}", table.reachable().await.len());
                if let Some(pending) = c.pending_batch() {
                    println!("staged for retry: {} record(s)", pending.len());
                }
            }
            Some("quit") | Some("exit") => break,
            Some(other) => println!("unknown command {:?}", other),
            None => {}
        }
    }
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  add <name> <sets> <reps>  select a record for the next batch");
    println!("  send                      dispatch the selection (or retry the staged batch)");
    println!("  reset                     ask the handheld to clear its log");
    println!("  done                      acknowledge a confirmed cycle");
    println!("  status                    show conversation state and peers");
    println!("  quit                      exit");
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
