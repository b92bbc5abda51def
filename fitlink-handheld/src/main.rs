// FitLink handheld endpoint: beacon announcer, listener transport, and
// the printed workout log standing in for the phone screen.

mod config;
mod discovery;
mod transport;

use std::sync::Arc;

use fitlink_core::{DeviceId, ExchangeCore};
use tokio::sync::Mutex;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("fitlink-handheld {}", VERSION);
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
            // Render state changes the way the phone screen would.
            let mut c = core.lock().await;
            c.subscribe(|snapshot| {
                println!("-- {} --", snapshot.status);
                for (i, record) in snapshot.log.iter().enumerate() {
                    println!(
                        "  {:>2}. {}  sets {}  reps {}",
                        i + 1,
                        record.name,
                        record.sets,
                        record.reps
                    );
                }
            });
        }

        let listener =
            transport::spawn_listener(core.clone(), device_id, cfg.transport_port).await?;
        tokio::spawn(discovery::run_announcer(
            device_id,
            cfg.discovery_port,
            cfg.transport_port,
        ));
        log::info!(
            "handheld {} accepting on {}, beaconing on {}",
            device_id,
            cfg.transport_port,
            cfg.discovery_port
        );

        shutdown_signal().await?;
        // Unconditional deregistration: stop accepting before exit.
        drop(listener);
        Ok(())
    })
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
