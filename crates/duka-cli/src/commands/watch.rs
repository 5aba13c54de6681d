use std::sync::Arc;

use crate::commands::common::{connect, format_status_lines, GlobalArgs};
use crate::error::CliError;

/// Run auto-sync with a reachability probe until Ctrl-C.
pub async fn run_watch(globals: &GlobalArgs) -> Result<(), CliError> {
    let (client, config) = connect(globals).await?;
    let coordinator = client.coordinator().clone();

    let probe = (!globals.offline).then(|| {
        client
            .network()
            .spawn_probe(Arc::clone(client.engine().remote()), config.probe_interval())
    });
    coordinator.start_auto_sync();
    if let Some(result) = coordinator.on_foreground().await {
        tracing::info!(synced = result.synced, failed = result.failed, "Initial sync pass");
    }

    let mut status_rx = coordinator.subscribe();
    let mut last_state = None;
    println!(
        "Watching {} (interval {}s), Ctrl-C to stop",
        config.api_base_url.as_deref().unwrap_or_default(),
        config.sync_interval_secs
    );

    loop {
        let status = status_rx.borrow_and_update().clone();
        if last_state != Some(status.state()) {
            last_state = Some(status.state());
            println!("---");
            for line in format_status_lines(&status) {
                println!("{line}");
            }
        }

        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    coordinator.stop_auto_sync();
    if let Some(probe) = probe {
        probe.abort();
    }
    println!("Stopped; {} change(s) still queued", client.store().pending_count());
    Ok(())
}
