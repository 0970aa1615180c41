//! Heal mode — runs one heal loop per entry kind until Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use cellgrid_core::CellgridConfig;
use cellgrid_heal::HealMonitor;

use crate::bootstrap;

pub async fn run_heal(config: CellgridConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    info!(cell = %config.cell.name, "cellgrid daemon starting in heal mode");

    let state = bootstrap::open_state(&config, &data_dir)?;
    let (messenger, messenger_handle) = bootstrap::logging_messenger();

    let heal = &config.heal;
    if heal.interval_secs == 0 {
        info!("heal interval is 0, healing is disabled");
    }

    let monitor = HealMonitor::new(Duration::from_secs(heal.tick_secs.max(1)));
    for healer in bootstrap::build_healers(&state, messenger, heal) {
        monitor.start_monitor(healer).await;
    }
    info!(
        kinds = monitor.active_monitors().await.len(),
        interval_secs = heal.interval_secs,
        update_number = heal.update_number,
        "heal monitors running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    monitor.stop_all().await;
    messenger_handle.abort();

    info!("cellgrid daemon stopped");
    Ok(())
}
