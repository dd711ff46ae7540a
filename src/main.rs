use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use spectro_ble::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=spectro_ble=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let client = ClientConfig {
        name_prefix: "WP-".into(),
        scan_timeout_secs: 15,
        connect_timeout_secs: 10,
    };
    let integration_time_ms: u64 = 400;

    // ── Connect ───────────────────────────────────────────────────────────────
    let (peripheral, name) = find_spectrometer(&client).await?;
    let transport = BleTransport::connect(peripheral, name, &client).await?;
    let (session, mut events) = Session::start(Arc::new(transport), SessionConfig::default()).await?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SpectrometerEvent::AcquisitionStatus(s) => info!("[ACQUIRE] {}", s.describe()),
                SpectrometerEvent::Phase(p) => info!("[PHASE] {p:?}"),
                SpectrometerEvent::LaserState(l) => info!(
                    "[LASER] enable={} firing={} interlock={}",
                    l.enable,
                    l.firing(),
                    if l.interlock_closed() { "closed" } else { "open" }
                ),
                SpectrometerEvent::Battery(b) => info!(
                    "[BATTERY] {}%{}",
                    b.percentage,
                    if b.charging { " (charging)" } else { "" }
                ),
                SpectrometerEvent::OrphanResponse { seq } => warn!("late response seq={seq}"),
                SpectrometerEvent::Disconnected => {
                    info!("Disconnected from device.");
                    break;
                }
            }
        }
    });

    // ── Identify ──────────────────────────────────────────────────────────────
    let summary = session
        .eeprom_summary()
        .await
        .context("reading the configuration EEPROM")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match session.read(Attribute::FirmwareVersion).await {
        Ok(v) => info!("Firmware version: {v}"),
        Err(e) => warn!("Firmware version unavailable: {e}"),
    }

    // ── Acquire ───────────────────────────────────────────────────────────────
    session
        .write_verified(Attribute::IntegrationTimeMs, integration_time_ms)
        .await
        .context("setting the integration time")?;

    let spectrum = session.acquire(AcquisitionMode::Plain).await?;
    let wavelengths = summary.wavelengths();
    match spectrum.peak() {
        Some((px, counts)) => {
            let nm = wavelengths.get(px).copied().unwrap_or(f64::NAN);
            println!(
                "Spectrum: {} px, peak {counts} counts at pixel {px} ({nm:.2} nm)",
                spectrum.len()
            );
        }
        None => println!("Spectrum: empty"),
    }

    if session.orphaned_responses() > 0 {
        warn!("{} late response(s) during this run", session.orphaned_responses());
    }

    session.disconnect().await?;
    Ok(())
}
