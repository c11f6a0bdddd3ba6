//! Alert commands: `fl check`, `fl watch` and `fl snooze`.

use std::fmt::Write;

use anyhow::{Context, Result};
use fl_client::BackendClient;
use fl_core::{Alert, AlertMonitor, ItemId, TickReport};
use serde::Serialize;
use tracing::{info, warn};

use crate::Config;
use crate::commands::backend_client;

fn monitor(config: &Config) -> Result<AlertMonitor<BackendClient>> {
    let client = backend_client(config)?;
    Ok(AlertMonitor::new(client, config.monitor_config()?))
}

/// Formats one tick's outcome for the terminal.
pub fn format_tick(report: &TickReport) -> String {
    let mut output = String::new();

    if report.fired.is_empty() {
        writeln!(
            output,
            "No items due soon ({} checked).",
            report.evaluated
        )
        .unwrap();
    } else {
        for alert in &report.fired {
            writeln!(output, "{alert}").unwrap();
        }
    }

    if !report.errors.is_empty() {
        writeln!(output).unwrap();
        writeln!(output, "Skipped {} item(s):", report.errors.len()).unwrap();
        for error in &report.errors {
            writeln!(output, "  {error}").unwrap();
        }
    }

    output
}

/// JSON shape of a single check.
#[derive(Debug, Serialize)]
pub struct JsonCheck<'a> {
    pub evaluated: usize,
    pub alerts: &'a [Alert],
    pub errors: Vec<String>,
}

/// Formats one tick's outcome as JSON.
pub fn format_tick_json(report: &TickReport) -> Result<String> {
    let check = JsonCheck {
        evaluated: report.evaluated,
        alerts: &report.fired,
        errors: report.errors.iter().map(ToString::to_string).collect(),
    };
    Ok(serde_json::to_string_pretty(&check)?)
}

/// Runs a single alert check.
pub async fn check(config: &Config, json: bool) -> Result<()> {
    let monitor = monitor(config)?;
    let report = monitor.trigger_check().await?;

    if json {
        println!("{}", format_tick_json(&report)?);
    } else {
        print!("{}", format_tick(&report));
    }
    Ok(())
}

/// Polls until Ctrl-C, printing alerts as they fire.
pub async fn watch(config: &Config) -> Result<()> {
    let monitor = monitor(config)?;
    monitor.subscribe(|alert: &Alert| println!("{alert}"));
    monitor.start();
    info!(
        backend = %config.backend_url,
        poll_interval_secs = config.poll_interval_secs,
        lead_time_minutes = config.lead_time_minutes,
        "watching for due items"
    );

    let signal = tokio::signal::ctrl_c().await;
    monitor.stop().await;
    signal.context("failed to listen for Ctrl-C")?;
    Ok(())
}

/// Pushes a todo's due date back by `minutes`.
pub async fn snooze(config: &Config, id: &str, minutes: i64) -> Result<()> {
    let item_id = ItemId::new(id)?;
    let monitor = monitor(config)?;

    // Load the current due date before moving it.
    let report = monitor.trigger_check().await?;
    if report.errors.iter().any(|e| e.item_id() == Some(&item_id)) {
        warn!(%item_id, "item has feed errors");
    }

    let due_at = monitor.snooze(&item_id, minutes).await?;
    println!(
        "Snoozed {item_id} by {minutes} minute(s); now due {}",
        due_at.to_rfc3339()
    );
    Ok(())
}
