//! `devices`: one-shot device list from the REST seed endpoint.

use std::sync::Arc;

use tabled::Tabled;

use cablesync_core::{DeviceFilter, DeviceSource, DeviceStatus, RestSeed};

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Errors")]
    errors: String,
}

impl DeviceRow {
    pub fn new(d: &DeviceStatus, color: bool) -> Self {
        Self {
            id: d.device_id.clone(),
            state: output::paint_state(d.status, color),
            last_seen: d.last_seen.format("%Y-%m-%d %H:%M:%S").to_string(),
            battery: d
                .battery_level
                .map_or_else(|| "-".into(), |v| format!("{v:.0}%")),
            signal: d
                .signal_strength
                .map_or_else(|| "-".into(), |v| format!("{v:.0} dBm")),
            errors: d
                .errors
                .as_ref()
                .map_or_else(String::new, |errs| errs.join("; ")),
        }
    }
}

pub async fn handle(
    resolved: Resolved,
    args: &DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let Some(seed) = resolved.engine.seed else {
        return Err(CliError::Validation {
            field: "api_url".into(),
            reason: "no REST endpoint configured; set api_url in the profile or pass --api-url"
                .into(),
        });
    };
    let Some(token) = resolved.engine.token else {
        return Err(CliError::NoCredentials {
            profile: resolved.profile,
        });
    };

    let mut devices: Vec<Arc<DeviceStatus>> = RestSeed::new(seed)
        .fetch(&token)
        .await?
        .into_iter()
        .map(Arc::new)
        .collect();
    devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

    let filter = args.status.map_or(DeviceFilter::All, DeviceFilter::ByState);
    let devices = filter.apply(&devices);

    let color = output::should_color(&global.color);
    let rendered = output::render_list(
        &global.output,
        &devices,
        |d| DeviceRow::new(d, color),
        |d| d.device_id.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
