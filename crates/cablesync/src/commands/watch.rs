//! `watch`: stream batched status changes until Ctrl-C.

use std::collections::HashSet;

use cablesync_core::{ConnectionState, DeviceFilter, ListenerFilter, SyncEngine, events};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::devices::DeviceRow;

const SUBSCRIBER: &str = "cablesync-cli";

pub async fn handle(
    resolved: Resolved,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let url = resolved.engine.endpoint.to_string();
    let engine = SyncEngine::with_websocket(resolved.engine);

    if args.devices.is_empty() {
        engine.subscribe_all(SUBSCRIBER)?;
    } else {
        for device_id in &args.devices {
            engine.subscribe(device_id.as_str(), SUBSCRIBER)?;
        }
    }
    engine.on(ListenerFilter::event(events::CONNECT_ERROR), |event| {
        tracing::warn!(payload = %event.payload, "server rejected handshake");
        Ok(())
    })?;

    let filter = build_filter(args);
    let color = output::should_color(&global.color);
    let mut stream = engine.devices();
    let mut states = engine.connection_state();

    engine.connect()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0usize;
    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),

            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = states.borrow_and_update().clone();
                if !global.quiet {
                    eprintln!("connection: {state}");
                }
                if let ConnectionState::Failed(reason) = state {
                    break Err(CliError::from_give_up(reason, &url, &resolved.profile));
                }
            }

            snapshot = stream.changed() => {
                let Some(snapshot) = snapshot else { break Ok(()) };
                let devices = filter.apply(&snapshot);
                match output::render_list(
                    &global.output,
                    &devices,
                    |d| DeviceRow::new(d, color),
                    |d| d.device_id.clone(),
                ) {
                    Ok(rendered) => output::print_output(&rendered, global.quiet),
                    Err(err) => break Err(err),
                }

                printed += 1;
                if args.count.is_some_and(|limit| printed >= limit) {
                    break Ok(());
                }
            }
        }
    };

    engine.shutdown().await;
    result
}

fn build_filter(args: &WatchArgs) -> DeviceFilter {
    match (args.status, args.devices.is_empty()) {
        (Some(state), _) => DeviceFilter::ByState(state),
        (None, false) => DeviceFilter::ById(args.devices.iter().cloned().collect::<HashSet<_>>()),
        (None, true) => DeviceFilter::All,
    }
}

#[cfg(test)]
mod tests {
    use cablesync_core::{DeviceState, DeviceStatus};
    use chrono::Utc;

    use super::*;

    fn args(devices: &[&str], status: Option<DeviceState>) -> WatchArgs {
        WatchArgs {
            devices: devices.iter().map(|d| (*d).to_string()).collect(),
            status,
            count: None,
        }
    }

    #[test]
    fn device_flags_narrow_the_view() {
        let filter = build_filter(&args(&["cable-1"], None));
        assert!(filter.matches(&DeviceStatus::new("cable-1", DeviceState::Online, Utc::now())));
        assert!(!filter.matches(&DeviceStatus::new("cable-2", DeviceState::Online, Utc::now())));
    }

    #[test]
    fn status_flag_wins_over_device_list() {
        let filter = build_filter(&args(&["cable-1"], Some(DeviceState::Error)));
        assert!(!filter.matches(&DeviceStatus::new("cable-1", DeviceState::Online, Utc::now())));
        assert!(filter.matches(&DeviceStatus::new("cable-9", DeviceState::Error, Utc::now())));
    }
}
