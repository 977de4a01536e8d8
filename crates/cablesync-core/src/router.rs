// ── Event router ──
//
// Normalizes every inbound wire event into an `InboundEvent` (name,
// payload, parsed channel) and fans it out to registered listeners.
// Each listener call is isolated: an `Err` or a panic is logged and the
// remaining listeners still run.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use cablesync_api::WireEvent;
use serde_json::Value;

use crate::model::{ChannelDescriptor, ChannelKind};

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked on the engine task for each matching event.
pub type Listener = Box<dyn Fn(&InboundEvent) -> Result<(), ListenerError> + Send>;

/// Handle for removing a listener or observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

// ── Inbound events ───────────────────────────────────────────────────

/// An event as seen by listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub name: String,
    pub payload: Value,
    /// Set when `name` is a `device:<id>:<kind>` channel.
    pub channel: Option<ChannelDescriptor>,
}

impl InboundEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        let name = name.into();
        let channel = ChannelDescriptor::parse(&name);
        Self {
            name,
            payload,
            channel,
        }
    }
}

impl From<WireEvent> for InboundEvent {
    fn from(event: WireEvent) -> Self {
        Self::new(event.event, event.data)
    }
}

// ── Filters ──────────────────────────────────────────────────────────

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerFilter {
    /// Every event, including synthetic lifecycle signals.
    Any,
    /// Events with exactly this name.
    Event(String),
    /// Per-device channels. `None` is a wildcard.
    Channel {
        device_id: Option<String>,
        kind: Option<ChannelKind>,
    },
}

impl ListenerFilter {
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event(name.into())
    }

    /// `device:<id>:*`
    pub fn device(device_id: impl Into<String>) -> Self {
        Self::Channel {
            device_id: Some(device_id.into()),
            kind: None,
        }
    }

    /// `device:*:<kind>`
    pub fn kind(kind: ChannelKind) -> Self {
        Self::Channel {
            device_id: None,
            kind: Some(kind),
        }
    }

    /// Parse a textual pattern: `*`, `device:<id|*>:<kind|*>`, or a plain
    /// event name.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return Self::Any;
        }
        let channel = pattern
            .strip_prefix("device:")
            .and_then(|rest| rest.rsplit_once(':'))
            .filter(|(id, _)| !id.is_empty());
        let Some((id, kind)) = channel else {
            return Self::event(pattern);
        };
        let kind = match kind {
            "*" => None,
            other => match other.parse::<ChannelKind>() {
                Ok(kind) => Some(kind),
                Err(_) => return Self::event(pattern),
            },
        };
        Self::Channel {
            device_id: (id != "*").then(|| id.to_owned()),
            kind,
        }
    }

    pub fn matches(&self, event: &InboundEvent) -> bool {
        match self {
            Self::Any => true,
            Self::Event(name) => *name == event.name,
            Self::Channel { device_id, kind } => event.channel.as_ref().is_some_and(|ch| {
                device_id.as_ref().is_none_or(|id| *id == ch.id)
                    && kind.is_none_or(|k| k == ch.kind)
            }),
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────

struct Registration {
    id: ListenerId,
    filter: ListenerFilter,
    listener: Listener,
}

/// Outcome of one dispatch, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Listener table. Lives on the engine task; never shared.
#[derive(Default)]
pub(crate) struct EventRouter {
    listeners: Vec<Registration>,
}

impl EventRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, id: ListenerId, filter: ListenerFilter, listener: Listener) {
        tracing::debug!(listener = id.0, ?filter, "listener registered");
        self.listeners.push(Registration {
            id,
            filter,
            listener,
        });
    }

    /// Returns `false` if the id was unknown.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|r| r.id != id);
        before != self.listeners.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Invoke every matching listener in registration order.
    pub(crate) fn dispatch(&self, event: &InboundEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        for reg in self.listeners.iter().filter(|r| r.filter.matches(event)) {
            report.delivered += 1;
            if let Err(reason) = isolated(|| (reg.listener)(event)) {
                report.failed += 1;
                tracing::warn!(
                    listener = reg.id.0,
                    event = %event.name,
                    %reason,
                    "listener failed"
                );
            }
        }
        tracing::trace!(
            event = %event.name,
            delivered = report.delivered,
            failed = report.failed,
            "dispatched"
        );
        report
    }
}

/// Run a callback, turning both `Err` and panics into a message.
pub(crate) fn isolated<F>(f: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(), ListenerError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn counter(hits: &Arc<AtomicUsize>) -> Listener {
        let hits = Arc::clone(hits);
        Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn patterns_parse_into_filters() {
        assert_eq!(ListenerFilter::parse("*"), ListenerFilter::Any);
        assert_eq!(
            ListenerFilter::parse("device:*:status"),
            ListenerFilter::kind(ChannelKind::Status)
        );
        assert_eq!(
            ListenerFilter::parse("device:cable-1:*"),
            ListenerFilter::device("cable-1")
        );
        assert_eq!(
            ListenerFilter::parse("device_status_update"),
            ListenerFilter::event("device_status_update")
        );
        assert_eq!(
            ListenerFilter::parse("device:cable-1:battery"),
            ListenerFilter::event("device:cable-1:battery")
        );
    }

    #[test]
    fn channel_filters_match_parsed_names() {
        let status = InboundEvent::new("device:cable-1:status", json!({}));
        let error = InboundEvent::new("device:cable-2:error", json!({}));
        let bulk = InboundEvent::new("device_status_update", json!([]));

        let by_kind = ListenerFilter::kind(ChannelKind::Status);
        assert!(by_kind.matches(&status));
        assert!(!by_kind.matches(&error));
        assert!(!by_kind.matches(&bulk));

        let by_device = ListenerFilter::device("cable-2");
        assert!(by_device.matches(&error));
        assert!(!by_device.matches(&status));

        assert!(ListenerFilter::event("device:cable-1:status").matches(&status));
        assert!(ListenerFilter::Any.matches(&bulk));
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new();
        router.add(ListenerId(1), ListenerFilter::Any, Box::new(|_| Err("boom".into())));
        router.add(
            ListenerId(2),
            ListenerFilter::Any,
            Box::new(|_| panic!("listener exploded")),
        );
        router.add(ListenerId(3), ListenerFilter::Any, counter(&hits));

        let event = InboundEvent::new("device_status_changed", json!({}));
        let report = router.dispatch(&event);
        assert_eq!(report, DispatchReport { delivered: 3, failed: 2 });

        // The router is still usable after a panic.
        router.dispatch(&event);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new();
        router.add(ListenerId(7), ListenerFilter::event("connect"), counter(&hits));

        router.dispatch(&InboundEvent::new("connect", Value::Null));
        assert!(router.remove(ListenerId(7)));
        assert!(!router.remove(ListenerId(7)));
        router.dispatch(&InboundEvent::new("connect", Value::Null));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn panic_message_is_captured() {
        let err = isolated(|| panic!("disk on fire")).unwrap_err();
        assert_eq!(err, "panicked: disk on fire");
    }
}
