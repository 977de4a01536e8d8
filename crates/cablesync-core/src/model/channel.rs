// ── Event names and per-device channels ──
//
// The server multiplexes per-device traffic onto names of the form
// `device:<id>:<kind>`. Names are parsed once, on arrival, into a
// `ChannelDescriptor`; nothing downstream re-splits strings.

use std::fmt;

/// Well-known event names.
pub mod events {
    /// Synthetic: the handshake was acknowledged.
    pub const CONNECT: &str = "connect";
    /// Synthetic: an established connection went away.
    pub const DISCONNECT: &str = "disconnect";
    /// Synthetic: a connection attempt failed.
    pub const CONNECT_ERROR: &str = "connect_error";

    /// Inbound: array of device records.
    pub const DEVICE_STATUS_UPDATE: &str = "device_status_update";
    /// Inbound: a single device record.
    pub const DEVICE_STATUS_CHANGED: &str = "device_status_changed";

    /// Outbound: start streaming one device (payload is the id).
    pub const SUBSCRIBE_DEVICE: &str = "subscribe:device";
    /// Outbound: stop streaming one device.
    pub const UNSUBSCRIBE_DEVICE: &str = "unsubscribe:device";
    /// Outbound: start the fleet-wide status feed.
    pub const SUBSCRIBE_DEVICE_UPDATES: &str = "subscribe_device_updates";
    /// Outbound: stop the fleet-wide status feed.
    pub const UNSUBSCRIBE_DEVICE_UPDATES: &str = "unsubscribe_device_updates";
}

/// Resource family a channel belongs to. Only devices exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Resource {
    Device,
}

/// What a per-device channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ChannelKind {
    /// Full status records; these feed the cache.
    Status,
    /// Device-reported errors; listeners only.
    Error,
    /// Activity notices; listeners only.
    Activity,
}

/// A parsed `device:<id>:<kind>` event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelDescriptor {
    pub resource: Resource,
    pub id: String,
    pub kind: ChannelKind,
}

impl ChannelDescriptor {
    pub fn device(id: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            resource: Resource::Device,
            id: id.into(),
            kind,
        }
    }

    /// Parse an event name. Returns `None` for names that are not
    /// per-device channels.
    ///
    /// The id is everything between the resource prefix and the last
    /// `:`, so ids containing colons survive.
    pub fn parse(name: &str) -> Option<Self> {
        let (resource, rest) = name.split_once(':')?;
        let resource = resource.parse::<Resource>().ok()?;
        let (id, kind) = rest.rsplit_once(':')?;
        if id.is_empty() {
            return None;
        }
        Some(Self {
            resource,
            id: id.to_owned(),
            kind: kind.parse().ok()?,
        })
    }

    /// Whether this channel carries status records for the cache.
    pub fn is_status(&self) -> bool {
        self.kind == ChannelKind::Status
    }
}

impl fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.id, self.kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_each_kind() {
        for (name, kind) in [
            ("device:cable-1:status", ChannelKind::Status),
            ("device:cable-1:error", ChannelKind::Error),
            ("device:cable-1:activity", ChannelKind::Activity),
        ] {
            assert_eq!(
                ChannelDescriptor::parse(name).unwrap(),
                ChannelDescriptor::device("cable-1", kind)
            );
        }
    }

    #[test]
    fn id_may_contain_colons() {
        let channel = ChannelDescriptor::parse("device:aa:bb:cc:status").unwrap();
        assert_eq!(channel.id, "aa:bb:cc");
        assert_eq!(channel.to_string(), "device:aa:bb:cc:status");
    }

    #[test]
    fn rejects_non_channel_names() {
        for name in [
            "device_status_update",
            "connect",
            "device::status",
            "device:cable-1:battery",
            "payload:cable-1:status",
            "device:cable-1",
        ] {
            assert!(ChannelDescriptor::parse(name).is_none(), "{name}");
        }
    }
}
