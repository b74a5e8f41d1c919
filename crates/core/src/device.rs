//! Device lifecycle event payloads.
//!
//! Both payloads are produced by the device subsystem and are immutable once
//! published. Field names are camelCase on the wire.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `health_data` key under which heartbeats may carry an ad-hoc event tag.
pub const HEALTH_EVENT_TYPE_KEY: &str = "eventType";

macro_rules! define_open_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        ///
        /// Unrecognised values are kept verbatim in `Other` so that newer
        /// producers never make a payload undecodable.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $( $variant, )+
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $( $name::$variant => stringify!($variant), )+
                    $name::Other(s) => s.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $(
                    if value.eq_ignore_ascii_case(stringify!($variant)) {
                        return $name::$variant;
                    }
                )+
                $name::Other(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                match value {
                    $name::Other(s) => s,
                    known => known.as_str().to_string(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_open_enum! {
    /// Operational state of a device.
    DeviceStatus {
        Active,
        Inactive,
        Maintenance,
        Offline,
        Error,
    }
}

define_open_enum! {
    /// Kind of physical device.
    DeviceType {
        Gate,
        Lift,
        Counter,
        Sensor,
    }
}

impl DeviceStatus {
    /// Case-insensitive comparison against a free-form status name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(name.trim())
    }
}

/// A device transitioned from one operational state to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusEvent {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub old_status: DeviceStatus,
    pub new_status: DeviceStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Periodic liveness report from a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHeartbeatEvent {
    pub device_id: String,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub health_data: HashMap<String, String>,
}

impl DeviceHeartbeatEvent {
    /// The ad-hoc event tag embedded in `health_data`, if any.
    ///
    /// The key is looked up case-insensitively.
    pub fn event_type_tag(&self) -> Option<&str> {
        self.health_data
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(HEALTH_EVENT_TYPE_KEY))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_status_parses_case_insensitively() {
        assert_eq!(DeviceStatus::from("offline"), DeviceStatus::Offline);
        assert_eq!(DeviceStatus::from("ACTIVE"), DeviceStatus::Active);
    }

    #[test]
    fn unknown_status_is_preserved() {
        let status = DeviceStatus::from("Jammed");
        assert_eq!(status, DeviceStatus::Other("Jammed".into()));
        assert_eq!(String::from(status), "Jammed");
    }

    #[test]
    fn status_matches_name_ignores_case_and_whitespace() {
        assert!(DeviceStatus::Offline.matches_name(" OFFLINE "));
        assert!(!DeviceStatus::Offline.matches_name("Active"));
        assert!(DeviceStatus::Other("Jammed".into()).matches_name("jammed"));
    }

    #[test]
    fn status_event_uses_camel_case_fields() {
        let event = DeviceStatusEvent {
            device_id: "GATE-1".into(),
            device_name: "North gate".into(),
            device_type: DeviceType::Gate,
            old_status: DeviceStatus::Active,
            new_status: DeviceStatus::Offline,
            reason: "power loss".into(),
            location: "Lobby".into(),
            metadata: HashMap::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["deviceId"], "GATE-1");
        assert_eq!(json["newStatus"], "Offline");
        assert_eq!(json["deviceType"], "Gate");
    }

    #[test]
    fn status_event_optional_fields_default() {
        let json = r#"{
            "deviceId": "LIFT-2",
            "deviceName": "Lift 2",
            "deviceType": "Lift",
            "oldStatus": "Active",
            "newStatus": "Maintenance"
        }"#;
        let event: DeviceStatusEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.new_status, DeviceStatus::Maintenance);
        assert!(event.reason.is_empty());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn heartbeat_tag_lookup_ignores_key_case() {
        let mut health_data = HashMap::new();
        health_data.insert("EventType".to_string(), "DoorForced".to_string());
        let hb = DeviceHeartbeatEvent {
            device_id: "GATE-1".into(),
            device_type: DeviceType::Gate,
            status: DeviceStatus::Active,
            location: String::new(),
            health_data,
        };
        assert_eq!(hb.event_type_tag(), Some("DoorForced"));
    }

    #[test]
    fn heartbeat_without_tag() {
        let hb = DeviceHeartbeatEvent {
            device_id: "CNT-9".into(),
            device_type: DeviceType::Counter,
            status: DeviceStatus::Active,
            location: String::new(),
            health_data: HashMap::new(),
        };
        assert_eq!(hb.event_type_tag(), None);
    }
}
