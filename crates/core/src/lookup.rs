//! Closed enums mapping to SMALLINT lookup columns.
//!
//! Each variant's discriminant matches the seed data order (1-based) in the
//! corresponding lookup table. On the wire the variant name is used
//! (`"StatusEquals"`, `"Critical"`, ...); in the database the id.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lookup ID type matching SMALLINT in the database.
pub type LookupId = i16;

macro_rules! define_lookup_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($label:literal) {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant in discriminant order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the database lookup ID.
            pub fn id(self) -> LookupId {
                self as LookupId
            }

            /// Canonical variant name, as used on the wire.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant) ),+
                }
            }
        }

        impl From<$name> for LookupId {
            fn from(value: $name) -> Self {
                value as LookupId
            }
        }

        impl TryFrom<LookupId> for $name {
            type Error = CoreError;

            fn try_from(id: LookupId) -> Result<Self, CoreError> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.id() == id)
                    .ok_or_else(|| CoreError::UnknownLookup {
                        lookup: $label,
                        value: id.to_string(),
                    })
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            /// Parse a variant name, ignoring ASCII case.
            fn from_str(s: &str) -> Result<Self, CoreError> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| CoreError::UnknownLookup {
                        lookup: $label,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_lookup_enum! {
    /// How a monitoring rule's `condition_value` is interpreted.
    ConditionType ("condition type") {
        StatusEquals = 1,
        OfflineForDuration = 2,
        EventTypeMatches = 3,
        CustomExpression = 4,
    }
}

define_lookup_enum! {
    /// What a matched rule asks for in addition to the alert record.
    ActionType ("action type") {
        CreateAlert = 1,
        SendNotification = 2,
        ExecuteCustomAction = 3,
    }
}

define_lookup_enum! {
    /// Alert severity, ordered from least to most severe.
    AlertSeverity ("alert severity") {
        Info = 1,
        Warning = 2,
        Error = 3,
        Critical = 4,
    }
}

define_lookup_enum! {
    /// Alert lifecycle status. Transitions only move forward.
    AlertStatus ("alert status") {
        Active = 1,
        Acknowledged = 2,
        Resolved = 3,
    }
}
