//! Well-known routing topics and event type tags.
//!
//! Topics are dot-delimited routing keys on the shared topic exchange.
//! Consumers bind on patterns over these strings, never on payload contents.

/// Emitted by the device subsystem when a device changes operational state.
pub const DEVICE_STATUS_CHANGED: &str = "device.status.changed";

/// Emitted periodically (or on simulated activity) by every device.
pub const DEVICE_HEARTBEAT: &str = "device.heartbeat";

/// Emitted by the rule engine after it has raised an alert.
pub const ALERT_TRIGGERED: &str = "monitoring.alert.triggered";

/// Type tag carried next to [`DEVICE_STATUS_CHANGED`].
pub const TYPE_DEVICE_STATUS_CHANGED: &str = "DeviceStatusChanged";

/// Type tag carried next to [`DEVICE_HEARTBEAT`].
pub const TYPE_DEVICE_HEARTBEAT: &str = "DeviceHeartbeat";

/// Type tag carried next to [`ALERT_TRIGGERED`].
pub const TYPE_ALERT_TRIGGERED: &str = "AlertTriggered";
