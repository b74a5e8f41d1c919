//! Row models.
//!
//! Rows mirror table columns one-to-one (lookup columns as raw SMALLINT ids)
//! and convert into the typed `fleet_core` entities.

pub mod alert;
pub mod monitoring_rule;
