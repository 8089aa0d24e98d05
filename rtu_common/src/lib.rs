//! RTU Common Library
//!
//! Shared domain types, configuration loading and the actuator driver
//! contract for all RTU workspace crates.
//!
//! # Module Structure
//!
//! - [`actuator`] - Actuator configuration, kinds, levels, persisted state
//! - [`alarm`] - Alarm rules, interlock specs, occurrences
//! - [`clock`] - Monotonic / wall-clock time sources
//! - [`config`] - Configuration loading traits and `RtuConfig`
//! - [`consts`] - System-wide limits and defaults
//! - [`driver`] - `ActuatorDriver` trait and driver errors
//! - [`error`] - Error kinds surfaced by the control plane
//! - [`journal`] - Journal entry types
//! - [`link`] - Controller link state
//! - [`sensor`] - Sensor samples and descriptors
//! - [`prelude`] - Common re-exports for convenience

pub mod actuator;
pub mod alarm;
pub mod clock;
pub mod config;
pub mod consts;
pub mod driver;
pub mod error;
pub mod journal;
pub mod link;
pub mod prelude;
pub mod sensor;
