//! # RTU HAL Library
//!
//! Output driver backends and the hardware ownership bookkeeping the
//! actuator manager relies on at admission time.
//!
//! Drivers implement the `ActuatorDriver` trait defined in
//! `rtu_common::driver`.
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Backend name to driver factory mapping
//! - [`pin_registry`] - Exclusive `(chip, pin)` ownership
//! - [`drivers`] - Driver implementations (simulation, sysfs)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         rtu_hal                                  │
//! │  ┌──────────────┐    ┌──────────────────┐    ┌────────────────┐  │
//! │  │ PinRegistry  │    │ DriverRegistry   │───►│ simulation     │  │
//! │  │ (admission)  │    │ name → factory   │───►│ sysfs gpio/pwm │  │
//! │  └──────────────┘    └────────┬─────────┘    └────────────────┘  │
//! │                               ▼                                  │
//! │                   Box<dyn ActuatorDriver>                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod driver_registry;
pub mod drivers;
pub mod pin_registry;

pub use crate::driver_registry::DriverRegistry;
pub use crate::pin_registry::{PinConflict, PinOwner, PinRegistry};
