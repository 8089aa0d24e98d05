//! Output driver implementations.
//!
//! - [`simulation`] - In-memory output lines for development and testing
//! - [`sysfs`] - Linux `/sys/class/gpio` and `/sys/class/pwm` outputs
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `ActuatorDriver` trait from `rtu_common::driver`
//! 3. Register its factory in [`register_all_drivers`]

pub mod simulation;
pub mod sysfs;

use crate::driver_registry::DriverRegistry;

pub use simulation::SimulationBank;

/// Register every built-in backend.
///
/// The simulation backend is bound to `bank` so callers can observe and
/// perturb the simulated lines.
pub fn register_all_drivers(registry: &mut DriverRegistry, bank: SimulationBank) {
    registry.register(simulation::BACKEND_NAME, simulation::factory(bank));
    registry.register(sysfs::BACKEND_NAME, sysfs::factory());
}
