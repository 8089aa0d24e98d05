//! # RTU Core Library
//!
//! I/O control plane of a field-bus remote terminal unit. Bridges cyclic
//! controller output frames, local sensor samples and alarm-driven
//! interlocks to physical actuator drivers, and owns the degraded-mode
//! behavior applied when the controller disappears.
//!
//! ## Data flow
//!
//! ```text
//!  output frame ──► OutputBridge ──► ActuatorManager (bus sink) ──► driver
//!        │                                 ▲   ▲
//!        ▼                                 │   │ interlock sink
//!  LivenessMonitor ── degraded-mode sink ──┘   │
//!                                              │
//!  sensor sample ──► SampleBus ──► AlarmEngine ┘
//! ```
//!
//! Every state-changing path also writes to the [`journal::Journal`].
//!
//! ## Modules
//!
//! - [`manager`] - Arbitration, safety envelope, degraded mode
//! - [`bridge`] - Output payload decoding
//! - [`alarm`] - Rule evaluation, hysteresis, interlocks
//! - [`liveness`] - Controller link state machine
//! - [`sample_bus`] - Latest sensor samples
//! - [`journal`] - Event journal
//! - [`persistence`] - Store gateway and JSON store
//! - [`context`] - Assembled control plane and operator commands
//! - [`runtime`] - Tokio tasks

pub mod alarm;
pub mod bridge;
pub mod context;
pub mod journal;
pub mod liveness;
pub mod manager;
pub mod persistence;
pub mod provision;
pub mod runtime;
pub mod sample_bus;

pub use context::RtuContext;
