//! Linux sysfs output drivers.
//!
//! Binary kinds drive a line of the legacy GPIO interface
//! (`/sys/class/gpio`) through `sysfs_gpio`. The `pwm` kind drives a
//! channel of `/sys/class/pwm/pwmchip0` through `rppal`.
//!
//! The legacy GPIO numbering is global: `gpio_pin` is the global line
//! number and only chip 0 is accepted, so that the pin registry key
//! `(chip, pin)` names exactly one physical line. PWM outputs use
//! `gpio_pin` as the channel (0 or 1).

use rppal::pwm::{self, Channel, Polarity, Pwm};
use rtu_common::actuator::{ActuatorConfig, Level, SafeState};
use rtu_common::consts::MAX_DUTY;
use rtu_common::driver::{ActuatorDriver, DriverError, DriverFactory, DriverFault};
use std::io;
use std::sync::Arc;
use sysfs_gpio::{Direction, Pin};
use tracing::{debug, warn};

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "sysfs";

/// The only chip addressable through the legacy interfaces.
pub const SYSFS_CHIP: u32 = 0;

fn io_fault(err: io::Error, what: &str) -> DriverFault {
    let reason = format!("{what}: {err}");
    match err.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::ResourceBusy => DriverFault::Transient(reason),
        _ => DriverFault::Hard(reason),
    }
}

fn gpio_fault(err: sysfs_gpio::Error, line: u32) -> DriverFault {
    let what = format!("gpio{line}");
    match err {
        sysfs_gpio::Error::Io(e) => io_fault(e, &what),
        other => DriverFault::Hard(format!("{what}: {other}")),
    }
}

fn pwm_fault(err: pwm::Error, channel: u32) -> DriverFault {
    match err {
        pwm::Error::Io(e) => io_fault(e, &format!("pwm{channel}")),
    }
}

fn safe_level(safe_state: SafeState, current: (Level, u8)) -> (Level, u8) {
    match safe_state {
        SafeState::Off => (Level::Off, 0),
        SafeState::On => (Level::On, MAX_DUTY),
        SafeState::Hold => current,
    }
}

fn require_chip_zero(config: &ActuatorConfig) -> Result<(), DriverError> {
    if config.gpio_chip != SYSFS_CHIP {
        return Err(DriverError::Unavailable(format!(
            "slot {}: sysfs backend only addresses chip {SYSFS_CHIP}, got chip {}",
            config.slot, config.gpio_chip
        )));
    }
    Ok(())
}

// ─── GPIO ───────────────────────────────────────────────────────────

/// Binary output on a sysfs GPIO line.
pub struct SysfsGpio {
    pin: Pin,
    line: u32,
    safe_state: SafeState,
    last: (Level, u8),
}

impl SysfsGpio {
    /// Export the line and configure it as a logically-off output.
    /// Active-low lines are inverted by the kernel, so `apply` writes
    /// logical values.
    pub fn open(config: &ActuatorConfig) -> Result<Self, DriverError> {
        require_chip_zero(config)?;
        let line = config.gpio_pin;
        let pin = Pin::new(u64::from(line));
        let unavailable = |step: &str, e: sysfs_gpio::Error| {
            DriverError::Unavailable(format!("gpio{line} {step}: {e}"))
        };

        pin.export().map_err(|e| unavailable("export", e))?;
        let configured = pin
            .set_active_low(config.active_low)
            .and_then(|()| pin.set_direction(Direction::Out));
        if let Err(e) = configured {
            let _ = pin.unexport();
            return Err(unavailable("configure", e));
        }

        debug!(slot = config.slot, line, "sysfs gpio opened");
        Ok(Self {
            pin,
            line,
            safe_state: config.safe_state,
            last: (Level::Off, 0),
        })
    }
}

impl ActuatorDriver for SysfsGpio {
    fn name(&self) -> &'static str {
        "sysfs-gpio"
    }

    fn apply(&mut self, level: Level, _duty: u8) -> Result<(), DriverFault> {
        self.pin
            .set_value(u8::from(level.is_on()))
            .map_err(|e| gpio_fault(e, self.line))?;
        self.last = (level, if level.is_on() { MAX_DUTY } else { 0 });
        Ok(())
    }

    fn read_back(&self) -> (Level, u8) {
        self.last
    }

    fn release(&mut self) -> Result<(), DriverFault> {
        let (level, duty) = safe_level(self.safe_state, self.last);
        self.apply(level, duty)?;
        if let Err(e) = self.pin.unexport() {
            warn!(line = self.line, error = %e, "gpio unexport failed");
        }
        Ok(())
    }
}

// ─── PWM ────────────────────────────────────────────────────────────

/// Variable output on a sysfs PWM channel.
pub struct SysfsPwm {
    pwm: Pwm,
    channel: u32,
    safe_state: SafeState,
    last: (Level, u8),
}

/// Map a channel number onto the channels of `pwmchip0`.
pub fn pwm_channel(index: u32) -> Option<Channel> {
    match index {
        0 => Some(Channel::Pwm0),
        1 => Some(Channel::Pwm1),
        _ => None,
    }
}

/// Duty percentage as the 0.0..=1.0 fraction `rppal` expects.
pub fn duty_fraction(duty: u8) -> f64 {
    f64::from(duty.min(MAX_DUTY)) / f64::from(MAX_DUTY)
}

impl SysfsPwm {
    /// Export the channel, set its frequency and polarity, leave it disabled.
    pub fn open(config: &ActuatorConfig) -> Result<Self, DriverError> {
        require_chip_zero(config)?;
        if config.pwm_frequency_hz == 0 {
            return Err(DriverError::Unavailable(
                "pwm_frequency_hz must be greater than 0".to_string(),
            ));
        }
        let channel = config.gpio_pin;
        let Some(ch) = pwm_channel(channel) else {
            return Err(DriverError::Unavailable(format!(
                "slot {}: pwm channel {channel} does not exist",
                config.slot
            )));
        };
        let polarity = if config.active_low {
            Polarity::Inverse
        } else {
            Polarity::Normal
        };
        let mut pwm = Pwm::with_frequency(
            ch,
            f64::from(config.pwm_frequency_hz),
            0.0,
            polarity,
            false,
        )
        .map_err(|e| DriverError::Unavailable(format!("pwm{channel}: {e}")))?;
        // Released outputs keep their safe level; release() decides.
        pwm.set_reset_on_drop(false);

        debug!(
            slot = config.slot,
            channel,
            frequency_hz = config.pwm_frequency_hz,
            "sysfs pwm opened"
        );
        Ok(Self {
            pwm,
            channel,
            safe_state: config.safe_state,
            last: (Level::Off, 0),
        })
    }
}

impl ActuatorDriver for SysfsPwm {
    fn name(&self) -> &'static str {
        "sysfs-pwm"
    }

    fn apply(&mut self, level: Level, duty: u8) -> Result<(), DriverFault> {
        let duty = if level.is_on() { duty.min(MAX_DUTY) } else { 0 };
        let channel = self.channel;
        self.pwm
            .set_duty_cycle(duty_fraction(duty))
            .map_err(|e| pwm_fault(e, channel))?;
        let toggled = if level.is_on() {
            self.pwm.enable()
        } else {
            self.pwm.disable()
        };
        toggled.map_err(|e| pwm_fault(e, channel))?;
        self.last = (level, duty);
        Ok(())
    }

    fn read_back(&self) -> (Level, u8) {
        self.last
    }

    fn release(&mut self) -> Result<(), DriverFault> {
        let (level, duty) = safe_level(self.safe_state, self.last);
        self.apply(level, duty)?;
        // An off channel is handed back to the kernel on drop.
        self.pwm.set_reset_on_drop(!level.is_on());
        Ok(())
    }
}

/// Factory picking the GPIO or PWM driver from the actuator kind.
pub fn factory() -> DriverFactory {
    Arc::new(|config: &ActuatorConfig| {
        let driver: Box<dyn ActuatorDriver> = if config.kind.uses_pwm_channel() {
            Box::new(SysfsPwm::open(config)?)
        } else {
            Box::new(SysfsGpio::open(config)?)
        };
        Ok(driver)
    })
}
