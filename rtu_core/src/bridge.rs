//! Output bridge.
//!
//! Decodes cyclic controller output payloads into bus commands for the
//! actuator manager. One payload per actuator slot:
//!
//! ```text
//! offset  field     meaning
//! 0       command   0x00 off | 0x01 on | 0x02 pwm | other -> off (warning)
//! 1       duty      0..=100, clamped; ignored for off/on
//! 2       reserved  tolerated
//! 3       reserved  tolerated
//! ```
//!
//! The bridge is stateless. Identical frames still reach the manager, which
//! treats an unchanged request as a no-op.

use rtu_common::actuator::{Level, Slot, Subslot};
use rtu_common::consts::MAX_DUTY;
use rtu_common::error::RtuError;
use rtu_common::journal::EventSource;
use static_assertions::const_assert_eq;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::journal::Journal;
use crate::liveness::LivenessMonitor;
use crate::manager::{ActuatorManager, CommandOutcome};

/// Wire length of one output payload.
pub const OUTPUT_PAYLOAD_LEN: usize = 4;

// ─── Wire format ────────────────────────────────────────────────────

/// Raw 4-octet output payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputPayload {
    pub command: u8,
    pub duty: u8,
    pub reserved: [u8; 2],
}

const_assert_eq!(core::mem::size_of::<OutputPayload>(), OUTPUT_PAYLOAD_LEN);

impl OutputPayload {
    pub const CMD_OFF: u8 = 0x00;
    pub const CMD_ON: u8 = 0x01;
    pub const CMD_PWM: u8 = 0x02;

    pub const fn off() -> Self {
        Self::with(Self::CMD_OFF, 0)
    }

    pub const fn on() -> Self {
        Self::with(Self::CMD_ON, 0)
    }

    pub const fn pwm(duty: u8) -> Self {
        Self::with(Self::CMD_PWM, duty)
    }

    const fn with(command: u8, duty: u8) -> Self {
        Self {
            command,
            duty,
            reserved: [0; 2],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        match *bytes {
            [command, duty, r0, r1] => Ok(Self {
                command,
                duty,
                reserved: [r0, r1],
            }),
            _ => Err(FrameError::Length(bytes.len())),
        }
    }

    pub const fn to_bytes(&self) -> [u8; OUTPUT_PAYLOAD_LEN] {
        [self.command, self.duty, self.reserved[0], self.reserved[1]]
    }
}

/// Anomaly found while decoding, journaled by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeNote {
    /// Unrecognized command byte, treated as off.
    UnknownCommand(u8),
    /// PWM duty above 100, clamped.
    DutyClamped(u8),
}

/// Bus command carried by a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub level: Level,
    pub duty: u8,
    pub note: Option<DecodeNote>,
}

/// Map a payload to a level and duty. A `pwm` command at duty 0 is off.
pub fn decode(payload: &OutputPayload) -> Decoded {
    let (level, duty, note) = match payload.command {
        OutputPayload::CMD_OFF => (Level::Off, 0, None),
        OutputPayload::CMD_ON => (Level::On, MAX_DUTY, None),
        OutputPayload::CMD_PWM => {
            let (level, duty) = Level::for_duty(payload.duty);
            let note = (payload.duty > MAX_DUTY).then_some(DecodeNote::DutyClamped(payload.duty));
            (level, duty, note)
        }
        other => (Level::Off, 0, Some(DecodeNote::UnknownCommand(other))),
    };
    Decoded { level, duty, note }
}

/// Frame parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("payload is {0} bytes, expected {OUTPUT_PAYLOAD_LEN}")]
    Length(usize),

    #[error("malformed frame: {0}")]
    Syntax(String),
}

/// Decoded cyclic output addressed to one `(slot, subslot)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    pub slot: Slot,
    pub subslot: Subslot,
    pub payload: OutputPayload,
}

impl OutputFrame {
    pub fn new(slot: Slot, subslot: Subslot, bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            slot,
            subslot,
            payload: OutputPayload::from_bytes(bytes)?,
        })
    }

    /// Parse the text form `<slot> <subslot> <hex payload>`, e.g.
    /// `9 1 02320000`.
    pub fn parse_line(line: &str) -> Result<Self, FrameError> {
        let mut fields = line.split_whitespace();
        let (Some(slot), Some(subslot), Some(hex), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(FrameError::Syntax(format!(
                "expected `<slot> <subslot> <hex>`, got {line:?}"
            )));
        };
        let slot = slot
            .parse()
            .map_err(|e| FrameError::Syntax(format!("slot {slot:?}: {e}")))?;
        let subslot = subslot
            .parse()
            .map_err(|e| FrameError::Syntax(format!("subslot {subslot:?}: {e}")))?;
        if hex.len() % 2 != 0 || !hex.is_ascii() {
            return Err(FrameError::Syntax(format!("payload {hex:?} is not hex")));
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| FrameError::Syntax(format!("payload {hex:?}: {e}")))?;
        Self::new(slot, subslot, &bytes)
    }
}

// ─── Bridge ─────────────────────────────────────────────────────────

/// Routes output frames to the manager's bus sink and feeds the liveness
/// monitor.
pub struct OutputBridge {
    manager: Arc<ActuatorManager>,
    liveness: Arc<LivenessMonitor>,
    journal: Arc<Journal>,
}

impl OutputBridge {
    pub fn new(
        manager: Arc<ActuatorManager>,
        liveness: Arc<LivenessMonitor>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            manager,
            liveness,
            journal,
        }
    }

    /// Handle one received frame.
    pub fn handle_frame(&self, frame: &OutputFrame) -> Result<CommandOutcome, RtuError> {
        self.liveness.frame_received();
        self.dispatch(frame)
    }

    /// Handle all slot payloads of one cycle. The cycle counts as a single
    /// frame for liveness.
    pub fn handle_cycle(
        &self,
        frames: &[OutputFrame],
    ) -> Vec<(Slot, Result<CommandOutcome, RtuError>)> {
        self.liveness.frame_received();
        frames.iter().map(|f| (f.slot, self.dispatch(f))).collect()
    }

    fn dispatch(&self, frame: &OutputFrame) -> Result<CommandOutcome, RtuError> {
        let slot = frame.slot;
        match self.manager.subslot_of(slot) {
            None => {
                debug!(slot, "frame for unadmitted slot");
                return Err(RtuError::UnknownSlot { slot });
            }
            Some(subslot) if subslot != frame.subslot => {
                warn!(
                    slot,
                    expected = subslot,
                    got = frame.subslot,
                    "frame subslot mismatch"
                );
                return Err(RtuError::UnknownSlot { slot });
            }
            Some(_) => {}
        }

        let decoded = decode(&frame.payload);
        match decoded.note {
            Some(DecodeNote::UnknownCommand(cmd)) => self.journal.warning(
                EventSource::Bridge,
                format!("slot {slot}: unknown command 0x{cmd:02x}, treated as off"),
            ),
            Some(DecodeNote::DutyClamped(duty)) => self.journal.info(
                EventSource::Bridge,
                format!("slot {slot}: pwm duty {duty} clamped to {MAX_DUTY}"),
            ),
            None => {}
        }

        let result = self.manager.bus_set(slot, decoded.level, decoded.duty);
        if let Err(e) = &result {
            // Degraded skips are expected on every frame while the link
            // confirms; not journaled.
            debug!(slot, error = %e, "bus command not applied");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_commands() {
        assert_eq!(decode(&OutputPayload::off()).level, Level::Off);
        let on = decode(&OutputPayload::on());
        assert_eq!((on.level, on.duty, on.note), (Level::On, 100, None));
        let pwm = decode(&OutputPayload::pwm(40));
        assert_eq!((pwm.level, pwm.duty), (Level::On, 40));
    }

    #[test]
    fn pwm_duty_is_clamped() {
        let d = decode(&OutputPayload::pwm(180));
        assert_eq!(d.duty, 100);
        assert_eq!(d.note, Some(DecodeNote::DutyClamped(180)));
    }

    #[test]
    fn pwm_at_zero_duty_is_off() {
        let d = decode(&OutputPayload::pwm(0));
        assert_eq!((d.level, d.duty, d.note), (Level::Off, 0, None));
    }

    #[test]
    fn unknown_command_is_off() {
        let d = decode(&OutputPayload::from_bytes(&[0x07, 50, 0, 0]).unwrap());
        assert_eq!((d.level, d.duty), (Level::Off, 0));
        assert_eq!(d.note, Some(DecodeNote::UnknownCommand(0x07)));
    }

    #[test]
    fn reserved_bytes_are_tolerated() {
        let p = OutputPayload::from_bytes(&[0x01, 0, 0xff, 0xee]).unwrap();
        assert_eq!(decode(&p).level, Level::On);
        assert_eq!(p.to_bytes(), [0x01, 0, 0xff, 0xee]);
    }

    #[test]
    fn payload_length_is_checked() {
        assert_eq!(
            OutputPayload::from_bytes(&[1, 2, 3]),
            Err(FrameError::Length(3))
        );
    }

    #[test]
    fn parse_text_frames() {
        let f = OutputFrame::parse_line("9 1 02320000").unwrap();
        assert_eq!((f.slot, f.subslot), (9, 1));
        assert_eq!(f.payload, OutputPayload::pwm(50));

        assert!(matches!(
            OutputFrame::parse_line("9 1"),
            Err(FrameError::Syntax(_))
        ));
        assert!(matches!(
            OutputFrame::parse_line("9 1 0zz00000"),
            Err(FrameError::Syntax(_))
        ));
        assert_eq!(
            OutputFrame::parse_line("9 1 0100"),
            Err(FrameError::Length(2))
        );
    }
}
