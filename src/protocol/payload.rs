//! Byte layout of the set/status payloads.
//!
//! The mainboard echoes the set layout back in short status frames, so the
//! offsets below are shared between the builder and the parser.

use std::convert::TryFrom;

use thiserror::Error;

use crate::protocol::frame::{Command, Direction, EncodeError, Frame};
use crate::protocol::types::{
    raw_to_current, raw_to_target, target_to_raw, AcState, FanSpeed, HorizontalDirection, Mode,
    SleepMode, VerticalDirection,
};

pub const SET_PAYLOAD_LEN: usize = 32;
pub const POLL_PAYLOAD_LEN: usize = 1;

// mode byte flags (payload offset 2)
pub const FLAG_ECO: u8 = 0x80;
pub const FLAG_DISPLAY: u8 = 0x40;
pub const FLAG_BEEPER: u8 = 0x20;
pub const MODE_BITS: u8 = 0x1f;

// fan byte flags (payload offset 3)
pub const FLAG_QUIET: u8 = 0x80;
pub const FLAG_TURBO: u8 = 0x40;
pub const FLAG_HEALTH: u8 = 0x20;
pub const FAN_BITS: u8 = 0x07;

// swing field values within the vane bytes
const VERTICAL_SWING_FULL: u8 = 3;
const HORIZONTAL_SWING_FULL: u8 = 4;

// payload offsets
const OFF_MODE: usize = 2;
const OFF_FAN: usize = 3;
const OFF_ROOM_TEMP: usize = 4;
const OFF_TEMP_UNIT: usize = 7;
const OFF_CONSTANT: usize = 8;
const OFF_SLEEP: usize = 14;
const OFF_TAIL_MARKER: usize = 25;
const OFF_TARGET_TEMP: usize = 26;
const OFF_VERTICAL: usize = 27;
const OFF_HORIZONTAL: usize = 28;

#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum PayloadError {
    #[error("{command:?} payload too short: {len} bytes")]
    TooShort { command: Command, len: usize },
}

/// Fields recovered from a short status frame. Optional fields are ones the
/// wire can leave unreported (zeroed) without invalidating the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    pub power: bool,
    pub mode: Option<Mode>,
    pub beeper: bool,
    pub display: bool,
    pub eco: bool,
    pub turbo: bool,
    pub quiet: bool,
    pub health: bool,
    pub fan: FanSpeed,
    pub sleep: SleepMode,
    pub target_celsius: Option<f32>,
    pub vertical: Option<VerticalDirection>,
    pub horizontal: Option<HorizontalDirection>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TempReport {
    pub current_celsius: f32,
    pub target_celsius: Option<f32>,
}

fn pack_vertical(direction: VerticalDirection) -> u8 {
    match direction {
        // continuous swing keeps the resting position at the default
        VerticalDirection::Swing => {
            u8::from(VerticalDirection::MaxDown) | (VERTICAL_SWING_FULL << 3)
        }
        fixed => u8::from(fixed) & 0x07,
    }
}

fn pack_horizontal(direction: HorizontalDirection) -> u8 {
    match direction {
        HorizontalDirection::Swing => {
            u8::from(HorizontalDirection::MaxRight) | (HORIZONTAL_SWING_FULL << 3)
        }
        fixed => u8::from(fixed) & 0x07,
    }
}

fn unpack_vertical(byte: u8) -> Option<VerticalDirection> {
    if (byte >> 3) & 0x03 != 0 {
        return Some(VerticalDirection::Swing);
    }
    VerticalDirection::try_from(byte & 0x07).ok()
}

fn unpack_horizontal(byte: u8) -> Option<HorizontalDirection> {
    if (byte >> 3) & 0x07 != 0 {
        return Some(HorizontalDirection::Swing);
    }
    HorizontalDirection::try_from(byte & 0x07).ok()
}

/// Build the full-state set frame for the desired state.
pub fn set_frame(state: &AcState) -> Result<Frame, EncodeError> {
    let mut payload = vec![0u8; SET_PAYLOAD_LEN];
    payload[0] = 0x03;
    payload[1] = 0x01;

    if state.power {
        let mut mode_byte = u8::from(state.mode) & MODE_BITS;
        if state.beeper {
            mode_byte |= FLAG_BEEPER;
        }
        if state.display {
            mode_byte |= FLAG_DISPLAY;
        }
        if state.eco {
            mode_byte |= FLAG_ECO;
        }
        payload[OFF_MODE] = mode_byte;

        let mut fan_byte = u8::from(state.fan) & FAN_BITS;
        if state.quiet {
            fan_byte |= FLAG_QUIET;
        } else if state.turbo {
            fan_byte |= FLAG_TURBO;
        }
        if state.health {
            fan_byte |= FLAG_HEALTH;
        }
        payload[OFF_FAN] = fan_byte;
    }

    payload[OFF_ROOM_TEMP] = 0x56;
    payload[OFF_TEMP_UNIT] = 0x00; // celsius
    payload[OFF_CONSTANT] = 0x01;
    payload[OFF_SLEEP] = u8::from(state.sleep);
    payload[OFF_TAIL_MARKER] = 0x20;
    payload[OFF_TARGET_TEMP] = target_to_raw(state.target_celsius)?;
    payload[OFF_VERTICAL] = pack_vertical(state.vertical);
    payload[OFF_HORIZONTAL] = pack_horizontal(state.horizontal);

    Frame::new(Direction::McuToAc, Command::SetParams, payload)
}

/// Status poll frame, sent on the poll interval.
pub fn poll_frame() -> Frame {
    Frame {
        direction: Direction::McuToAc,
        command: Command::Poll,
        payload: vec![0x00; POLL_PAYLOAD_LEN],
    }
}

pub fn parse_status(payload: &[u8]) -> Result<StatusReport, PayloadError> {
    if payload.len() < SET_PAYLOAD_LEN {
        return Err(PayloadError::TooShort {
            command: Command::ShortStatus,
            len: payload.len(),
        });
    }

    let mode_byte = payload[OFF_MODE];
    let fan_byte = payload[OFF_FAN];
    let power = mode_byte != 0x00;
    let target_raw = payload[OFF_TARGET_TEMP];

    Ok(StatusReport {
        power,
        mode: Mode::try_from(mode_byte & MODE_BITS).ok(),
        beeper: mode_byte & FLAG_BEEPER != 0,
        display: mode_byte & FLAG_DISPLAY != 0,
        eco: mode_byte & FLAG_ECO != 0,
        turbo: fan_byte & FLAG_TURBO != 0,
        quiet: fan_byte & FLAG_QUIET != 0,
        health: fan_byte & FLAG_HEALTH != 0,
        fan: FanSpeed::from(fan_byte),
        sleep: SleepMode::from_wire(payload[OFF_SLEEP]),
        target_celsius: (target_raw > 0).then(|| raw_to_target(target_raw)),
        vertical: unpack_vertical(payload[OFF_VERTICAL]),
        horizontal: unpack_horizontal(payload[OFF_HORIZONTAL]),
    })
}

pub fn parse_temp_response(payload: &[u8]) -> Result<TempReport, PayloadError> {
    if payload.len() < 4 {
        return Err(PayloadError::TooShort {
            command: Command::TempResponse,
            len: payload.len(),
        });
    }
    let target_raw = payload[2];
    Ok(TempReport {
        current_celsius: raw_to_current(payload[0]),
        target_celsius: (target_raw > 0).then(|| raw_to_target(target_raw)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered_state() -> AcState {
        AcState {
            power: true,
            mode: Mode::Cool,
            target_celsius: 24.0,
            fan: FanSpeed::Medium,
            vertical: VerticalDirection::Center,
            horizontal: HorizontalDirection::Left,
            display: true,
            ..AcState::default()
        }
    }

    #[test]
    fn set_frame_round_trips_through_status_parse() {
        let state = powered_state();
        let frame = set_frame(&state).unwrap();
        let report = parse_status(&frame.payload).unwrap();
        assert!(report.power);
        assert_eq!(report.mode, Some(Mode::Cool));
        assert_eq!(report.fan, FanSpeed::Medium);
        assert!(report.beeper);
        assert!(report.display);
        assert!(!report.eco);
        assert_eq!(report.target_celsius, Some(24.0));
        assert_eq!(report.vertical, Some(VerticalDirection::Center));
        assert_eq!(report.horizontal, Some(HorizontalDirection::Left));
    }

    #[test]
    fn power_off_zeroes_the_mode_byte() {
        let state = AcState {
            power: false,
            ..powered_state()
        };
        let frame = set_frame(&state).unwrap();
        assert_eq!(frame.payload[OFF_MODE], 0x00);
        assert_eq!(frame.payload[OFF_FAN], 0x00);
        assert!(!parse_status(&frame.payload).unwrap().power);
    }

    #[test]
    fn swing_packs_the_swing_bits() {
        let state = AcState {
            vertical: VerticalDirection::Swing,
            horizontal: HorizontalDirection::Swing,
            ..powered_state()
        };
        let frame = set_frame(&state).unwrap();
        assert_eq!(
            frame.payload[OFF_VERTICAL],
            u8::from(VerticalDirection::MaxDown) | (VERTICAL_SWING_FULL << 3)
        );
        assert_eq!(
            frame.payload[OFF_HORIZONTAL],
            u8::from(HorizontalDirection::MaxRight) | (HORIZONTAL_SWING_FULL << 3)
        );
        let report = parse_status(&frame.payload).unwrap();
        assert_eq!(report.vertical, Some(VerticalDirection::Swing));
        assert_eq!(report.horizontal, Some(HorizontalDirection::Swing));
    }

    #[test]
    fn out_of_range_target_fails_encoding() {
        let state = AcState {
            target_celsius: 40.0,
            ..powered_state()
        };
        assert!(matches!(
            set_frame(&state),
            Err(EncodeError::Temperature(_))
        ));
    }

    #[test]
    fn status_vane_zero_means_unreported() {
        let mut payload = set_frame(&powered_state()).unwrap().payload;
        payload[OFF_VERTICAL] = 0;
        payload[OFF_HORIZONTAL] = 0;
        let report = parse_status(&payload).unwrap();
        assert_eq!(report.vertical, None);
        assert_eq!(report.horizontal, None);
    }

    #[test]
    fn short_status_payload_is_rejected() {
        assert_eq!(
            parse_status(&[0u8; 8]),
            Err(PayloadError::TooShort {
                command: Command::ShortStatus,
                len: 8
            })
        );
    }

    #[test]
    fn temp_response_offsets() {
        let report = parse_temp_response(&[29, 0x00, 34, 0x00]).unwrap();
        assert_eq!(report.current_celsius, 22.0);
        assert_eq!(report.target_celsius, Some(22.0));
        assert!(parse_temp_response(&[29]).is_err());
    }
}
