use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use strum_macros::EnumIter;
use thiserror::Error;

/// Supported target temperature range reported by the unit's own panel.
pub const MIN_TARGET_CELSIUS: f32 = 16.0;
pub const MAX_TARGET_CELSIUS: f32 = 32.0;

/// Wire code for continuous louver swing at the configuration boundary.
pub const SWING_CODE: u8 = 255;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, EnumIter)]
pub enum Mode {
    Auto,
    Cool,
    Dry,
    Fan,
    Heat,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Auto
    }
}

impl From<Mode> for u8 {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Auto => 0x04,
            Mode::Cool => 0x05,
            Mode::Dry => 0x06,
            Mode::Fan => 0x07,
            Mode::Heat => 0x08,
        }
    }
}

#[derive(Error, Clone, Debug, Eq, PartialEq)]
#[error("unknown mode code 0x{0:02x}")]
pub struct UnknownMode(pub u8);

#[derive(Error, Clone, Debug, Eq, PartialEq)]
#[error("unknown mode name: {0}")]
pub struct InvalidModeName(pub String);

impl TryFrom<u8> for Mode {
    type Error = UnknownMode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x04 => Ok(Mode::Auto),
            0x05 => Ok(Mode::Cool),
            0x06 => Ok(Mode::Dry),
            0x07 => Ok(Mode::Fan),
            0x08 => Ok(Mode::Heat),
            _ => Err(UnknownMode(code)),
        }
    }
}

impl FromStr for Mode {
    type Err = InvalidModeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Mode::Auto),
            "cool" => Ok(Mode::Cool),
            "dry" => Ok(Mode::Dry),
            "fan" | "fan_only" => Ok(Mode::Fan),
            "heat" => Ok(Mode::Heat),
            _ => Err(InvalidModeName(s.to_string())),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Auto => "auto",
            Mode::Cool => "cool",
            Mode::Dry => "dry",
            Mode::Fan => "fan",
            Mode::Heat => "heat",
        };
        write!(f, "{}", name)
    }
}

/// Raw fan speed as carried in bits 0-2 of the fan byte.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, EnumIter)]
pub enum FanSpeed {
    Auto,
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
    VeryHigh,
    Max,
}

impl Default for FanSpeed {
    fn default() -> Self {
        FanSpeed::Low
    }
}

impl From<FanSpeed> for u8 {
    fn from(f: FanSpeed) -> Self {
        match f {
            FanSpeed::Auto => 0,
            FanSpeed::Low => 1,
            FanSpeed::MediumLow => 2,
            FanSpeed::Medium => 3,
            FanSpeed::MediumHigh => 4,
            FanSpeed::High => 5,
            FanSpeed::VeryHigh => 6,
            FanSpeed::Max => 7,
        }
    }
}

impl From<u8> for FanSpeed {
    fn from(code: u8) -> Self {
        match code & 0x07 {
            0 => FanSpeed::Auto,
            1 => FanSpeed::Low,
            2 => FanSpeed::MediumLow,
            3 => FanSpeed::Medium,
            4 => FanSpeed::MediumHigh,
            5 => FanSpeed::High,
            6 => FanSpeed::VeryHigh,
            _ => FanSpeed::Max,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SleepMode {
    Off,
    Mode1,
    Mode2,
}

impl Default for SleepMode {
    fn default() -> Self {
        SleepMode::Off
    }
}

impl From<SleepMode> for u8 {
    fn from(s: SleepMode) -> Self {
        match s {
            SleepMode::Off => 0,
            SleepMode::Mode1 => 1,
            SleepMode::Mode2 => 2,
        }
    }
}

impl SleepMode {
    /// Unknown codes fall back to off rather than poisoning a whole status frame.
    pub fn from_wire(code: u8) -> SleepMode {
        match code {
            1 => SleepMode::Mode1,
            2 => SleepMode::Mode2,
            _ => SleepMode::Off,
        }
    }
}

#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum InvalidDirection {
    #[error("unknown vane direction name: {0}")]
    Name(String),
    #[error("vane direction code out of range: {0}")]
    Code(u8),
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, EnumIter)]
pub enum VerticalDirection {
    MaxUp,
    Up,
    Center,
    Down,
    MaxDown,
    Swing,
}

impl Default for VerticalDirection {
    fn default() -> Self {
        VerticalDirection::MaxDown
    }
}

impl From<VerticalDirection> for u8 {
    fn from(d: VerticalDirection) -> Self {
        match d {
            VerticalDirection::MaxUp => 1,
            VerticalDirection::Up => 2,
            VerticalDirection::Center => 3,
            VerticalDirection::Down => 4,
            VerticalDirection::MaxDown => 5,
            VerticalDirection::Swing => SWING_CODE,
        }
    }
}

impl TryFrom<u8> for VerticalDirection {
    type Error = InvalidDirection;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(VerticalDirection::MaxUp),
            2 => Ok(VerticalDirection::Up),
            3 => Ok(VerticalDirection::Center),
            4 => Ok(VerticalDirection::Down),
            5 => Ok(VerticalDirection::MaxDown),
            SWING_CODE => Ok(VerticalDirection::Swing),
            _ => Err(InvalidDirection::Code(code)),
        }
    }
}

impl FromStr for VerticalDirection {
    type Err = InvalidDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max_up" => Ok(VerticalDirection::MaxUp),
            "up" => Ok(VerticalDirection::Up),
            "center" => Ok(VerticalDirection::Center),
            "down" => Ok(VerticalDirection::Down),
            "max_down" => Ok(VerticalDirection::MaxDown),
            "swing" => Ok(VerticalDirection::Swing),
            _ => Err(InvalidDirection::Name(s.to_string())),
        }
    }
}

impl Display for VerticalDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VerticalDirection::MaxUp => "max_up",
            VerticalDirection::Up => "up",
            VerticalDirection::Center => "center",
            VerticalDirection::Down => "down",
            VerticalDirection::MaxDown => "max_down",
            VerticalDirection::Swing => "swing",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, EnumIter)]
pub enum HorizontalDirection {
    MaxLeft,
    Left,
    Center,
    Right,
    MaxRight,
    Swing,
}

impl Default for HorizontalDirection {
    fn default() -> Self {
        HorizontalDirection::MaxRight
    }
}

impl From<HorizontalDirection> for u8 {
    fn from(d: HorizontalDirection) -> Self {
        match d {
            HorizontalDirection::MaxLeft => 1,
            HorizontalDirection::Left => 2,
            HorizontalDirection::Center => 3,
            HorizontalDirection::Right => 4,
            HorizontalDirection::MaxRight => 5,
            HorizontalDirection::Swing => SWING_CODE,
        }
    }
}

impl TryFrom<u8> for HorizontalDirection {
    type Error = InvalidDirection;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(HorizontalDirection::MaxLeft),
            2 => Ok(HorizontalDirection::Left),
            3 => Ok(HorizontalDirection::Center),
            4 => Ok(HorizontalDirection::Right),
            5 => Ok(HorizontalDirection::MaxRight),
            SWING_CODE => Ok(HorizontalDirection::Swing),
            _ => Err(InvalidDirection::Code(code)),
        }
    }
}

impl FromStr for HorizontalDirection {
    type Err = InvalidDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max_left" => Ok(HorizontalDirection::MaxLeft),
            "left" => Ok(HorizontalDirection::Left),
            "center" => Ok(HorizontalDirection::Center),
            "right" => Ok(HorizontalDirection::Right),
            "max_right" => Ok(HorizontalDirection::MaxRight),
            "swing" => Ok(HorizontalDirection::Swing),
            _ => Err(InvalidDirection::Name(s.to_string())),
        }
    }
}

impl Display for HorizontalDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HorizontalDirection::MaxLeft => "max_left",
            HorizontalDirection::Left => "left",
            HorizontalDirection::Center => "center",
            HorizontalDirection::Right => "right",
            HorizontalDirection::MaxRight => "max_right",
            HorizontalDirection::Swing => "swing",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Clone, Debug, PartialEq)]
#[error("target temperature {0}°C outside supported range {MIN_TARGET_CELSIUS}-{MAX_TARGET_CELSIUS}°C")]
pub struct TemperatureOutOfRange(pub f32);

/// Target temperature to the raw wire byte (celsius + 12, rounded).
pub fn target_to_raw(celsius: f32) -> Result<u8, TemperatureOutOfRange> {
    if !(MIN_TARGET_CELSIUS..=MAX_TARGET_CELSIUS).contains(&celsius) {
        return Err(TemperatureOutOfRange(celsius));
    }
    Ok((celsius + 12.5) as u8)
}

pub fn raw_to_target(raw: u8) -> f32 {
    raw as f32 - 12.0
}

/// Current-temperature bytes in temp responses use a different offset than targets.
pub fn raw_to_current(raw: u8) -> f32 {
    raw as f32 - 7.0
}

/// Last confirmed state of the unit, as seen over the serial link.
#[derive(Clone, Debug, PartialEq)]
pub struct AcState {
    pub power: bool,
    pub mode: Mode,
    pub target_celsius: f32,
    pub current_celsius: Option<f32>,
    pub fan: FanSpeed,
    pub vertical: VerticalDirection,
    pub horizontal: HorizontalDirection,
    pub beeper: bool,
    pub display: bool,
    pub eco: bool,
    pub turbo: bool,
    pub quiet: bool,
    pub health: bool,
    pub sleep: SleepMode,
}

impl Default for AcState {
    fn default() -> Self {
        AcState {
            power: false,
            mode: Mode::default(),
            target_celsius: 22.0,
            current_celsius: None,
            fan: FanSpeed::default(),
            vertical: VerticalDirection::default(),
            horizontal: HorizontalDirection::default(),
            beeper: true,
            display: false,
            eco: false,
            turbo: false,
            quiet: false,
            health: false,
            sleep: SleepMode::default(),
        }
    }
}

impl Display for AcState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ power: {}, mode: {}, target: {}°C",
            if self.power { "on" } else { "off" },
            self.mode,
            self.target_celsius
        )?;
        if let Some(current) = self.current_celsius {
            write!(f, ", current: {}°C", current)?;
        }
        write!(
            f,
            ", fan: {:?}, vertical: {}, horizontal: {}, beeper: {}, display: {} }}",
            self.fan, self.vertical, self.horizontal, self.beeper, self.display
        )
    }
}
