//! Projection of the engine's state into the host-facing climate surface.
//!
//! Setters translate symbolic values into engine command requests; read
//! accessors return the last confirmed snapshot and are eventually consistent
//! with respect to in-flight commands.

use std::convert::TryFrom;
use std::str::FromStr;

use async_stream::stream;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_stream::Stream;

use crate::engine::{Ac, AcError, EngineEvent, Intent, LinkState, Tunables};
use crate::protocol::types::{
    target_to_raw, AcState, FanSpeed, HorizontalDirection, InvalidDirection, Mode, SleepMode,
    TemperatureOutOfRange, VerticalDirection, MAX_TARGET_CELSIUS, MIN_TARGET_CELSIUS,
};

lazy_static! {
    static ref SUPPORTED_MODES: Vec<Mode> = Mode::iter().collect();
    static ref SUPPORTED_FAN_MODES: Vec<FanMode> = FanMode::iter().collect();
    static ref SUPPORTED_PRESETS: Vec<Preset> = Preset::iter().collect();
}

/// Host-facing fan setting; coarser than the eight wire speeds.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, EnumIter)]
pub enum FanMode {
    Auto,
    Low,
    Medium,
    High,
}

impl FanMode {
    pub fn speed(self) -> FanSpeed {
        match self {
            FanMode::Auto => FanSpeed::Auto,
            FanMode::Low => FanSpeed::Low,
            FanMode::Medium => FanSpeed::Medium,
            FanMode::High => FanSpeed::Max,
        }
    }

    pub fn nearest(speed: FanSpeed) -> FanMode {
        match speed {
            FanSpeed::Auto => FanMode::Auto,
            FanSpeed::Low | FanSpeed::MediumLow => FanMode::Low,
            FanSpeed::Medium | FanSpeed::MediumHigh => FanMode::Medium,
            FanSpeed::High | FanSpeed::VeryHigh | FanSpeed::Max => FanMode::High,
        }
    }
}

#[derive(Error, Clone, Debug)]
#[error("unknown fan mode: {0}")]
pub struct InvalidFanMode(String);

impl FromStr for FanMode {
    type Err = InvalidFanMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(FanMode::Auto),
            "low" => Ok(FanMode::Low),
            "medium" => Ok(FanMode::Medium),
            "high" => Ok(FanMode::High),
            _ => Err(InvalidFanMode(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, EnumIter)]
pub enum Preset {
    None,
    Eco,
    Boost,
    Sleep,
    Comfort,
}

impl Preset {
    pub fn of(state: &AcState) -> Preset {
        if state.eco {
            Preset::Eco
        } else if state.turbo {
            Preset::Boost
        } else if state.quiet {
            Preset::Comfort
        } else if state.sleep != SleepMode::Off {
            Preset::Sleep
        } else {
            Preset::None
        }
    }
}

#[derive(Error, Clone, Debug)]
#[error("unknown preset: {0}")]
pub struct InvalidPreset(String);

impl FromStr for Preset {
    type Err = InvalidPreset;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Preset::None),
            "eco" => Ok(Preset::Eco),
            "boost" | "turbo" => Ok(Preset::Boost),
            "sleep" => Ok(Preset::Sleep),
            "comfort" | "quiet" => Ok(Preset::Comfort),
            _ => Err(InvalidPreset(s.to_string())),
        }
    }
}

/// Validated configuration surface, defaults per the component schema.
#[derive(Clone, Debug)]
pub struct ClimateConfig {
    pub beeper: bool,
    pub display: bool,
    pub vertical_direction: VerticalDirection,
    pub horizontal_direction: HorizontalDirection,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        ClimateConfig {
            beeper: true,
            display: false,
            vertical_direction: VerticalDirection::MaxDown,
            horizontal_direction: HorizontalDirection::MaxRight,
        }
    }
}

impl ClimateConfig {
    pub fn initial_state(&self) -> AcState {
        AcState {
            beeper: self.beeper,
            display: self.display,
            vertical: self.vertical_direction,
            horizontal: self.horizontal_direction,
            ..AcState::default()
        }
    }
}

/// Capability listing for the host's climate abstraction.
#[derive(Clone, Copy, Debug)]
pub struct ClimateTraits {
    pub supported_modes: &'static [Mode],
    pub supported_fan_modes: &'static [FanMode],
    pub supported_presets: &'static [Preset],
    pub min_target_celsius: f32,
    pub max_target_celsius: f32,
    pub target_step_celsius: f32,
}

pub fn traits() -> ClimateTraits {
    ClimateTraits {
        supported_modes: &SUPPORTED_MODES,
        supported_fan_modes: &SUPPORTED_FAN_MODES,
        supported_presets: &SUPPORTED_PRESETS,
        min_target_celsius: MIN_TARGET_CELSIUS,
        max_target_celsius: MAX_TARGET_CELSIUS,
        target_step_celsius: 1.0,
    }
}

#[derive(Error, Clone, Debug)]
pub enum ClimateError {
    #[error(transparent)]
    Direction(#[from] InvalidDirection),
    #[error(transparent)]
    Temperature(#[from] TemperatureOutOfRange),
    #[error(transparent)]
    Engine(#[from] AcError),
}

pub type Result<T> = std::result::Result<T, ClimateError>;

#[derive(Debug)]
pub struct Climate {
    ac: Ac,
}

impl Climate {
    pub fn start<T>(transport: T, config: ClimateConfig) -> Climate
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::start_with_tunables(transport, config, Tunables::default())
    }

    pub fn start_with_tunables<T>(
        transport: T,
        config: ClimateConfig,
        tunables: Tunables,
    ) -> Climate
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Climate {
            ac: Ac::start(transport, config.initial_state(), tunables),
        }
    }

    // --- change requests ---

    pub fn set_power(&self, on: bool) -> Result<()> {
        Ok(self.ac.request(Intent::Power(on))?)
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        Ok(self.ac.request(Intent::Mode(mode))?)
    }

    pub fn set_target_temperature(&self, celsius: f32) -> Result<()> {
        target_to_raw(celsius)?;
        Ok(self.ac.request(Intent::TargetTemperature(celsius))?)
    }

    pub fn set_fan_mode(&self, fan: FanMode) -> Result<()> {
        Ok(self.ac.request(Intent::Fan(fan.speed()))?)
    }

    pub fn set_beeper_enabled(&self, enabled: bool) -> Result<()> {
        Ok(self.ac.request(Intent::Beeper(enabled))?)
    }

    pub fn set_display_enabled(&self, enabled: bool) -> Result<()> {
        Ok(self.ac.request(Intent::Display(enabled))?)
    }

    pub fn set_vertical_direction(&self, direction: VerticalDirection) -> Result<()> {
        Ok(self.ac.request(Intent::VerticalVane(direction))?)
    }

    /// Raw code entry point for hosts that hand through the configured byte
    /// (1-5, or 255 for swing). Out-of-domain codes are rejected here even
    /// though upstream validation should already have caught them.
    pub fn set_vertical_direction_code(&self, code: u8) -> Result<()> {
        self.set_vertical_direction(VerticalDirection::try_from(code)?)
    }

    pub fn set_horizontal_direction(&self, direction: HorizontalDirection) -> Result<()> {
        Ok(self.ac.request(Intent::HorizontalVane(direction))?)
    }

    pub fn set_horizontal_direction_code(&self, code: u8) -> Result<()> {
        self.set_horizontal_direction(HorizontalDirection::try_from(code)?)
    }

    pub fn set_preset(&self, preset: Preset) -> Result<()> {
        self.ac.request(Intent::Eco(preset == Preset::Eco))?;
        self.ac.request(Intent::Turbo(preset == Preset::Boost))?;
        self.ac.request(Intent::Quiet(preset == Preset::Comfort))?;
        self.ac.request(Intent::Sleep(if preset == Preset::Sleep {
            SleepMode::Mode1
        } else {
            SleepMode::Off
        }))?;
        if preset == Preset::Eco {
            // eco only runs in auto mode
            self.ac.request(Intent::Mode(Mode::Auto))?;
        }
        Ok(())
    }

    pub fn poll_now(&self) -> Result<()> {
        Ok(self.ac.poll_now()?)
    }

    pub async fn stop(&mut self) -> Result<()> {
        Ok(self.ac.stop().await?)
    }

    // --- read accessors ---

    pub fn state(&self) -> AcState {
        self.ac.state()
    }

    pub fn mode(&self) -> Option<Mode> {
        let state = self.ac.state();
        state.power.then(|| state.mode)
    }

    pub fn target_temperature(&self) -> f32 {
        self.ac.state().target_celsius
    }

    pub fn current_temperature(&self) -> Option<f32> {
        self.ac.state().current_celsius
    }

    pub fn fan_mode(&self) -> FanMode {
        FanMode::nearest(self.ac.state().fan)
    }

    pub fn vertical_direction(&self) -> VerticalDirection {
        self.ac.state().vertical
    }

    pub fn horizontal_direction(&self) -> HorizontalDirection {
        self.ac.state().horizontal
    }

    pub fn beeper_enabled(&self) -> bool {
        self.ac.state().beeper
    }

    pub fn display_enabled(&self) -> bool {
        self.ac.state().display
    }

    pub fn preset(&self) -> Preset {
        Preset::of(&self.ac.state())
    }

    pub fn link_state(&self) -> LinkState {
        self.ac.link_state()
    }

    /// The unit is reachable; a `Disconnected` link means accessors serve
    /// stale-but-valid state until the link recovers.
    pub fn is_available(&self) -> bool {
        matches!(
            self.ac.link_state(),
            LinkState::Ready | LinkState::CommandPending
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<AcState> {
        self.ac.subscribe()
    }

    pub fn link_subscribe(&self) -> watch::Receiver<LinkState> {
        self.ac.link_subscribe()
    }

    pub fn events(&self) -> watch::Receiver<Option<EngineEvent>> {
        self.ac.events()
    }

    pub fn state_stream(&self) -> impl Stream<Item = AcState> {
        let mut receiver = self.ac.subscribe();
        stream! {
            loop {
                if receiver.changed().await.is_err() {
                    break;
                }
                let state = receiver.borrow().clone();
                yield state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LinkState;
    use crate::protocol::frame::{Command, Direction, Frame};
    use tokio::io::AsyncWriteExt;
    use tokio::time::Duration;

    fn test_tunables() -> Tunables {
        Tunables {
            poll_interval: Duration::from_secs(3600),
            ..Tunables::default()
        }
    }

    #[test]
    fn config_defaults_match_schema() {
        let config = ClimateConfig::default();
        assert!(config.beeper);
        assert!(!config.display);
        assert_eq!(config.vertical_direction, VerticalDirection::MaxDown);
        assert_eq!(config.horizontal_direction, HorizontalDirection::MaxRight);

        let initial = config.initial_state();
        assert!(initial.beeper);
        assert!(!initial.display);
        assert_eq!(initial.vertical, VerticalDirection::MaxDown);
        assert_eq!(initial.horizontal, HorizontalDirection::MaxRight);
    }

    #[test]
    fn fan_mode_mapping_is_stable() {
        for mode in FanMode::iter() {
            assert_eq!(FanMode::nearest(mode.speed()), mode);
        }
        assert_eq!(FanMode::nearest(FanSpeed::VeryHigh), FanMode::High);
    }

    #[test]
    fn fan_mode_and_preset_names_parse() {
        assert_eq!("medium".parse::<FanMode>().unwrap(), FanMode::Medium);
        assert!("gale".parse::<FanMode>().is_err());
        assert_eq!("turbo".parse::<Preset>().unwrap(), Preset::Boost);
        assert!("party".parse::<Preset>().is_err());
    }

    #[test]
    fn preset_derivation_prefers_explicit_flags() {
        let mut state = AcState::default();
        assert_eq!(Preset::of(&state), Preset::None);
        state.sleep = SleepMode::Mode2;
        assert_eq!(Preset::of(&state), Preset::Sleep);
        state.quiet = true;
        assert_eq!(Preset::of(&state), Preset::Comfort);
        state.eco = true;
        assert_eq!(Preset::of(&state), Preset::Eco);
    }

    #[test]
    fn traits_list_the_configured_capabilities() {
        let traits = traits();
        assert_eq!(traits.supported_modes.len(), 5);
        assert_eq!(traits.supported_fan_modes.len(), 4);
        assert_eq!(traits.min_target_celsius, 16.0);
        assert_eq!(traits.max_target_celsius, 32.0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_direction_codes_are_rejected_at_the_boundary() {
        let (transport, _mainboard) = tokio::io::duplex(4096);
        let climate = Climate::start_with_tunables(
            transport,
            ClimateConfig::default(),
            test_tunables(),
        );
        assert!(matches!(
            climate.set_vertical_direction_code(7),
            Err(ClimateError::Direction(InvalidDirection::Code(7)))
        ));
        assert!(matches!(
            climate.set_horizontal_direction_code(0),
            Err(ClimateError::Direction(InvalidDirection::Code(0)))
        ));
        // 255 is the swing sentinel and is valid
        assert!(climate.set_vertical_direction_code(255).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_temperature_is_rejected_before_transmission() {
        let (transport, _mainboard) = tokio::io::duplex(4096);
        let climate = Climate::start_with_tunables(
            transport,
            ClimateConfig::default(),
            test_tunables(),
        );
        assert!(matches!(
            climate.set_target_temperature(50.0),
            Err(ClimateError::Temperature(_))
        ));
        assert!(climate.set_target_temperature(22.0).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn accessors_reflect_confirmed_status() {
        let (transport, mut mainboard) = tokio::io::duplex(4096);
        let climate = Climate::start_with_tunables(
            transport,
            ClimateConfig::default(),
            test_tunables(),
        );
        let mut link = climate.ac.link_subscribe();

        let mut payload = vec![0u8; 32];
        payload[2] = u8::from(Mode::Heat) | crate::protocol::payload::FLAG_BEEPER;
        payload[3] = u8::from(FanSpeed::Medium);
        payload[26] = 38; // 26°C
        payload[27] = u8::from(VerticalDirection::Center);
        let frame = Frame::new(Direction::AcToMcu, Command::ShortStatus, payload).unwrap();
        mainboard.write_all(&frame.encode()).await.unwrap();

        loop {
            if *link.borrow() == LinkState::Ready {
                break;
            }
            link.changed().await.unwrap();
        }

        assert!(climate.is_available());
        assert_eq!(climate.mode(), Some(Mode::Heat));
        assert_eq!(climate.target_temperature(), 26.0);
        assert_eq!(climate.fan_mode(), FanMode::Medium);
        assert_eq!(climate.vertical_direction(), VerticalDirection::Center);
        assert!(climate.beeper_enabled());
    }
}
