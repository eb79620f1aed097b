extern crate pretty_env_logger;
#[macro_use]
extern crate log;

use color_eyre::eyre::{eyre, Result, WrapErr};
use structopt::StructOpt;
use tcl_ac::climate::{Climate, ClimateConfig, FanMode, Preset};
use tcl_ac::engine::{EngineEvent, LinkState};
use tcl_ac::protocol::{HorizontalDirection, Mode, VerticalDirection};
use tokio::pin;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tokio_serial::SerialPortBuilderExt;
use tokio_stream::StreamExt;

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(StructOpt, Debug)]
enum SetOpt {
    /// Turn the unit on or off
    Power {
        #[structopt(parse(try_from_str))]
        on: bool,
    },
    /// Operating mode (auto, cool, dry, fan, heat)
    Mode { mode: Mode },
    /// Target temperature in °C
    Temperature { celsius: f32 },
    /// Fan mode (auto, low, medium, high)
    Fan { fan: FanMode },
    /// Vertical vane (max_up, up, center, down, max_down, swing)
    Vertical { direction: VerticalDirection },
    /// Horizontal vane (max_left, left, center, right, max_right, swing)
    Horizontal { direction: HorizontalDirection },
    /// Beeper feedback on commands
    Beeper {
        #[structopt(parse(try_from_str))]
        enabled: bool,
    },
    /// Front panel display
    Display {
        #[structopt(parse(try_from_str))]
        enabled: bool,
    },
    /// Preset (none, eco, boost, sleep, comfort)
    Preset { preset: Preset },
}

#[derive(StructOpt, Debug)]
enum CommandOpt {
    /// Print every status update as it arrives
    Watch,
    /// Wait for the first status frame and print the state
    Status,
    /// Send a change request and wait for the acknowledgment
    Set(SetOpt),
}

#[derive(StructOpt, Debug)]
#[structopt(name = "tcl-ac-cli", about = "Control a TCL air conditioner over its UART")]
struct Opt {
    /// Serial device wired to the mainboard connector
    #[structopt(short, long, default_value = "/dev/ttyUSB0")]
    port: String,
    /// Baud rate; the mainboard speaks 9600 8E1
    #[structopt(short, long, default_value = "9600")]
    baud: u32,
    #[structopt(subcommand)]
    command: CommandOpt,
}

async fn wait_ready(climate: &Climate) -> Result<()> {
    let mut link = climate.link_subscribe();
    timeout(SYNC_TIMEOUT, async {
        loop {
            if matches!(
                *link.borrow(),
                LinkState::Ready | LinkState::CommandPending
            ) {
                return;
            }
            if link.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .wrap_err("timed out waiting for the unit to report status")?;
    if !climate.is_available() {
        return Err(eyre!("link came up but the engine stopped"));
    }
    Ok(())
}

/// The receiver must be subscribed before the request is dispatched, or an
/// acknowledgment that lands in between is marked already-seen.
async fn wait_outcome(mut events: watch::Receiver<Option<EngineEvent>>) -> Result<()> {
    timeout(COMMAND_TIMEOUT, events.changed())
        .await
        .wrap_err("no command outcome within the timeout")?
        .map_err(|_| eyre!("engine stopped before the command resolved"))?;
    let event = events.borrow().clone();
    match event {
        Some(EngineEvent::CommandAcknowledged { seq, attribute }) => {
            info!("command {} for {:?} acknowledged", seq, attribute);
            Ok(())
        }
        Some(EngineEvent::CommandTimedOut {
            attribute,
            attempts,
            ..
        }) => Err(eyre!(
            "command for {:?} timed out after {} attempts",
            attribute,
            attempts
        )),
        None => Err(eyre!("engine reported no command outcome")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_setters_parse_from_positional_args() {
        let opt = Opt::from_iter_safe(["tcl-ac-cli", "set", "power", "true"]).unwrap();
        assert!(matches!(
            opt.command,
            CommandOpt::Set(SetOpt::Power { on: true })
        ));
        let opt = Opt::from_iter_safe(["tcl-ac-cli", "set", "display", "false"]).unwrap();
        assert!(matches!(
            opt.command,
            CommandOpt::Set(SetOpt::Display { enabled: false })
        ));
        assert!(Opt::from_iter_safe(["tcl-ac-cli", "set", "beeper", "maybe"]).is_err());
    }

    #[test]
    fn symbolic_setters_parse_through_the_library_types() {
        let opt = Opt::from_iter_safe(["tcl-ac-cli", "set", "mode", "heat"]).unwrap();
        assert!(matches!(
            opt.command,
            CommandOpt::Set(SetOpt::Mode { mode: Mode::Heat })
        ));
        assert!(Opt::from_iter_safe(["tcl-ac-cli", "set", "vertical", "sideways"]).is_err());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pretty_env_logger::init();
    let opt = Opt::from_args();

    let serial = tokio_serial::new(&opt.port, opt.baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::Even)
        .stop_bits(tokio_serial::StopBits::One)
        .open_native_async()
        .wrap_err_with(|| format!("could not open serial port {}", opt.port))?;

    let climate = Climate::start(serial, ClimateConfig::default());

    match opt.command {
        CommandOpt::Watch => {
            let stream = climate.state_stream();
            pin!(stream);
            while let Some(state) = stream.next().await {
                println!("{}", state);
            }
        }
        CommandOpt::Status => {
            wait_ready(&climate).await?;
            println!("{}", climate.state());
        }
        CommandOpt::Set(set) => {
            wait_ready(&climate).await?;
            let events = climate.events();
            match set {
                SetOpt::Power { on } => climate.set_power(on)?,
                SetOpt::Mode { mode } => climate.set_mode(mode)?,
                SetOpt::Temperature { celsius } => climate.set_target_temperature(celsius)?,
                SetOpt::Fan { fan } => climate.set_fan_mode(fan)?,
                SetOpt::Vertical { direction } => climate.set_vertical_direction(direction)?,
                SetOpt::Horizontal { direction } => climate.set_horizontal_direction(direction)?,
                SetOpt::Beeper { enabled } => climate.set_beeper_enabled(enabled)?,
                SetOpt::Display { enabled } => climate.set_display_enabled(enabled)?,
                SetOpt::Preset { preset } => climate.set_preset(preset)?,
            }
            wait_outcome(events).await?;
            println!("{}", climate.state());
        }
    }
    Ok(())
}
