pub mod frame;
pub mod payload;
pub mod reader;
pub mod types;

pub use frame::{Command, Direction, EncodeError, Frame, FrameError};
pub use reader::{frame_stream, FrameAccumulator, FrameEvent};
pub use types::{
    AcState, FanSpeed, HorizontalDirection, InvalidDirection, InvalidModeName, Mode, SleepMode,
    TemperatureOutOfRange, VerticalDirection,
};
