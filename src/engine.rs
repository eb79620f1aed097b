//! Per-device protocol engine.
//!
//! Owns the serial transport exclusively, keeps the last confirmed state of
//! the unit, and serializes command transmission so at most one command is in
//! flight at a time (the link is half duplex).

use std::collections::VecDeque;
use std::future::pending;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{spawn, JoinHandle};
use tokio::time::{interval, sleep_until, Duration, Instant};
use tokio_stream::StreamExt;

use crate::protocol::frame::{hex_dump, Command, Direction, Frame};
use crate::protocol::payload::{parse_status, parse_temp_response, poll_frame, set_frame, StatusReport};
use crate::protocol::reader::{frame_stream, FrameEvent};
use crate::protocol::types::{
    AcState, FanSpeed, HorizontalDirection, Mode, SleepMode, VerticalDirection,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_BUDGET: u8 = 3;
pub const DEFAULT_CORRUPTION_THRESHOLD: u32 = 8;

#[derive(Clone, Debug)]
pub struct Tunables {
    pub poll_interval: Duration,
    pub response_timeout: Duration,
    pub retry_budget: u8,
    pub corruption_threshold: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
            corruption_threshold: DEFAULT_CORRUPTION_THRESHOLD,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkState {
    Uninitialized,
    Syncing,
    Ready,
    CommandPending,
    Disconnected,
}

/// Logical attribute a command mutates. A newer request for the same
/// attribute replaces a queued one instead of lining up behind it.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Attribute {
    Power,
    Mode,
    TargetTemperature,
    FanSpeed,
    VerticalVane,
    HorizontalVane,
    Beeper,
    Display,
    Eco,
    Turbo,
    Quiet,
    Health,
    Sleep,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Intent {
    Power(bool),
    Mode(Mode),
    TargetTemperature(f32),
    Fan(FanSpeed),
    VerticalVane(VerticalDirection),
    HorizontalVane(HorizontalDirection),
    Beeper(bool),
    Display(bool),
    Eco(bool),
    Turbo(bool),
    Quiet(bool),
    Health(bool),
    Sleep(SleepMode),
}

impl Intent {
    pub fn attribute(&self) -> Attribute {
        match self {
            Intent::Power(_) => Attribute::Power,
            Intent::Mode(_) => Attribute::Mode,
            Intent::TargetTemperature(_) => Attribute::TargetTemperature,
            Intent::Fan(_) => Attribute::FanSpeed,
            Intent::VerticalVane(_) => Attribute::VerticalVane,
            Intent::HorizontalVane(_) => Attribute::HorizontalVane,
            Intent::Beeper(_) => Attribute::Beeper,
            Intent::Display(_) => Attribute::Display,
            Intent::Eco(_) => Attribute::Eco,
            Intent::Turbo(_) => Attribute::Turbo,
            Intent::Quiet(_) => Attribute::Quiet,
            Intent::Health(_) => Attribute::Health,
            Intent::Sleep(_) => Attribute::Sleep,
        }
    }

    fn apply(&self, state: &mut AcState) {
        match *self {
            Intent::Power(on) => state.power = on,
            Intent::Mode(mode) => {
                state.mode = mode;
                state.power = true;
            }
            Intent::TargetTemperature(celsius) => state.target_celsius = celsius,
            Intent::Fan(fan) => state.fan = fan,
            Intent::VerticalVane(direction) => state.vertical = direction,
            Intent::HorizontalVane(direction) => state.horizontal = direction,
            Intent::Beeper(enabled) => state.beeper = enabled,
            Intent::Display(enabled) => state.display = enabled,
            Intent::Eco(enabled) => state.eco = enabled,
            Intent::Turbo(enabled) => state.turbo = enabled,
            Intent::Quiet(enabled) => state.quiet = enabled,
            Intent::Health(enabled) => state.health = enabled,
            Intent::Sleep(mode) => state.sleep = mode,
        }
    }

    /// Whether an unsolicited status frame already reflects this request.
    fn satisfied_by(&self, report: &StatusReport) -> bool {
        match *self {
            Intent::Power(on) => report.power == on,
            Intent::Mode(mode) => report.mode == Some(mode),
            Intent::TargetTemperature(celsius) => report
                .target_celsius
                .map(|t| (t - celsius).abs() < 0.6)
                .unwrap_or(false),
            Intent::Fan(fan) => report.fan == fan,
            Intent::VerticalVane(direction) => report.vertical == Some(direction),
            Intent::HorizontalVane(direction) => report.horizontal == Some(direction),
            Intent::Beeper(enabled) => report.beeper == enabled,
            Intent::Display(enabled) => report.display == enabled,
            Intent::Eco(enabled) => report.eco == enabled,
            Intent::Turbo(enabled) => report.turbo == enabled,
            Intent::Quiet(enabled) => report.quiet == enabled,
            Intent::Health(enabled) => report.health == enabled,
            Intent::Sleep(mode) => report.sleep == mode,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    CommandAcknowledged {
        seq: u64,
        attribute: Attribute,
    },
    CommandTimedOut {
        seq: u64,
        attribute: Attribute,
        attempts: u8,
    },
}

#[derive(Clone, Debug)]
enum Request {
    Apply(Intent),
    Poll,
    Stop,
}

#[derive(Error, Clone, Debug)]
pub enum AcError {
    #[error("Could not send request to engine task")]
    Send,
    #[error("Could not wait for engine task to stop")]
    ThreadWait,
}

pub type Result<T> = std::result::Result<T, AcError>;

#[derive(Debug)]
struct PendingCommand {
    seq: u64,
    intent: Intent,
    bytes: Vec<u8>,
    attempts: u8,
}

/// Handle to a running engine task. One instance per device; instances never
/// share a transport.
#[derive(Debug)]
pub struct Ac {
    handle: JoinHandle<()>,
    request_sender: mpsc::UnboundedSender<Request>,
    state_receiver: watch::Receiver<AcState>,
    link_receiver: watch::Receiver<LinkState>,
    event_receiver: watch::Receiver<Option<EngineEvent>>,
}

impl Ac {
    pub fn start<T>(transport: T, initial: AcState, tunables: Tunables) -> Ac
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (state_sender, state_receiver) = watch::channel(initial.clone());
        let (link_sender, link_receiver) = watch::channel(LinkState::Uninitialized);
        let (event_sender, event_receiver) = watch::channel(None);
        let handle = spawn(run(
            transport,
            initial,
            tunables,
            request_receiver,
            state_sender,
            link_sender,
            event_sender,
        ));
        Ac {
            handle,
            request_sender,
            state_receiver,
            link_receiver,
            event_receiver,
        }
    }

    /// Last confirmed snapshot, eventually consistent with in-flight commands.
    pub fn state(&self) -> AcState {
        self.state_receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcState> {
        self.state_receiver.clone()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link_receiver.borrow()
    }

    pub fn link_subscribe(&self) -> watch::Receiver<LinkState> {
        self.link_receiver.clone()
    }

    pub fn events(&self) -> watch::Receiver<Option<EngineEvent>> {
        self.event_receiver.clone()
    }

    pub fn request(&self, intent: Intent) -> Result<()> {
        self.request_sender
            .send(Request::Apply(intent))
            .map_err(|_| AcError::Send)
    }

    pub fn poll_now(&self) -> Result<()> {
        self.request_sender
            .send(Request::Poll)
            .map_err(|_| AcError::Send)
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.request_sender
            .send(Request::Stop)
            .map_err(|_| AcError::Send)?;
        (&mut self.handle).await.map_err(|_| AcError::ThreadWait)
    }
}

struct EngineTask<W> {
    writer: W,
    tunables: Tunables,
    confirmed: AcState,
    link: LinkState,
    queue: VecDeque<PendingCommand>,
    in_flight: Option<PendingCommand>,
    deadline: Option<Instant>,
    next_seq: u64,
    corrupt_streak: u32,
    state_sender: watch::Sender<AcState>,
    link_sender: watch::Sender<LinkState>,
    event_sender: watch::Sender<Option<EngineEvent>>,
}

async fn run<T>(
    transport: T,
    initial: AcState,
    tunables: Tunables,
    mut request_receiver: mpsc::UnboundedReceiver<Request>,
    state_sender: watch::Sender<AcState>,
    link_sender: watch::Sender<LinkState>,
    event_sender: watch::Sender<Option<EngineEvent>>,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(transport);
    let frames = frame_stream(read_half);
    tokio::pin!(frames);

    let mut task = EngineTask {
        writer: write_half,
        tunables: tunables.clone(),
        confirmed: initial,
        link: LinkState::Uninitialized,
        queue: VecDeque::new(),
        in_flight: None,
        deadline: None,
        next_seq: 0,
        corrupt_streak: 0,
        state_sender,
        link_sender,
        event_sender,
    };
    task.set_link(LinkState::Syncing);

    let mut poll_timer = interval(tunables.poll_interval);
    loop {
        let deadline = task.deadline;
        // biased: pending requests drain before frames so a replacing request
        // issued before an acknowledgment wins over the command it supersedes
        tokio::select! {
            biased;
            message = request_receiver.recv() => match message {
                None | Some(Request::Stop) => {
                    info!("engine task stopping");
                    break;
                }
                Some(Request::Apply(intent)) => task.handle_intent(intent).await,
                Some(Request::Poll) => task.send_poll().await,
            },
            event = frames.next() => match event {
                Some(FrameEvent::Valid(frame)) => task.handle_frame(frame).await,
                Some(FrameEvent::Corrupt(error)) => task.handle_corrupt(error),
                None => {
                    warn!("transport ended, engine task stopping");
                    task.set_link(LinkState::Disconnected);
                    break;
                }
            },
            _ = poll_timer.tick() => task.send_poll().await,
            _ = async {
                match deadline {
                    Some(d) => sleep_until(d).await,
                    None => pending::<()>().await,
                }
            } => task.handle_timeout().await,
        }
    }
}

impl<W: AsyncWrite + Unpin> EngineTask<W> {
    fn set_link(&mut self, link: LinkState) {
        if self.link != link {
            info!("link state {:?} -> {:?}", self.link, link);
            self.link = link;
            self.link_sender.send_replace(link);
        }
    }

    fn publish_state(&self) {
        self.state_sender.send_replace(self.confirmed.clone());
    }

    fn publish_event(&self, event: EngineEvent) {
        self.event_sender.send_replace(Some(event));
    }

    async fn write(&mut self, bytes: &[u8]) -> bool {
        trace!("tx {}", hex_dump(bytes));
        let result = async {
            self.writer.write_all(bytes).await?;
            self.writer.flush().await
        }
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("transport write failed: {}", e);
                self.set_link(LinkState::Disconnected);
                false
            }
        }
    }

    async fn send_poll(&mut self) {
        if self.in_flight.is_some() {
            trace!("skipping poll while a command is in flight");
            return;
        }
        let bytes = poll_frame().encode();
        if self.write(&bytes).await {
            trace!("sent status poll");
        }
    }

    async fn handle_intent(&mut self, intent: Intent) {
        let attribute = intent.attribute();
        // a newer request for the same attribute supersedes queued ones
        let before = self.queue.len();
        self.queue.retain(|c| c.intent.attribute() != attribute);
        if self.queue.len() != before {
            debug!("replaced queued command for {:?}", attribute);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!("queueing command {} for {:?}", seq, attribute);
        self.queue.push_back(PendingCommand {
            seq,
            intent,
            bytes: Vec::new(),
            attempts: 0,
        });
        self.pump().await;
    }

    /// Transmit the next queued command when the link is idle. Set frames
    /// carry the full state, so the frame is encoded here, at transmit time,
    /// from the confirmed state plus only the intent being sent; encoding at
    /// enqueue time would resurrect intents that time out ahead of it.
    async fn pump(&mut self) {
        while self.in_flight.is_none() && self.link == LinkState::Ready {
            let mut command = match self.queue.pop_front() {
                Some(command) => command,
                None => return,
            };
            let mut target = self.confirmed.clone();
            command.intent.apply(&mut target);
            let frame = match set_frame(&target) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        "could not encode command {} for {:?}: {}",
                        command.seq,
                        command.intent.attribute(),
                        e
                    );
                    continue;
                }
            };
            command.bytes = frame.encode();
            command.attempts += 1;
            debug!(
                "transmitting command {} ({:?}), attempt {}",
                command.seq,
                command.intent.attribute(),
                command.attempts
            );
            let bytes = command.bytes.clone();
            if self.write(&bytes).await {
                self.deadline = Some(Instant::now() + self.tunables.response_timeout);
                self.in_flight = Some(command);
                self.set_link(LinkState::CommandPending);
            } else {
                self.queue.push_front(command);
                return;
            }
        }
    }

    async fn handle_timeout(&mut self) {
        self.deadline = None;
        let mut command = match self.in_flight.take() {
            Some(command) => command,
            None => return,
        };
        if command.attempts >= self.tunables.retry_budget {
            warn!(
                "command {} ({:?}) timed out after {} attempts, dropping",
                command.seq,
                command.intent.attribute(),
                command.attempts
            );
            self.publish_event(EngineEvent::CommandTimedOut {
                seq: command.seq,
                attribute: command.intent.attribute(),
                attempts: command.attempts,
            });
            self.set_link(LinkState::Ready);
            self.pump().await;
            return;
        }
        command.attempts += 1;
        debug!(
            "command {} response timeout, retrying (attempt {})",
            command.seq, command.attempts
        );
        let bytes = command.bytes.clone();
        if self.write(&bytes).await {
            self.deadline = Some(Instant::now() + self.tunables.response_timeout);
            self.in_flight = Some(command);
        } else {
            self.queue.push_front(command);
        }
    }

    fn handle_corrupt(&mut self, error: crate::protocol::frame::FrameError) {
        self.corrupt_streak += 1;
        debug!(
            "corrupt frame ({}), streak {}",
            error, self.corrupt_streak
        );
        if self.corrupt_streak >= self.tunables.corruption_threshold
            && self.link != LinkState::Disconnected
        {
            warn!(
                "{} consecutive corrupt frames, marking link disconnected",
                self.corrupt_streak
            );
            self.set_link(LinkState::Disconnected);
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        if frame.direction != Direction::AcToMcu {
            trace!("ignoring non-mainboard frame {:?}", frame.command);
            return;
        }
        self.corrupt_streak = 0;
        if self.link == LinkState::Disconnected {
            info!("valid frame received, link recovering");
            self.set_link(LinkState::Syncing);
        }

        match frame.command {
            Command::ShortStatus => match parse_status(&frame.payload) {
                Ok(report) => self.handle_status(report).await,
                Err(e) => debug!("unusable status frame: {}", e),
            },
            Command::TempResponse => match parse_temp_response(&frame.payload) {
                Ok(report) => {
                    self.confirmed.current_celsius = Some(report.current_celsius);
                    if let Some(target) = report.target_celsius {
                        self.confirmed.target_celsius = target;
                    }
                    self.publish_state();
                }
                Err(e) => debug!("unusable temp response: {}", e),
            },
            Command::SetParams | Command::StatusEcho => {
                if self.in_flight.is_some() {
                    self.acknowledge().await;
                } else {
                    debug!("unsolicited {:?} acknowledgment", frame.command);
                }
            }
            other => trace!("ignoring {:?} frame", other),
        }
    }

    async fn handle_status(&mut self, report: StatusReport) {
        self.merge_status(&report);
        if matches!(self.link, LinkState::Uninitialized | LinkState::Syncing) {
            info!("first status frame received, link ready");
            self.set_link(LinkState::Ready);
        }
        let satisfied = self
            .in_flight
            .as_ref()
            .map(|command| command.intent.satisfied_by(&report))
            .unwrap_or(false);
        if satisfied {
            self.acknowledge().await;
        }
        self.pump().await;
    }

    /// Unsolicited status frames win over stale local knowledge; fields the
    /// frame leaves unreported keep their last confirmed value.
    fn merge_status(&mut self, report: &StatusReport) {
        let state = &mut self.confirmed;
        state.power = report.power;
        if report.power {
            if let Some(mode) = report.mode {
                state.mode = mode;
            }
            state.beeper = report.beeper;
            state.display = report.display;
            state.eco = report.eco;
            state.turbo = report.turbo;
            state.quiet = report.quiet;
            state.health = report.health;
            state.fan = report.fan;
            state.sleep = report.sleep;
        }
        if let Some(target) = report.target_celsius {
            state.target_celsius = target;
        }
        if let Some(vertical) = report.vertical {
            state.vertical = vertical;
        }
        if let Some(horizontal) = report.horizontal {
            state.horizontal = horizontal;
        }
        self.publish_state();
    }

    async fn acknowledge(&mut self) {
        self.deadline = None;
        if let Some(command) = self.in_flight.take() {
            debug!(
                "command {} ({:?}) acknowledged",
                command.seq,
                command.intent.attribute()
            );
            command.intent.apply(&mut self.confirmed);
            self.publish_state();
            self.publish_event(EngineEvent::CommandAcknowledged {
                seq: command.seq,
                attribute: command.intent.attribute(),
            });
        }
        self.set_link(LinkState::Ready);
        self.pump().await;
    }
}
