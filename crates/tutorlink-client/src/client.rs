//! The tutor client handle and its driver task.
//!
//! [`TutorClient`] is a cheap handle. All connection state lives in a single
//! driver task that owns the transport, the pending-message queue, the backoff
//! counter, and the reconnect timer. Handle methods enqueue commands; the
//! driver processes commands, transport events, and finished demo replies one
//! at a time, so every state transition happens on one logical owner.
//!
//! # Example
//!
//! ```no_run
//! use tutorlink_client::{ClientConfig, ClientEvent, TutorClient};
//!
//! # async fn example() -> tutorlink_client::Result<()> {
//! let client = TutorClient::new(ClientConfig::with_environment("localhost:8080"))?;
//! let mut events = client.subscribe();
//!
//! client.connect()?;
//! client.send("I went to the market yesterday", "en-US", "B1")?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Reply(reply) = event {
//!         println!("{}", reply.reply);
//!         break;
//!     }
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::codec::{self, ClientMessage, InboundFrame, TutorReply};
use crate::config::{ClientConfig, Mode};
use crate::demo::DemoResponder;
use crate::endpoint;
use crate::error::{ClientError, Result, TransportErrorKind};
use crate::events::{ClientEvent, EventBroadcaster};
use crate::state::{ClientStatus, ConnectionState};
use crate::transport::{self, Link, LinkEvent, Outbound, WsStream};

// ============================================================================
// Handle
// ============================================================================

/// Handle to a running tutor client.
///
/// Dropping the handle stops the driver and releases the transport.
#[derive(Debug)]
pub struct TutorClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
    events: EventBroadcaster,
    driver: Option<JoinHandle<()>>,
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    SetMode(Mode),
    Send { message: ClientMessage, frame: String },
    Shutdown,
}

impl TutorClient {
    /// Validates `config` and starts the driver task.
    ///
    /// Must be called from within a Tokio runtime. The client starts
    /// `disconnected`, or in `demo` when the configured mode is demo.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConfigValidationError` if `config` is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBroadcaster::default();
        let initial = Driver::initial_status(&config);
        let (status_tx, status) = watch::channel(initial);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let driver = Driver::new(config, status_tx, events.clone());
        let driver = tokio::spawn(driver.run(command_rx));

        Ok(Self {
            commands,
            status,
            events,
            driver: Some(driver),
        })
    }

    /// Starts a live connection attempt, cancelling any attempt in flight.
    ///
    /// In demo mode this only confirms the `demo` state. After a demo fallback,
    /// this re-attempts live mode.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ClientClosed` if the driver has stopped.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Closes the transport and cancels any scheduled reconnect.
    ///
    /// Pending messages stay queued for the next connection.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ClientClosed` if the driver has stopped.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Switches the operating mode.
    ///
    /// Switching to demo tears down any transport. Switching away from demo
    /// leaves the client `disconnected` until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ClientClosed` if the driver has stopped.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.command(Command::SetMode(mode))
    }

    /// Sends one utterance to the tutor.
    ///
    /// Returns `Ok(false)` without doing anything if `text` is empty. Otherwise
    /// the message is answered by the demo responder, written to the transport,
    /// or queued until the transport is ready.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::EncodingFailed` if the message cannot be
    /// serialized, or `ClientError::ClientClosed` if the driver has stopped.
    pub fn send(
        &self,
        text: impl Into<String>,
        language_code: impl Into<String>,
        level: impl Into<String>,
    ) -> Result<bool> {
        let text = text.into();
        if text.is_empty() {
            return Ok(false);
        }

        let message = ClientMessage::asr(text, language_code, level);
        let frame = codec::encode(&message)?;
        self.command(Command::Send { message, frame })?;
        Ok(true)
    }

    /// Returns the current status snapshot.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// Returns a receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Subscribes to client events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Closes the transport gracefully and waits for the driver to stop.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                debug!(error = %e, "Driver task ended abnormally");
            }
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::ClientClosed)
    }
}

impl Drop for TutorClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

enum Internal {
    Opened {
        generation: u64,
        stream: Box<WsStream>,
    },
    OpenFailed {
        generation: u64,
        error: ClientError,
    },
    Link(LinkEvent),
    ReconnectDue {
        generation: u64,
    },
}

impl From<LinkEvent> for Internal {
    fn from(event: LinkEvent) -> Self {
        Self::Link(event)
    }
}

/// Sole owner of the connection state.
///
/// `generation` increments whenever the current connection sequence is
/// abandoned; events carrying an older generation are dropped.
struct Driver {
    config: ClientConfig,
    mode: Mode,
    state: ConnectionState,
    backoff: Backoff,
    generation: u64,
    pending: VecDeque<String>,
    link: Option<Link>,
    connecting: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    demo_fallback: bool,
    last_error: Option<ClientError>,
    last_reply: Option<TutorReply>,
    responder: DemoResponder,
    demo_replies: JoinSet<TutorReply>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status: watch::Sender<ClientStatus>,
    events: EventBroadcaster,
}

impl Driver {
    fn initial_status(config: &ClientConfig) -> ClientStatus {
        ClientStatus {
            state: Self::initial_state(config.mode),
            ..ClientStatus::new(config.mode)
        }
    }

    fn initial_state(mode: Mode) -> ConnectionState {
        if mode == Mode::Demo {
            ConnectionState::Demo
        } else {
            ConnectionState::Disconnected
        }
    }

    fn new(
        config: ClientConfig,
        status: watch::Sender<ClientStatus>,
        events: EventBroadcaster,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.min_backoff(), config.max_backoff());

        Self {
            mode: config.mode,
            state: Self::initial_state(config.mode),
            config,
            backoff,
            generation: 0,
            pending: VecDeque::new(),
            link: None,
            connecting: None,
            reconnect_timer: None,
            demo_fallback: false,
            last_error: None,
            last_reply: None,
            responder: DemoResponder::new(),
            demo_replies: JoinSet::new(),
            internal_tx,
            internal_rx,
            status,
            events,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(mode = %self.mode, "Tutor client driver started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
                Some(joined) = self.demo_replies.join_next(), if !self.demo_replies.is_empty() => {
                    match joined {
                        Ok(reply) => self.deliver(reply),
                        Err(e) => debug!(error = %e, "Demo reply task did not finish"),
                    }
                }
            }
        }

        // Replies already promised to the host still arrive.
        while let Some(joined) = self.demo_replies.join_next().await {
            match joined {
                Ok(reply) => self.deliver(reply),
                Err(e) => debug!(error = %e, "Demo reply task did not finish"),
            }
        }

        self.cancel_connection();
        debug!("Tutor client driver stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::SetMode(mode) => self.set_mode(mode),
            Command::Send { message, frame } => self.send(message, frame),
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self) {
        self.demo_fallback = false;
        if self.mode == Mode::Demo {
            self.set_state(ConnectionState::Demo);
            return;
        }
        self.start_connect();
    }

    fn disconnect(&mut self) {
        self.cancel_connection();
        self.demo_fallback = false;
        self.log("disconnected by request");
        self.set_state(Self::initial_state(self.mode));
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        info!(from = %self.mode, to = %mode, "Switching mode");
        self.mode = mode;

        if mode == Mode::Demo {
            self.cancel_connection();
            self.demo_fallback = false;
            self.set_state(ConnectionState::Demo);
        } else if self.state.is_demo() {
            self.cancel_connection();
            self.demo_fallback = false;
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.publish_status();
        }
    }

    fn send(&mut self, message: ClientMessage, frame: String) {
        if self.demo_active() {
            let responder = self.responder;
            self.demo_replies
                .spawn(async move { responder.respond(message).await });
            return;
        }

        if self.state.is_connected() {
            if let Some(link) = &self.link {
                if link.send(Outbound::Text(frame.clone())) {
                    return;
                }
            }
        }

        self.pending.push_back(frame);
        self.log(format!(
            "transport not ready, queued message ({} pending)",
            self.pending.len()
        ));
        self.publish_status();
    }

    fn demo_active(&self) -> bool {
        self.mode == Mode::Demo || self.demo_fallback
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    fn start_connect(&mut self) {
        self.cancel_connection();

        let url = match endpoint::resolve_config(&self.config) {
            Ok(url) => url,
            Err(error) => {
                warn!(error = %error, "Cannot resolve tutor endpoint");
                self.log(format!("cannot resolve endpoint: {error}"));
                self.fail(error);
                return;
            }
        };

        self.log(format!("connecting to {url}"));
        self.set_state(ConnectionState::Connecting);

        let generation = self.generation;
        let timeout = self.config.connect_timeout();
        let tx = self.internal_tx.clone();
        self.connecting = Some(tokio::spawn(async move {
            let event = match transport::open(&url, timeout).await {
                Ok(stream) => Internal::Opened {
                    generation,
                    stream: Box::new(stream),
                },
                Err(error) => Internal::OpenFailed { generation, error },
            };
            let _ = tx.send(event);
        }));
    }

    /// Abandons the current connection sequence: attempt, timer, and transport.
    fn cancel_connection(&mut self) {
        self.generation = self.generation.wrapping_add(1);

        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Opened { generation, stream } => {
                if generation != self.generation {
                    debug!(generation, "Dropping superseded connection");
                    return;
                }
                self.connecting = None;
                self.on_opened(*stream);
            }
            Internal::OpenFailed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                self.connecting = None;
                self.handle_failure(error);
            }
            Internal::Link(LinkEvent::Frame { generation, text }) => {
                if generation == self.generation {
                    self.handle_frame(&text);
                }
            }
            Internal::Link(LinkEvent::Closed {
                generation,
                normal,
                error,
            }) => {
                if generation != self.generation {
                    return;
                }
                if let Some(link) = self.link.take() {
                    link.abort();
                }
                if normal {
                    info!("Tutor closed the connection");
                    self.log("connection closed by peer");
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    let error = error.unwrap_or_else(|| {
                        ClientError::transport(
                            TransportErrorKind::ConnectionLost,
                            "connection closed abnormally",
                        )
                    });
                    self.handle_failure(error);
                }
            }
            Internal::ReconnectDue { generation } => {
                if generation != self.generation {
                    return;
                }
                self.reconnect_timer = None;
                if self.demo_fallback {
                    self.log(format!(
                        "demo fallback active, skipping live reconnect attempt {}",
                        self.backoff.attempt()
                    ));
                    self.schedule_reconnect();
                } else {
                    self.start_connect();
                }
            }
        }
    }

    fn on_opened(&mut self, stream: WsStream) {
        let link = Link::spawn(stream, self.generation, self.internal_tx.clone());

        self.backoff.reset();
        self.last_error = None;
        self.demo_fallback = false;
        info!("Connected to tutor");
        self.log("connected");

        let mut flushed = 0usize;
        while let Some(frame) = self.pending.pop_front() {
            if !link.send(Outbound::Text(frame.clone())) {
                self.pending.push_front(frame);
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            self.log(format!("flushed {flushed} queued message(s)"));
        }

        self.link = Some(link);
        self.set_state(ConnectionState::Connected);
    }

    /// Applies the failure policy for an error that ended a connection attempt.
    fn handle_failure(&mut self, error: ClientError) {
        warn!(error = %error, "Tutor connection failed");
        self.log(format!("transport failure: {error}"));

        // Later reports from the failed connection carry a stale generation.
        self.cancel_connection();

        if error.is_fatal() {
            self.fail(error);
            return;
        }
        self.record_error(error.clone());

        if self.demo_fallback {
            self.schedule_reconnect();
            return;
        }

        if self.mode == Mode::Automatic && error.is_transient() {
            info!("Live tutor unreachable, falling back to demo mode");
            self.log("live tutor unreachable, falling back to demo mode");
            self.demo_fallback = true;
            self.set_state(ConnectionState::Demo);
            self.schedule_reconnect();
            return;
        }

        if self.config.auto_reconnect {
            self.schedule_reconnect();
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Arms the reconnect timer with the next backoff delay.
    ///
    /// While in demo fallback the timer only produces log lines.
    fn schedule_reconnect(&mut self) {
        if !self.config.auto_reconnect {
            return;
        }

        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        debug!(attempt, delay_ms = delay.as_millis(), "Scheduling reconnect");
        self.log(format!(
            "reconnect attempt {attempt} in {:.1}s",
            delay.as_secs_f64()
        ));

        if self.demo_fallback {
            self.publish_status();
        } else {
            self.set_state(ConnectionState::Reconnecting { delay });
        }

        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        let generation = self.generation;
        let tx = self.internal_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ReconnectDue { generation });
        }));
    }

    fn fail(&mut self, error: ClientError) {
        self.record_error(error.clone());
        self.set_state(ConnectionState::Failed {
            message: error.to_string(),
        });
    }

    // ------------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------------

    fn handle_frame(&mut self, text: &str) {
        debug!(len = text.len(), "Frame received");

        match codec::decode_frame(text) {
            Ok(InboundFrame::Reply(reply)) => self.deliver(reply),
            Ok(InboundFrame::Echo(message)) => {
                let responder = self.responder;
                self.demo_replies
                    .spawn(async move { responder.acknowledge_echo(message).await });
            }
            Ok(InboundFrame::ServerError(message)) => {
                warn!(message = %message, "Tutor reported an error");
                self.record_error(ClientError::server(message));
            }
            Ok(InboundFrame::Ping) => {
                let sent = self
                    .link
                    .as_ref()
                    .is_some_and(|link| link.send(Outbound::Ping));
                if !sent {
                    self.handle_failure(ClientError::transport(
                        TransportErrorKind::ConnectionLost,
                        "ping could not be sent",
                    ));
                }
            }
            Ok(InboundFrame::Ignored { tag }) => {
                self.log(format!("ignored '{tag}' frame"));
            }
            Err(error) => {
                warn!(error = %error, "Dropping malformed frame");
                self.log(format!("malformed frame: {error}"));
                self.record_error(error);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Observables
    // ------------------------------------------------------------------------

    fn deliver(&mut self, reply: TutorReply) {
        debug!(errors = reply.errors.len(), "Delivering reply");
        self.last_reply = Some(reply.clone());
        self.events.send(ClientEvent::Reply(reply));
        self.publish_status();
    }

    fn record_error(&mut self, error: ClientError) {
        self.events.send(ClientEvent::error(&error));
        self.last_error = Some(error);
        self.publish_status();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if state == self.state {
            self.publish_status();
            return;
        }
        info!(from = %self.state, to = %state, "Connection state changed");
        self.state = state.clone();
        self.events.send(ClientEvent::StateChanged(state));
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(ClientStatus {
            state: self.state.clone(),
            mode: self.mode,
            reconnect_attempt: self.backoff.attempt(),
            pending: self.pending.len(),
            demo_fallback: self.demo_fallback,
            last_error: self.last_error.clone(),
            last_reply: self.last_reply.clone(),
        });
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "tutorlink_client::trace", "{line}");
        self.events.send(ClientEvent::log(line));
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(link) = self.link.take() {
            link.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
