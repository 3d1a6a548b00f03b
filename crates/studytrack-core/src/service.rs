//! Tokio driver for a [`TimerEngine`].
//!
//! [`TimerService`] owns one engine and runs it as an actor: commands from
//! [`TimerHandle`]s, interval ticks and answers from spawned gateway calls
//! are processed one at a time inside a single `select!` loop, so the engine
//! never sees two mutations at once and never waits on the network.
//!
//! ```text
//! TimerHandle --Command--> actor --spawn--> SessionGateway
//!      ^                   |  ^                  |
//!      +----oneshot--------+  +---GatewayReply---+
//!                          |
//!                          +--broadcast Event--> subscribers
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::error::{GatewayError, TimerError};
use crate::events::Event;
use crate::gateway::SessionGateway;
use crate::timer::{
    Restored, SessionEnd, StartConfig, StartOutcome, StartTicket, Stopped, TimerEngine,
    TimerStatus, TimerView,
};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, TimerError>>;

enum Command {
    Start {
        config: StartConfig,
        reply: Reply<Event>,
    },
    CancelStart {
        reply: oneshot::Sender<bool>,
    },
    Pause {
        reply: Reply<Option<Event>>,
    },
    Resume {
        reply: Reply<Option<Event>>,
    },
    Stop {
        discard: bool,
        reply: Reply<Event>,
    },
    View {
        reply: oneshot::Sender<TimerView>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Answer of a spawned gateway call, tagged with what it answers.
enum GatewayReply {
    Started {
        ticket: StartTicket,
        result: Result<i64, GatewayError>,
    },
    Ended {
        end: SessionEnd,
        result: Result<(), TimerError>,
    },
}

/// Actor owning a [`TimerEngine`].
///
/// Build it, take any subscriptions that must see recovery events, then
/// [`spawn`](TimerService::spawn) it:
///
/// ```ignore
/// let service = TimerService::new(engine, Arc::new(gateway), Duration::from_secs(1));
/// let mut events = service.subscribe();
/// let handle = service.spawn();
/// ```
pub struct TimerService<G> {
    engine: TimerEngine,
    gateway: Arc<G>,
    tick_interval: Duration,
    events: broadcast::Sender<Event>,
    replies_tx: mpsc::UnboundedSender<GatewayReply>,
    replies_rx: mpsc::UnboundedReceiver<GatewayReply>,
    start_reply: Option<(StartTicket, Reply<Event>)>,
    ends_in_flight: usize,
    shutting_down: bool,
    shutdown_reply: Option<oneshot::Sender<()>>,
}

impl<G: SessionGateway + 'static> TimerService<G> {
    pub fn new(engine: TimerEngine, gateway: Arc<G>, tick_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            gateway,
            tick_interval,
            events,
            replies_tx,
            replies_rx,
            start_reply: None,
            ends_in_flight: 0,
            shutting_down: false,
            shutdown_reply: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Spawn the actor on the current tokio runtime.
    ///
    /// An idle engine restores its persisted session first; a countdown
    /// that ran out while nothing was ticking has its end dispatched once.
    pub fn spawn(self) -> TimerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = TimerHandle {
            commands: cmd_tx,
            events: self.events.clone(),
        };
        let span = tracing::info_span!("timer_service", mode = %self.engine.mode());
        tokio::spawn(self.run(cmd_rx).instrument(span));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("timer service started");
        self.recover();

        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let draining = self.shutting_down;
            if draining && self.ends_in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;

                cmd = commands.recv(), if !draining => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.begin_shutdown(None),
                },

                Some(reply) = self.replies_rx.recv() => self.handle_gateway_reply(reply),

                _ = ticker.tick(), if !draining => self.on_tick(),
            }
        }

        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(());
        }
        info!("timer service exited");
    }

    fn recover(&mut self) {
        if self.engine.status() != TimerStatus::Idle || self.engine.is_starting() {
            return;
        }
        match self.engine.restore() {
            Ok(Restored::Empty) => {}
            Ok(Restored::Resumed(event)) => self.publish(event),
            Ok(Restored::Completed(stopped)) => self.settle(stopped),
            Err(e) => warn!(error = %e, "could not restore timer session"),
        }
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        info!(ends_in_flight = self.ends_in_flight, "timer service shutting down");
        if self.engine.abandon_start() {
            if let Some((_, pending)) = self.start_reply.take() {
                let _ = pending.send(Err(TimerError::StartAbandoned));
            }
        }
        self.shutting_down = true;
        self.shutdown_reply = reply;
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { config, reply } => self.start(config, reply),
            Command::CancelStart { reply } => {
                let abandoned = self.engine.abandon_start();
                if let Some((_, pending)) = self.start_reply.take() {
                    let _ = pending.send(Err(TimerError::StartAbandoned));
                }
                let _ = reply.send(abandoned);
            }
            Command::Pause { reply } => {
                let result = self.engine.pause();
                if let Ok(Some(event)) = &result {
                    self.publish(event.clone());
                }
                let _ = reply.send(result);
            }
            Command::Resume { reply } => {
                let result = self.engine.resume();
                if let Ok(Some(event)) = &result {
                    self.publish(event.clone());
                }
                let _ = reply.send(result);
            }
            Command::Stop { discard, reply } => {
                let result = self.engine.stop_local(discard).map(|stopped| {
                    let event = stopped.event.clone();
                    self.settle(stopped);
                    event
                });
                let _ = reply.send(result);
            }
            Command::View { reply } => {
                let _ = reply.send(self.engine.view());
            }
            Command::Shutdown { reply } => self.begin_shutdown(Some(reply)),
        }
    }

    fn start(&mut self, config: StartConfig, reply: Reply<Event>) {
        let request = match self.engine.begin_start(config) {
            Ok(request) => request,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let ticket = request.ticket;
        self.start_reply = Some((ticket, reply));

        let gateway = Arc::clone(&self.gateway);
        let replies = self.replies_tx.clone();
        tokio::spawn(async move {
            let result = gateway
                .start(request.session_type, request.topic_id, request.notes)
                .await;
            let _ = replies.send(GatewayReply::Started { ticket, result });
        });
    }

    fn handle_gateway_reply(&mut self, reply: GatewayReply) {
        match reply {
            GatewayReply::Started { ticket, result } => {
                let outcome = self.engine.finish_start(ticket, result);
                let pending = self.take_start_reply(ticket);
                match outcome {
                    Ok(StartOutcome::Started(event)) => {
                        self.publish(event.clone());
                        if let Some(pending) = pending {
                            let _ = pending.send(Ok(event));
                        }
                    }
                    Ok(StartOutcome::Discarded) => {}
                    Err(e) => {
                        self.publish(Event::StartFailed {
                            mode: self.engine.mode(),
                            error: e.to_string(),
                            at: self.engine.now(),
                        });
                        if let Some(pending) = pending {
                            let _ = pending.send(Err(e));
                        }
                    }
                }
            }
            GatewayReply::Ended { end, result } => {
                self.ends_in_flight = self.ends_in_flight.saturating_sub(1);
                let at = self.engine.now();
                let event = match result {
                    Ok(()) => {
                        info!(remote_session_id = end.remote_session_id, "session end recorded");
                        Event::SessionEnded { end, at }
                    }
                    Err(e) => Event::SessionEndFailed {
                        end,
                        error: e.to_string(),
                        at,
                    },
                };
                self.publish(event);
            }
        }
    }

    fn take_start_reply(&mut self, ticket: StartTicket) -> Option<Reply<Event>> {
        match self.start_reply.take() {
            Some((pending, reply)) if pending == ticket => Some(reply),
            other => {
                self.start_reply = other;
                None
            }
        }
    }

    fn on_tick(&mut self) {
        let tick = self.engine.tick();
        let at = self.engine.now();
        if let Some(stopped) = tick.completion {
            self.settle(stopped);
        }
        self.publish(Event::StateSnapshot { view: tick.view, at });
    }

    /// Publish a finished session and send its end, if one is owed.
    fn settle(&mut self, stopped: Stopped) {
        self.publish(stopped.event);
        if let Some(end) = stopped.end {
            self.dispatch_end(end);
        }
    }

    fn dispatch_end(&mut self, end: SessionEnd) {
        self.ends_in_flight += 1;
        let gateway = Arc::clone(&self.gateway);
        let replies = self.replies_tx.clone();
        tokio::spawn(async move {
            let result = end.dispatch(gateway.as_ref()).await;
            let _ = replies.send(GatewayReply::Ended { end, result });
        });
    }

    fn publish(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

/// Cheap, cloneable handle to a running [`TimerService`].
#[derive(Clone)]
pub struct TimerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl TimerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| TimerError::ServiceClosed("command channel closed".into()))?;
        rx.await
            .map_err(|_| TimerError::ServiceClosed("reply dropped".into()))
    }

    /// Open a session. Resolves when the gateway answers; ticks continue
    /// meanwhile. A second start while one is pending fails at once with
    /// [`TimerError::StartInFlight`].
    pub async fn start(&self, config: StartConfig) -> Result<Event, TimerError> {
        self.request(|reply| Command::Start { config, reply }).await?
    }

    /// Abandon a pending start. Returns whether there was one.
    pub async fn cancel_start(&self) -> Result<bool, TimerError> {
        self.request(|reply| Command::CancelStart { reply }).await
    }

    pub async fn pause(&self) -> Result<Option<Event>, TimerError> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<Option<Event>, TimerError> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    /// Stop the session. Resolves once local state is reset; the end call
    /// is reported later as `SessionEnded` or `SessionEndFailed`.
    pub async fn stop(&self, discard: bool) -> Result<Event, TimerError> {
        self.request(|reply| Command::Stop { discard, reply }).await?
    }

    pub async fn view(&self) -> Result<TimerView, TimerError> {
        self.request(|reply| Command::View { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Stop the actor after outstanding end calls have been answered.
    pub async fn shutdown(&self) -> Result<(), TimerError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
