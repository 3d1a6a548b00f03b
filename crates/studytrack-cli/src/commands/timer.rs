use std::sync::Arc;

use clap::{Args, Subcommand, ValueEnum};
use studytrack_core::timer::Restored;
use studytrack_core::{
    Config, Database, Event, HttpSessionGateway, SessionEnd, StartConfig, SystemClock,
    TimerEngine, TimerError, TimerMode, TimerService, TimerStatus,
};
use tokio::sync::broadcast::error::RecvError;

use super::print_json;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    /// Pomodoro-style countdown
    Countdown,
    /// Free-running stopwatch
    CountUp,
}

impl From<ModeArg> for TimerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Countdown => TimerMode::Countdown,
            ModeArg::CountUp => TimerMode::CountUp,
        }
    }
}

#[derive(Args)]
pub struct ModeArgs {
    /// Which timer to act on
    #[arg(long, value_enum, default_value_t = ModeArg::Countdown)]
    mode: ModeArg,
}

#[derive(Subcommand)]
pub enum TimerAction {
    /// Open a remote session and start the timer
    Start {
        #[command(flatten)]
        mode: ModeArgs,
        /// Countdown length in minutes (defaults to timer.default_countdown_minutes)
        #[arg(long)]
        minutes: Option<u64>,
        /// Topic the session is tracked against
        #[arg(long)]
        topic: Option<i64>,
        /// Free-form session notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Pause the running timer
    Pause {
        #[command(flatten)]
        mode: ModeArgs,
    },
    /// Resume a paused timer
    Resume {
        #[command(flatten)]
        mode: ModeArgs,
    },
    /// Stop the timer and report the session
    Stop {
        #[command(flatten)]
        mode: ModeArgs,
        /// Cancel without reporting the tracked time
        #[arg(long)]
        discard: bool,
    },
    /// Reconcile and print the current timer state as JSON
    Status {
        #[command(flatten)]
        mode: ModeArgs,
    },
    /// Drive the timer and print its state on every tick until it is idle
    Watch {
        #[command(flatten)]
        mode: ModeArgs,
    },
}

impl TimerAction {
    fn mode(&self) -> TimerMode {
        let args = match self {
            TimerAction::Start { mode, .. }
            | TimerAction::Pause { mode }
            | TimerAction::Resume { mode }
            | TimerAction::Stop { mode, .. }
            | TimerAction::Status { mode }
            | TimerAction::Watch { mode } => mode,
        };
        args.mode.into()
    }
}

fn open_engine(
    mode: TimerMode,
    config: &Config,
) -> Result<TimerEngine, Box<dyn std::error::Error>> {
    let store = Database::open()?;
    Ok(
        TimerEngine::new(mode, Arc::new(SystemClock), Box::new(store))
            .with_overrun_policy(config.timer.overrun_policy),
    )
}

/// Log a session end locally, whatever the gateway said.
fn record_end(history: &Database, end: &SessionEnd, error: Option<&str>) {
    if let Err(e) = history.record_session_end(end, error) {
        tracing::warn!(
            remote_session_id = end.remote_session_id,
            error = %e,
            "failed to record session history"
        );
    }
}

/// Send the end call and record its outcome.
async fn settle_end(
    gateway: &HttpSessionGateway,
    history: &Database,
    end: &SessionEnd,
) -> Result<(), TimerError> {
    let result = end.dispatch(gateway).await;
    let error = result.as_ref().err().map(ToString::to_string);
    record_end(history, end, error.as_deref());
    result
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(action, config))
}

async fn run_async(action: TimerAction, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mode = action.mode();
    let gateway = HttpSessionGateway::from_config(&config.api)?;
    let history = Database::open()?;
    let mut engine = open_engine(mode, &config)?;

    if let TimerAction::Watch { .. } = action {
        return watch(engine, gateway, &history, &config).await;
    }

    // Pick up whatever an earlier invocation left behind. A countdown that
    // ran out meanwhile is settled here; a rejected end is already logged and
    // recorded, and does not block the requested action.
    let recovered = match engine.restore()? {
        Restored::Completed(stopped) => {
            print_json(&stopped.event)?;
            if let Some(end) = &stopped.end {
                let _ = settle_end(&gateway, &history, end).await;
            }
            true
        }
        Restored::Empty | Restored::Resumed(_) => false,
    };

    match action {
        TimerAction::Start {
            minutes,
            topic,
            notes,
            ..
        } => {
            let mut start = match mode {
                TimerMode::Countdown => StartConfig::countdown_minutes(
                    minutes.unwrap_or(config.timer.default_countdown_minutes),
                ),
                TimerMode::CountUp => StartConfig::default(),
            };
            start.topic_id = topic;
            start.notes = notes;
            let event = engine.start(&gateway, start).await?;
            print_json(&event)?;
        }
        TimerAction::Pause { .. } => match engine.pause()? {
            Some(event) => print_json(&event)?,
            None => print_json(&engine.view())?,
        },
        TimerAction::Resume { .. } => match engine.resume()? {
            Some(event) => print_json(&event)?,
            None => print_json(&engine.view())?,
        },
        // The session being stopped already ended on its own.
        TimerAction::Stop { .. } if recovered => {}
        TimerAction::Stop { discard, .. } => {
            let stopped = engine.stop_local(discard)?;
            print_json(&stopped.event)?;
            if let Some(end) = &stopped.end {
                settle_end(&gateway, &history, end).await?;
            }
        }
        TimerAction::Status { .. } => {
            let tick = engine.tick();
            print_json(&tick.view)?;
            if let Some(stopped) = tick.completion {
                print_json(&stopped.event)?;
                if let Some(end) = &stopped.end {
                    settle_end(&gateway, &history, end).await?;
                }
            }
        }
        TimerAction::Watch { .. } => {}
    }
    Ok(())
}

async fn watch(
    engine: TimerEngine,
    gateway: HttpSessionGateway,
    history: &Database,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = TimerService::new(engine, Arc::new(gateway), config.tick_interval());
    let mut events = service.subscribe();
    let handle = service.spawn();

    let handle_event = |event: &Event| -> Result<(), Box<dyn std::error::Error>> {
        if let Some((end, error)) = event.session_end() {
            record_end(history, end, error);
        }
        print_json(event)
    };

    loop {
        match events.recv().await {
            Ok(Event::StateSnapshot { view, .. }) => {
                print_json(&view)?;
                let live = matches!(view.status, TimerStatus::Running | TimerStatus::Paused);
                if !live && !view.starting {
                    break;
                }
            }
            Ok(event) => handle_event(&event)?,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "watch output fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }

    // Outstanding end calls finish before the service exits.
    handle.shutdown().await?;
    while let Ok(event) = events.try_recv() {
        if !matches!(event, Event::StateSnapshot { .. }) {
            handle_event(&event)?;
        }
    }
    Ok(())
}
