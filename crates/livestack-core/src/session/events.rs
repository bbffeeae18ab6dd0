//! Status events published by the session to its subscribers.

use std::fmt;
use std::path::PathBuf;
use std::sync::{mpsc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::state::SessionState;
use crate::stack::StackMethod;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    SessionStarting,
    SessionRunning {
        method: StackMethod,
        alignment: bool,
    },
    SessionPaused,
    SessionStopped,
    SessionError {
        cause: String,
    },
    ScannerStarted {
        folder: PathBuf,
    },
    ScannerStopped,
    ScannerRestarting,
    ImageRead {
        path: PathBuf,
    },
    ReadFailed {
        path: PathBuf,
        reason: String,
    },
    StepStarted {
        step: &'static str,
        target: String,
    },
    StepFinished {
        step: &'static str,
        target: String,
        elapsed: Duration,
    },
    StepSkipped {
        step: &'static str,
        target: String,
        reason: String,
    },
    FrameDiscarded {
        target: String,
        reason: String,
    },
    FrameStacked {
        target: String,
        frame_count: usize,
    },
    CalibrationUnavailable {
        path: Option<PathBuf>,
        reason: String,
    },
    ImageSaved {
        path: PathBuf,
    },
    SaveFailed {
        path: PathBuf,
        reason: String,
    },
    WebServerStarted {
        address: String,
    },
    WebServerStopped,
    WebServerFailed {
        reason: String,
    },
}

impl SessionEvent {
    pub fn severity(&self) -> Severity {
        match self {
            Self::StateChanged { .. }
            | Self::ImageRead { .. }
            | Self::StepStarted { .. }
            | Self::StepFinished { .. } => Severity::Debug,
            Self::ReadFailed { .. }
            | Self::StepSkipped { .. }
            | Self::FrameDiscarded { .. }
            | Self::CalibrationUnavailable { .. } => Severity::Warning,
            Self::SessionError { .. } | Self::SaveFailed { .. } | Self::WebServerFailed { .. } => {
                Severity::Error
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChanged { from, to } => write!(f, "Session state {from} -> {to}"),
            Self::SessionStarting => write!(f, "Starting new session..."),
            Self::SessionRunning { method, alignment } => write!(
                f,
                "Session running in mode {method} with alignment {}",
                if *alignment { "ON" } else { "OFF" }
            ),
            Self::SessionPaused => write!(f, "Session paused"),
            Self::SessionStopped => write!(f, "Session stopped"),
            Self::SessionError { cause } => write!(f, "Session error: {cause}"),
            Self::ScannerStarted { folder } => {
                write!(f, "Input scanner started on {}", folder.display())
            }
            Self::ScannerStopped => write!(f, "Input scanner stopped"),
            Self::ScannerRestarting => write!(f, "Restarting input scanner ..."),
            Self::ImageRead { path } => write!(f, "Successful image read from {}", path.display()),
            Self::ReadFailed { path, reason } => {
                write!(f, "Error reading from file {} : {reason}", path.display())
            }
            Self::StepStarted { step, target } => write!(f, "Start {step} on {target}"),
            Self::StepFinished {
                step,
                target,
                elapsed,
            } => write!(
                f,
                "End {step} on {target} in {:.2} ms",
                elapsed.as_secs_f64() * 1000.0
            ),
            Self::StepSkipped {
                step,
                target,
                reason,
            } => write!(
                f,
                "Error applying process '{step}' to image {target} : {reason}. Step is SKIPPED"
            ),
            Self::FrameDiscarded { target, reason } => {
                write!(f, "Could not stack image {target} : {reason}. Image is DISCARDED")
            }
            Self::FrameStacked {
                target,
                frame_count,
            } => write!(f, "Image {target} stacked. Stack size is now {frame_count}"),
            Self::CalibrationUnavailable { path, reason } => match path {
                Some(path) => write!(
                    f,
                    "Could not read dark {} : {reason}. Dark subtraction is SKIPPED",
                    path.display()
                ),
                None => write!(f, "Could not read dark : {reason}. Dark subtraction is SKIPPED"),
            },
            Self::ImageSaved { path } => write!(f, "Image saved : {}", path.display()),
            Self::SaveFailed { path, reason } => {
                write!(f, "Failed to save image {} : {reason}", path.display())
            }
            Self::WebServerStarted { address } => {
                write!(f, "Web server started. Reachable at {address}")
            }
            Self::WebServerStopped => write!(f, "Web server stopped"),
            Self::WebServerFailed { reason } => write!(f, "Could not start web server : {reason}"),
        }
    }
}

/// Fan-out of session events to any number of channel subscribers.
/// Every event is also logged at the level of its severity.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: SessionEvent) {
        match event.severity() {
            Severity::Debug => debug!("{event}"),
            Severity::Info => info!("{event}"),
            Severity::Warning => warn!("{event}"),
            Severity::Error => error!("{event}"),
        }
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers are pruned.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
