use std::fmt;

/// Session lifecycle states.
///
/// ```text
/// Idle -> Starting -> Running <-> Paused
///                        |          |
///                        +-> Stopping <-+ -> Idle
/// Error is reachable from Starting, Running, Paused and Stopping; it always
/// returns to Idle once cleanup is done.
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Paused)
                | (Running, Stopping)
                | (Running, Error)
                | (Paused, Running)
                | (Paused, Stopping)
                | (Paused, Error)
                | (Stopping, Idle)
                | (Stopping, Error)
                | (Error, Idle)
        )
    }

    /// Whether frames are being (or may still be) processed.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "in error"),
        }
    }
}
