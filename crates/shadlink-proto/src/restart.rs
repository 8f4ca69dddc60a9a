pub const RESTART: &str = "RESTART";

/// Largest argument count a restart request may announce.
pub const MAX_RESTART_ARGS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartProgress {
    /// Not part of a restart request; the caller should interpret the frame itself.
    NotRestart,
    /// Frame consumed, more are expected.
    Pending,
    /// All announced arguments were collected.
    Complete(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestartFrameError {
    #[error("invalid restart argument count: {0:?}")]
    InvalidCount(String),
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    AwaitingCount,
    Collecting {
        remaining: usize,
        args: Vec<String>,
    },
}

/// Collects a worker-initiated restart request:
/// `RESTART`, then a decimal count N, then exactly N argument frames.
///
/// While a request is being collected every frame is consumed as part of it,
/// whatever its content.
#[derive(Debug, Default)]
pub struct RestartAccumulator {
    state: State,
}

impl RestartAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    pub fn feed(&mut self, payload: &str) -> Result<RestartProgress, RestartFrameError> {
        match std::mem::take(&mut self.state) {
            State::Idle => {
                if payload == RESTART {
                    self.state = State::AwaitingCount;
                    Ok(RestartProgress::Pending)
                } else {
                    Ok(RestartProgress::NotRestart)
                }
            }
            State::AwaitingCount => {
                let count = payload
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n <= MAX_RESTART_ARGS)
                    .ok_or_else(|| RestartFrameError::InvalidCount(payload.to_string()))?;
                if count == 0 {
                    return Ok(RestartProgress::Complete(Vec::new()));
                }
                self.state = State::Collecting {
                    remaining: count,
                    args: Vec::new(),
                };
                Ok(RestartProgress::Pending)
            }
            State::Collecting {
                remaining,
                mut args,
            } => {
                args.push(payload.to_string());
                if remaining == 1 {
                    Ok(RestartProgress::Complete(args))
                } else {
                    self.state = State::Collecting {
                        remaining: remaining - 1,
                        args,
                    };
                    Ok(RestartProgress::Pending)
                }
            }
        }
    }
}

/// Frames (without the control prefix) a worker sends to request a restart.
pub fn request_frames(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + 2);
    out.push(RESTART.to_string());
    out.push(args.len().to_string());
    out.extend(args.iter().cloned());
    out
}
