//! Box lifecycle status and state machine.
//!
//! Defines the possible states of a box and the legal transitions between
//! them. `BoxStatus::apply` is the single decision function; every predicate
//! below is derived from it so the table lives in exactly one place.

use boxlite_shared::errors::{BoxliteError, BoxliteResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a box.
///
/// State machine:
/// ```text
///            start ok                pause
/// Created ───────────▶ Running ◀──────────▶ Paused
///    │                 │  │  │    resume      │
///    │ start failed    │  │  └── stop ──┐     │ stop
///    ▼                 │  │             ▼     ▼
///  Failed ◀── crash ───┘  └─ exit ─▶ Exited  Stopped
/// ```
/// `Stopped`, `Exited` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxStatus {
    /// Registered, no process launched yet.
    Created,

    /// Process launched and not yet terminated.
    Running,

    /// Process suspended; it still holds its pid.
    Paused,

    /// Terminated by an explicit stop.
    Stopped,

    /// Process exited on its own.
    Exited,

    /// Launch failed, the process crashed, or the backend reported a fatal error.
    Failed,
}

/// A requested lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Backend launched the process.
    Start,
    /// Backend failed to launch the process.
    StartFailed,
    Pause,
    Resume,
    /// Explicit stop request.
    Stop,
    /// Process exited on its own.
    Exit,
    /// Process crashed or backend reported a fatal error.
    Fail,
}

impl Transition {
    pub const ALL: [Transition; 7] = [
        Transition::Start,
        Transition::StartFailed,
        Transition::Pause,
        Transition::Resume,
        Transition::Stop,
        Transition::Exit,
        Transition::Fail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::StartFailed => "fail the start of",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
            Transition::Exit => "exit",
            Transition::Fail => "fail",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BoxStatus {
    pub const ALL: [BoxStatus; 6] = [
        BoxStatus::Created,
        BoxStatus::Running,
        BoxStatus::Paused,
        BoxStatus::Stopped,
        BoxStatus::Exited,
        BoxStatus::Failed,
    ];

    /// Decide the result of applying `transition` to this status.
    ///
    /// Pure: holds no state and performs no I/O. Returns
    /// `BoxliteError::InvalidTransition` for every pair outside the table.
    pub fn apply(self, transition: Transition) -> BoxliteResult<BoxStatus> {
        use BoxStatus::*;
        use Transition as T;

        let next = match (self, transition) {
            (Created, T::Start) => Running,
            (Created, T::StartFailed) => Failed,
            (Running, T::Pause) => Paused,
            (Paused, T::Resume) => Running,
            (Running, T::Stop) => Stopped,
            (Paused, T::Stop) => Stopped,
            (Running, T::Exit) => Exited,
            (Running, T::Fail) => Failed,
            _ => {
                return Err(BoxliteError::InvalidTransition {
                    from: self.as_str().to_string(),
                    transition: transition.as_str().to_string(),
                });
            }
        };
        Ok(next)
    }

    /// Whether `transition` is legal from this status.
    pub fn allows(self, transition: Transition) -> bool {
        self.apply(transition).is_ok()
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        Transition::ALL.iter().all(|t| !self.allows(*t))
    }

    /// Whether the box owns a live host process (and therefore a pid).
    pub fn is_active(&self) -> bool {
        matches!(self, BoxStatus::Running | BoxStatus::Paused)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BoxStatus::Running)
    }

    pub fn can_start(&self) -> bool {
        self.allows(Transition::Start)
    }

    pub fn can_stop(&self) -> bool {
        self.allows(Transition::Stop)
    }

    pub fn can_pause(&self) -> bool {
        self.allows(Transition::Pause)
    }

    pub fn can_resume(&self) -> bool {
        self.allows(Transition::Resume)
    }

    /// Only terminal boxes may be removed from the registry.
    pub fn can_remove(&self) -> bool {
        self.is_terminal()
    }

    /// Fail with `InvalidTransition` unless the box may be removed.
    pub fn ensure_removable(&self) -> BoxliteResult<()> {
        if self.can_remove() {
            Ok(())
        } else {
            Err(BoxliteError::InvalidTransition {
                from: self.as_str().to_string(),
                transition: "remove".to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoxStatus::Created => "created",
            BoxStatus::Running => "running",
            BoxStatus::Paused => "paused",
            BoxStatus::Stopped => "stopped",
            BoxStatus::Exited => "exited",
            BoxStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BoxStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(BoxStatus::Created),
            "running" => Ok(BoxStatus::Running),
            "paused" => Ok(BoxStatus::Paused),
            "stopped" => Ok(BoxStatus::Stopped),
            "exited" => Ok(BoxStatus::Exited),
            "failed" => Ok(BoxStatus::Failed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a box reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    /// Explicit stop. `forced` is set when graceful termination timed out.
    Stopped {
        forced: bool,
        exit_code: Option<i32>,
    },
    /// The process exited on its own with `code`.
    Exited { code: i32 },
    /// The process was killed by a signal it did not ask for.
    Crashed { signal: Option<i32> },
    /// The backend could not launch the process.
    StartFailed { message: String },
    /// The backend lost track of the process.
    BackendError { message: String },
    /// The process ended on its own while the box was paused.
    Terminated {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Stopped { forced: true, .. } => write!(f, "stopped (forced)"),
            ExitReason::Stopped { forced: false, .. } => write!(f, "stopped"),
            ExitReason::Exited { code } => write!(f, "exited with code {}", code),
            ExitReason::Crashed { signal: Some(s) } => write!(f, "crashed (signal {})", s),
            ExitReason::Crashed { signal: None } => write!(f, "crashed"),
            ExitReason::StartFailed { message } => write!(f, "start failed: {}", message),
            ExitReason::BackendError { message } => write!(f, "backend error: {}", message),
            ExitReason::Terminated { code, signal } => {
                write!(f, "terminated while paused (code {:?}, signal {:?})", code, signal)
            }
        }
    }
}

/// Dynamic box state (changes during lifecycle).
///
/// Mutated only through the methods below, each of which consults
/// `BoxStatus::apply` before touching any field. A rejected transition leaves
/// the state untouched.
///
/// PID policy: `pid` is `Some` exactly while the box is Running or Paused and
/// is cleared on entry to any terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxState {
    /// Current lifecycle status.
    pub status: BoxStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    /// Last state change timestamp (UTC).
    pub last_updated: DateTime<Utc>,
}

impl BoxState {
    /// Create initial state for a box created at `created_at`.
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            status: BoxStatus::Created,
            pid: None,
            started_at: None,
            ended_at: None,
            exit_reason: None,
            last_updated: created_at,
        }
    }

    /// Created → Running with the launched `pid`.
    pub fn mark_running(&mut self, pid: u32) -> BoxliteResult<()> {
        let next = self.status.apply(Transition::Start)?;
        let now = self.tick();
        self.status = next;
        self.pid = Some(pid);
        self.started_at = Some(now);
        Ok(())
    }

    /// Created → Failed after a rejected launch.
    pub fn mark_start_failed(&mut self, message: impl Into<String>) -> BoxliteResult<()> {
        let next = self.status.apply(Transition::StartFailed)?;
        self.finish(
            next,
            ExitReason::StartFailed {
                message: message.into(),
            },
        );
        Ok(())
    }

    pub fn mark_paused(&mut self) -> BoxliteResult<()> {
        self.status = self.status.apply(Transition::Pause)?;
        self.tick();
        Ok(())
    }

    pub fn mark_resumed(&mut self) -> BoxliteResult<()> {
        self.status = self.status.apply(Transition::Resume)?;
        self.tick();
        Ok(())
    }

    /// Apply a terminating transition (`Stop`, `Exit` or `Fail`).
    pub fn mark_terminated(
        &mut self,
        transition: Transition,
        reason: ExitReason,
    ) -> BoxliteResult<()> {
        let next = self.status.apply(transition)?;
        if !next.is_terminal() {
            return Err(BoxliteError::Internal(format!(
                "{} does not end a box lifecycle",
                transition
            )));
        }
        self.finish(next, reason);
        Ok(())
    }

    fn finish(&mut self, status: BoxStatus, reason: ExitReason) {
        let now = self.tick();
        self.status = status;
        self.pid = None;
        self.ended_at = Some(now);
        self.exit_reason = Some(reason);
    }

    /// Advance `last_updated`, never moving backwards even if the wall clock does.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.last_updated);
        self.last_updated = now;
        now
    }
}
