//! Command and response codes shared with the remote controller.
//!
//! Values are stable across protocol versions. Codes 101-199 are events sent
//! by the remote on the sentinel id; codes 201-299 are adapter queries.

use std::fmt;
use std::str::FromStr;

/// A command or event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Exit,
    None,
    Help,
    Launch,
    Load,
    Continue,
    Info,
    Break,
    Step,
    Stop,
    Delete,
    BreakP,
    DeleteP,
    /// The remote is exiting.
    IpcExit,
    /// A breakpoint was hit.
    IpcHitBreakpoint,
    /// A step completed.
    IpcStep,
    IpcGenerate,
    IpcListPlayers,
    IpcGetPlayerInfo,
    IpcPause,
    IpcGetVariables,
    IpcGetTeamside,
    IpcClearBreakpoints,
    IpcSetBreakpoint,
    IpcSetStepTarget,
    IpcGetTrigger,
    /// A code this build does not know about.
    Unknown(i32),
}

impl Command {
    /// Every known command, in code order.
    pub const ALL: [Command; 26] = [
        Command::Exit,
        Command::None,
        Command::Help,
        Command::Launch,
        Command::Load,
        Command::Continue,
        Command::Info,
        Command::Break,
        Command::Step,
        Command::Stop,
        Command::Delete,
        Command::BreakP,
        Command::DeleteP,
        Command::IpcExit,
        Command::IpcHitBreakpoint,
        Command::IpcStep,
        Command::IpcGenerate,
        Command::IpcListPlayers,
        Command::IpcGetPlayerInfo,
        Command::IpcPause,
        Command::IpcGetVariables,
        Command::IpcGetTeamside,
        Command::IpcClearBreakpoints,
        Command::IpcSetBreakpoint,
        Command::IpcSetStepTarget,
        Command::IpcGetTrigger,
    ];

    /// Numeric wire code.
    pub fn code(self) -> i32 {
        match self {
            Command::Exit => -1,
            Command::None => 0,
            Command::Help => 1,
            Command::Launch => 2,
            Command::Load => 3,
            Command::Continue => 4,
            Command::Info => 5,
            Command::Break => 6,
            Command::Step => 7,
            Command::Stop => 8,
            Command::Delete => 9,
            Command::BreakP => 10,
            Command::DeleteP => 11,
            Command::IpcExit => 101,
            Command::IpcHitBreakpoint => 102,
            Command::IpcStep => 103,
            Command::IpcGenerate => 104,
            Command::IpcListPlayers => 201,
            Command::IpcGetPlayerInfo => 202,
            Command::IpcPause => 203,
            Command::IpcGetVariables => 204,
            Command::IpcGetTeamside => 205,
            Command::IpcClearBreakpoints => 206,
            Command::IpcSetBreakpoint => 207,
            Command::IpcSetStepTarget => 208,
            Command::IpcGetTrigger => 209,
            Command::Unknown(code) => code,
        }
    }

    /// Protocol name of the command, as used by the remote controller.
    pub fn name(self) -> &'static str {
        match self {
            Command::Exit => "EXIT",
            Command::None => "NONE",
            Command::Help => "HELP",
            Command::Launch => "LAUNCH",
            Command::Load => "LOAD",
            Command::Continue => "CONTINUE",
            Command::Info => "INFO",
            Command::Break => "BREAK",
            Command::Step => "STEP",
            Command::Stop => "STOP",
            Command::Delete => "DELETE",
            Command::BreakP => "BREAKP",
            Command::DeleteP => "DELETEP",
            Command::IpcExit => "IPC_EXIT",
            Command::IpcHitBreakpoint => "IPC_HIT_BREAKPOINT",
            Command::IpcStep => "IPC_STEP",
            Command::IpcGenerate => "IPC_GENERATE",
            Command::IpcListPlayers => "IPC_LIST_PLAYERS",
            Command::IpcGetPlayerInfo => "IPC_GET_PLAYER_INFO",
            Command::IpcPause => "IPC_PAUSE",
            Command::IpcGetVariables => "IPC_GET_VARIABLES",
            Command::IpcGetTeamside => "IPC_GET_TEAMSIDE",
            Command::IpcClearBreakpoints => "IPC_CLEAR_BREAKPOINTS",
            Command::IpcSetBreakpoint => "IPC_SET_BREAKPOINT",
            Command::IpcSetStepTarget => "IPC_SET_STEP_TARGET",
            Command::IpcGetTrigger => "IPC_GET_TRIGGER",
            Command::Unknown(_) => "UNKNOWN",
        }
    }

    /// Returns true for remote-to-adapter event codes.
    pub fn is_event(self) -> bool {
        (101..200).contains(&self.code())
    }
}

impl From<i32> for Command {
    fn from(code: i32) -> Self {
        Command::ALL
            .into_iter()
            .find(|command| command.code() == code)
            .unwrap_or(Command::Unknown(code))
    }
}

impl From<Command> for i32 {
    fn from(command: Command) -> Self {
        command.code()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(code) => write!(f, "UNKNOWN({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Error returned when parsing a [`Command`] from text fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command '{0}'")]
pub struct ParseCommandError(pub String);

impl FromStr for Command {
    type Err = ParseCommandError;

    /// Accepts a protocol name (case-insensitive, `-` or `_`) or a numeric code.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = input.trim();
        if let Ok(code) = trimmed.parse::<i32>() {
            return Ok(Command::from(code));
        }
        let normalized = trimmed.to_ascii_uppercase().replace('-', "_");
        Command::ALL
            .into_iter()
            .find(|command| {
                command.name() == normalized
                    || command.name().strip_prefix("IPC_") == Some(normalized.as_str())
            })
            .ok_or_else(|| ParseCommandError(input.to_string()))
    }
}

/// Outcome tag carried by a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// The command succeeded.
    Success,
    /// The command was rejected in the current state.
    Error,
    /// The remote faulted while handling the command.
    Exception,
    /// Any other value, e.g. a request echoing its command.
    Other(i32),
}

impl ResponseKind {
    /// Numeric wire code.
    pub fn code(self) -> i32 {
        match self {
            ResponseKind::Success => 0,
            ResponseKind::Error => 1,
            ResponseKind::Exception => 2,
            ResponseKind::Other(code) => code,
        }
    }
}

impl From<i32> for ResponseKind {
    fn from(code: i32) -> Self {
        match code {
            0 => ResponseKind::Success,
            1 => ResponseKind::Error,
            2 => ResponseKind::Exception,
            other => ResponseKind::Other(other),
        }
    }
}

impl From<ResponseKind> for i32 {
    fn from(kind: ResponseKind) -> Self {
        kind.code()
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseKind::Success => f.write_str("SUCCESS"),
            ResponseKind::Error => f.write_str("ERROR"),
            ResponseKind::Exception => f.write_str("EXCEPTION"),
            ResponseKind::Other(code) => write!(f, "OTHER({code})"),
        }
    }
}
