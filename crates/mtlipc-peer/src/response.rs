use std::fmt;
use std::str::FromStr;

use mtlipc_frame::{Command, Frame, MessageId, ResponseKind};
use serde::de::DeserializeOwned;

/// A resolved reply to one request.
///
/// `ERROR` and `EXCEPTION` replies are ordinary values here; callers decide
/// whether to surface or suppress them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub message_id: MessageId,
    pub command: Command,
    pub kind: ResponseKind,
    /// Payload as text: JSON on success, a detail code or JSON on failure.
    pub detail: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    pub fn is_exception(&self) -> bool {
        self.kind == ResponseKind::Exception
    }

    /// Decode the detail as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.detail)
    }

    /// Known detail code carried by an `ERROR` reply.
    pub fn detail_code(&self) -> Option<DetailCode> {
        self.detail.parse().ok()
    }

    /// Human-readable description of the outcome.
    pub fn describe(&self) -> String {
        match (self.kind, self.detail_code()) {
            (ResponseKind::Success, _) => "success".to_string(),
            (ResponseKind::Exception, _) => format!(
                "an error occurred inside the debugger while handling {}: {}",
                self.command, self.detail
            ),
            (_, Some(code)) => code.describe(self.command),
            (kind, None) if self.detail.is_empty() => format!("{kind} with no detail"),
            (_, None) => self.detail.clone(),
        }
    }

    /// Turn non-success replies into a [`ResponseError`].
    pub fn into_result(self) -> Result<Response, ResponseError> {
        match self.kind {
            ResponseKind::Success => Ok(self),
            ResponseKind::Error => Err(ResponseError::Rejected {
                command: self.command,
                code: self.detail_code(),
                detail: self.detail,
            }),
            ResponseKind::Exception => Err(ResponseError::Exception {
                command: self.command,
                detail: self.detail,
            }),
            ResponseKind::Other(kind) => Err(ResponseError::UnexpectedKind {
                command: self.command,
                kind,
            }),
        }
    }
}

impl From<Frame> for Response {
    fn from(frame: Frame) -> Self {
        Self {
            message_id: frame.message_id,
            command: frame.command,
            kind: frame.response_kind(),
            detail: frame.payload_str().into_owned(),
        }
    }
}

/// A non-success reply, for callers that want to use `?`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// The remote rejected the command in its current state.
    #[error("{command} rejected: {}", code.map(|c| c.describe(*command)).unwrap_or_else(|| detail.clone()))]
    Rejected {
        command: Command,
        code: Option<DetailCode>,
        detail: String,
    },

    /// The remote faulted while handling the command.
    #[error("{command} raised an exception in the debugger: {detail}")]
    Exception { command: Command, detail: String },

    /// The reply carried a kind outside SUCCESS/ERROR/EXCEPTION.
    #[error("{command} returned unexpected response kind {kind}")]
    UnexpectedKind { command: Command, kind: i32 },
}

/// Error details reported by the remote controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailCode {
    HeldOpen,
    NotRunning,
    UnrecognizedCommand,
    GameNotInitialized,
    PlayersNotInitialized,
    InvalidInput,
    AlreadyPaused,
    PlayerNotExist,
    PlayerWrongTeamside,
    PlayerInvalidState,
    MissingSourceFile,
    InvalidDebugDatabase,
}

impl DetailCode {
    pub const ALL: [DetailCode; 12] = [
        DetailCode::HeldOpen,
        DetailCode::NotRunning,
        DetailCode::UnrecognizedCommand,
        DetailCode::GameNotInitialized,
        DetailCode::PlayersNotInitialized,
        DetailCode::InvalidInput,
        DetailCode::AlreadyPaused,
        DetailCode::PlayerNotExist,
        DetailCode::PlayerWrongTeamside,
        DetailCode::PlayerInvalidState,
        DetailCode::MissingSourceFile,
        DetailCode::InvalidDebugDatabase,
    ];

    /// Wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            DetailCode::HeldOpen => "DEBUGGER_HELD_OPEN",
            DetailCode::NotRunning => "DEBUGGER_NOT_RUNNING",
            DetailCode::UnrecognizedCommand => "DEBUGGER_UNRECOGNIZED_COMMAND",
            DetailCode::GameNotInitialized => "DEBUGGER_GAME_NOT_INITIALIZED",
            DetailCode::PlayersNotInitialized => "DEBUGGER_PLAYERS_NOT_INITIALIZED",
            DetailCode::InvalidInput => "DEBUGGER_INVALID_INPUT",
            DetailCode::AlreadyPaused => "DEBUGGER_ALREADY_PAUSED",
            DetailCode::PlayerNotExist => "DEBUGGER_PLAYER_NOT_EXIST",
            DetailCode::PlayerWrongTeamside => "DEBUGGER_PLAYER_WRONG_TEAMSIDE",
            DetailCode::PlayerInvalidState => "DEBUGGER_PLAYER_INVALID_STATE",
            DetailCode::MissingSourceFile => "DEBUGGER_MISSING_SOURCE_FILE",
            DetailCode::InvalidDebugDatabase => "DEBUGGER_INVALID_DEBUG_DATABASE",
        }
    }

    /// Message suitable for showing to the end user.
    pub fn describe(self, command: Command) -> String {
        match self {
            DetailCode::HeldOpen => "The MUGEN process was still open when exit was requested, and may have become stuck.".to_string(),
            DetailCode::NotRunning => format!("The MUGEN process was not running, so the debugger could not handle the {command} command."),
            DetailCode::UnrecognizedCommand => format!("The command {command} was not recognized by the debugger; the debugger and adapter versions may be out of sync."),
            DetailCode::GameNotInitialized => "The game offsets for MUGEN are not yet initialized.".to_string(),
            DetailCode::PlayersNotInitialized => "The player offsets for MUGEN are not yet initialized.".to_string(),
            DetailCode::InvalidInput => format!("An invalid input was provided for the {command} command."),
            DetailCode::AlreadyPaused => "The debugger has already been paused by another request.".to_string(),
            DetailCode::PlayerNotExist => "Player data was requested for a player ID which does not exist.".to_string(),
            DetailCode::PlayerWrongTeamside => "Player data was requested for a player on the enemy's team.".to_string(),
            DetailCode::PlayerInvalidState => "Player data was requested for a player which is in an invalid state number.".to_string(),
            DetailCode::MissingSourceFile => "The requested path does not map to a source file in the debug database.".to_string(),
            DetailCode::InvalidDebugDatabase => "The debug database could not be loaded.".to_string(),
        }
    }

    /// Errors that are expected when querying before the game finished loading.
    pub fn is_initialization_race(self) -> bool {
        matches!(
            self,
            DetailCode::GameNotInitialized | DetailCode::PlayersNotInitialized
        )
    }
}

impl fmt::Display for DetailCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches('"');
        DetailCode::ALL
            .into_iter()
            .find(|code| code.as_str() == trimmed)
            .ok_or(())
    }
}
