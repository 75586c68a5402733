use std::path::PathBuf;
use std::time::Duration;

use mtlipc_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};
use mtlipc_transport::ProcessConfig;
use serde::{Deserialize, Serialize};

/// Default deadline for an ordinary request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for each shutdown command.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of events buffered for slow subscribers.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings for one debugging session.
///
/// Durations are (de)serialized as whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How to start the remote controller.
    pub process: ProcessConfig,
    /// Deadline for every request. `None` waits forever.
    #[serde(with = "option_millis")]
    pub request_timeout: Option<Duration>,
    /// Deadline for each of STOP and EXIT during disconnect.
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
    /// Stay paused after LAUNCH instead of sending CONTINUE.
    pub stop_on_entry: bool,
    /// Largest payload accepted from the remote.
    pub max_payload_size: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl ConnectionConfig {
    pub fn new(process: ProcessConfig) -> Self {
        Self {
            process,
            ..Self::default()
        }
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            process: ProcessConfig::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stop_on_entry: false,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// The stock `mtldbg` command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Python interpreter that has the `mtldbg` module installed.
    #[serde(default = "default_python")]
    pub python: PathBuf,
    /// Debug database produced by the compiler.
    pub database: PathBuf,
    /// Path to the MUGEN executable.
    pub mugen: PathBuf,
    /// Second player character.
    #[serde(default)]
    pub p2: Option<String>,
    /// Whether the opponent AI is enabled.
    #[serde(default)]
    pub ai: Option<bool>,
}

fn default_python() -> PathBuf {
    PathBuf::from("python")
}

impl LaunchConfig {
    pub fn new(database: impl Into<PathBuf>, mugen: impl Into<PathBuf>) -> Self {
        Self {
            python: default_python(),
            database: database.into(),
            mugen: mugen.into(),
            p2: None,
            ai: None,
        }
    }

    /// Arguments after the interpreter, ending with the IPC mode flag.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            "mtldbg".to_string(),
            "-d".to_string(),
            self.database.display().to_string(),
            "-m".to_string(),
            self.mugen.display().to_string(),
        ];
        if let Some(p2) = &self.p2 {
            args.push("-p".to_string());
            args.push(p2.clone());
        }
        if let Some(ai) = self.ai {
            args.push("-a".to_string());
            args.push(if ai { "on" } else { "off" }.to_string());
        }
        args.push("-i".to_string());
        args
    }

    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig::new(&self.python).args(self.args())
    }
}

impl From<LaunchConfig> for ProcessConfig {
    fn from(launch: LaunchConfig) -> Self {
        launch.process_config()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
