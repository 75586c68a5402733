//! Session layer for the MTL debugger IPC protocol.
//!
//! A [`Connection`] spawns the remote controller, launches it, and then lets
//! any number of tasks issue requests concurrently. Replies are matched to
//! requests by message id through the [`Correlator`]; frames on the sentinel
//! id are decoded into [`RemoteEvent`]s and delivered through the
//! [`EventSink`].

pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod events;
pub mod params;
pub mod response;

pub use config::{
    ConnectionConfig, LaunchConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use connection::{Connection, ConnectionNotice, ConnectionState};
pub use correlator::{Correlator, PendingResponse};
pub use error::{PeerError, Result};
pub use events::{EventKind, EventPayload, EventSink, ListenerId, RemoteEvent};
pub use params::{
    BreakpointMode, ClearBreakpointsParams, ListPlayersParams, PlayerParams, SetBreakpointParams,
    VariableScope, VariablesParams, NO_PARAMS,
};
pub use response::{DetailCode, Response, ResponseError};
