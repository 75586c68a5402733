//! Drive the MTL debugger's remote controller over its standard streams.
//!
//! The controller (`python -m mtldbg -i`) exchanges 48-byte-header frames on
//! stdin/stdout. This crate bundles the layers that speak that protocol:
//!
//! - [`transport`]: spawning the controller and pumping its pipes
//! - [`frame`]: the wire codec and the stream reassembler
//! - [`peer`]: request correlation, events and the session lifecycle
//!   (behind the default `peer` feature)
//!
//! ```no_run
//! # async fn run() -> Result<(), mtlipc::peer::PeerError> {
//! use mtlipc::peer::{Connection, ConnectionConfig, EventKind, LaunchConfig};
//!
//! let launch = LaunchConfig::new("build/kfm.mdbg", "C:/mugen/mugen.exe");
//! let mut config = ConnectionConfig::new(launch.process_config());
//! config.stop_on_entry = true;
//!
//! let connection = Connection::connect(config).await?;
//! connection.events().on(EventKind::HitBreakpoint, |event| {
//!     println!("breakpoint hit by player {:?}", event.owner());
//! });
//! connection.continue_execution().await?;
//! connection.disconnect().await?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use mtlipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mtlipc_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use mtlipc_peer::*;
}
