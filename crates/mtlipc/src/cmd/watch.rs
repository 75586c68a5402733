use std::sync::Arc;

use mtlipc_peer::{Connection, ConnectionNotice, RemoteEvent};
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::cmd::{ctrlc_error, WatchArgs};
use crate::exit::{peer_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, OutputFormat};

enum Stop {
    Count,
    RemoteExited,
    Closed(String),
    Interrupted,
}

pub async fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.remote.connection_config()?;
    let resume = !config.stop_on_entry;
    // Subscribe before the remote runs so no early event is missed.
    config.stop_on_entry = true;

    let interrupted = Arc::new(Notify::new());
    let handler = Arc::clone(&interrupted);
    ctrlc::set_handler(move || handler.notify_one()).map_err(ctrlc_error)?;

    let connection = Connection::connect(config)
        .await
        .map_err(|err| peer_error("connect failed", err))?;
    let mut events = connection.subscribe();
    let mut notices = connection.notices();

    if resume {
        let resumed = connection
            .continue_execution()
            .await
            .map_err(|err| peer_error("continue failed", err))?;
        if !resumed.is_success() {
            if let Err(err) = connection.disconnect().await {
                warn!(error = %err, "disconnect failed");
            }
            return Err(CliError::new(FAILURE, format!("continue failed: {}", resumed.describe())));
        }
    }

    let mut printed = 0usize;
    let stop = loop {
        tokio::select! {
            _ = interrupted.notified() => break Stop::Interrupted,
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, format);
                    printed = printed.saturating_add(1);
                    if matches!(event, RemoteEvent::Exited(_)) {
                        break Stop::RemoteExited;
                    }
                    if args.count.is_some_and(|count| printed >= count) {
                        break Stop::Count;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "output fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break Stop::Closed("event channel closed".to_string());
                }
            },
            notice = notices.recv() => match notice {
                Ok(ConnectionNotice::RemoteExited) => break Stop::RemoteExited,
                Ok(ConnectionNotice::Closed { reason }) => break Stop::Closed(reason),
                Err(_) => break Stop::Closed("notice channel closed".to_string()),
            },
        }
    };

    if let Err(err) = connection.disconnect().await {
        warn!(error = %err, "disconnect failed");
    }

    match stop {
        Stop::Count | Stop::RemoteExited | Stop::Interrupted => {
            info!(printed, "watch finished");
            Ok(SUCCESS)
        }
        Stop::Closed(reason) => Err(CliError::new(FAILURE, format!("connection lost: {reason}"))),
    }
}
