//! Launch the debugger, set one breakpoint and report who hits it.
//!
//! Usage: breakpoint-watch <database> <mugen> <source-file> <line>

use std::error::Error;

use mtlipc::peer::{
    BreakpointMode, Connection, ConnectionConfig, ConnectionNotice, EventKind, LaunchConfig,
    RemoteEvent,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(database), Some(mugen), Some(source), Some(line)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        eprintln!("usage: breakpoint-watch <database> <mugen> <source-file> <line>");
        std::process::exit(64);
    };
    let line: u32 = line.parse()?;

    let launch = LaunchConfig::new(database, mugen);
    let mut config = ConnectionConfig::new(launch.process_config());
    config.stop_on_entry = true;

    let connection = Connection::connect(config).await?;
    connection.events().on(EventKind::HitBreakpoint, |event| {
        eprintln!("breakpoint hit by player {:?}", event.owner());
    });

    let placed = connection
        .set_breakpoint(source.as_str(), line, BreakpointMode::Break)
        .await?
        .into_result()?;
    println!("breakpoint set: {}", placed.detail);

    let mut events = connection.subscribe();
    let mut notices = connection.notices();
    connection.continue_execution().await?.into_result()?;

    loop {
        tokio::select! {
            event = events.recv() => match event? {
                RemoteEvent::HitBreakpoint(payload) => {
                    if let Some(owner) = payload.owner() {
                        let info = connection.player_info(owner as i32).await?;
                        println!("player {owner}: {}", info.detail);
                    }
                    connection.continue_execution().await?;
                }
                RemoteEvent::Exited(_) => break,
                _ => {}
            },
            notice = notices.recv() => {
                if let Ok(ConnectionNotice::Closed { reason }) = notice {
                    eprintln!("connection closed: {reason}");
                }
                break;
            }
        }
    }

    connection.disconnect().await?;
    Ok(())
}
