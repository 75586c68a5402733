use mtlipc_frame::Command;
use mtlipc_peer::{Connection, NO_PARAMS};
use tracing::warn;

use crate::cmd::SendArgs;
use crate::exit::{peer_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_response, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let command = parse_command(&args.command)?;
    let payload = resolve_payload(args.json.as_deref())?;
    let config = args.remote.connection_config()?;

    let connection = Connection::connect(config)
        .await
        .map_err(|err| peer_error("connect failed", err))?;

    let result = connection.send_and_await(command, &payload).await;

    if let Err(err) = connection.disconnect().await {
        warn!(error = %err, "disconnect failed");
    }

    let response = result.map_err(|err| peer_error("send failed", err))?;
    print_response(&response, format);

    if args.check && !response.is_success() {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

fn parse_command(input: &str) -> CliResult<Command> {
    let command: Command = input
        .parse()
        .map_err(|err| CliError::new(USAGE, format!("{err}")))?;
    if command.is_event() {
        return Err(CliError::new(
            USAGE,
            format!("{command} is an event raised by the controller, not a request"),
        ));
    }
    Ok(command)
}

fn resolve_payload(json: Option<&str>) -> CliResult<Vec<u8>> {
    match json {
        Some(json) => {
            serde_json::from_str::<serde_json::Value>(json)
                .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
            Ok(json.as_bytes().to_vec())
        }
        None => Ok(NO_PARAMS.as_bytes().to_vec()),
    }
}
