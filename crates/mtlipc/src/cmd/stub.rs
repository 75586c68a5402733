use mtlipc_frame::{Command, Frame, FrameReader, FrameWriter, ResponseKind};
use mtlipc_peer::{
    BreakpointMode, ClearBreakpointsParams, DetailCode, PlayerParams, SetBreakpointParams,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::cmd::StubArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};

/// Serve the controller protocol on stdin/stdout until EXIT or EOF.
pub fn run(args: StubArgs) -> CliResult<i32> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = FrameReader::new(stdin.lock());
    let mut writer = FrameWriter::new(stdout.lock());
    let mut controller = StubController::new(args);

    info!("stub controller ready");
    for request in &mut reader {
        let request = request.map_err(|err| frame_error("failed reading request", err))?;
        let reply = controller.handle(&request);
        for frame in &reply.frames {
            writer
                .write_frame(frame)
                .map_err(|err| frame_error("failed writing reply", err))?;
        }
        if reply.exit {
            info!("stub controller exiting");
            break;
        }
    }
    Ok(SUCCESS)
}

#[derive(Debug, Default)]
struct Reply {
    frames: Vec<Frame>,
    exit: bool,
}

/// In-memory stand-in for the debugger: one fighter, no game.
struct StubController {
    owner: i64,
    break_on_continue: bool,
    launched: bool,
    running: bool,
    breakpoints: Vec<SetBreakpointParams>,
}

impl StubController {
    fn new(args: StubArgs) -> Self {
        Self {
            owner: args.owner,
            break_on_continue: args.break_on_continue,
            launched: false,
            running: false,
            breakpoints: Vec::new(),
        }
    }

    fn handle(&mut self, request: &Frame) -> Reply {
        debug!(command = %request.command, "stub request");
        match self.dispatch(request) {
            Ok(reply) => reply,
            Err(Failure::Error(code)) => respond(request, ResponseKind::Error, code.as_str()),
            Err(Failure::Exception(message)) => {
                let detail = json!({
                    "message": message,
                    "send_params": request.payload_str(),
                });
                respond(request, ResponseKind::Exception, &detail.to_string())
            }
        }
    }

    fn dispatch(&mut self, request: &Frame) -> Result<Reply, Failure> {
        match request.command {
            Command::Launch => {
                self.launched = true;
                let detail = json!({ "pid": std::process::id() });
                return Ok(respond(request, ResponseKind::Success, &detail.to_string()));
            }
            Command::Exit => {
                // The real controller never answers EXIT.
                return Ok(Reply {
                    frames: Vec::new(),
                    exit: true,
                });
            }
            _ if !self.launched => return Err(Failure::Error(DetailCode::NotRunning)),
            _ => {}
        }

        let reply = match request.command {
            Command::Continue => {
                self.running = true;
                let mut reply = success(request, "");
                if self.break_on_continue {
                    self.running = false;
                    reply.frames.push(self.owner_event(Command::IpcHitBreakpoint));
                }
                reply
            }
            Command::Step => {
                let mut reply = success(request, "");
                reply.frames.push(self.owner_event(Command::IpcStep));
                reply
            }
            Command::Stop => {
                self.running = false;
                success(request, "")
            }
            Command::IpcPause => {
                if !self.running {
                    return Err(Failure::Error(DetailCode::AlreadyPaused));
                }
                self.running = false;
                success(request, &json!({ "firstPlayerID": self.owner }).to_string())
            }
            Command::IpcListPlayers => {
                success(request, &json!([{ "id": self.owner }]).to_string())
            }
            Command::IpcGetTeamside => {
                self.player(request)?;
                success(request, &json!({ "teamside": 1 }).to_string())
            }
            Command::IpcSetStepTarget => {
                self.player(request)?;
                success(request, "")
            }
            Command::IpcSetBreakpoint => {
                let params: SetBreakpointParams = params(request)?;
                let detail = json!({
                    "filename": params.path,
                    "line": params.line,
                    "id": self.breakpoints.len(),
                });
                self.breakpoints.push(params);
                success(request, &detail.to_string())
            }
            Command::IpcClearBreakpoints => {
                let params: ClearBreakpointsParams = params(request)?;
                self.breakpoints.retain(|bp| bp.path != params.path);
                success(request, &self.breakpoint_listing().to_string())
            }
            _ => return Err(Failure::Error(DetailCode::UnrecognizedCommand)),
        };
        Ok(reply)
    }

    fn player(&self, request: &Frame) -> Result<(), Failure> {
        let params: PlayerParams = params(request)?;
        if i64::from(params.player) != self.owner {
            return Err(Failure::Error(DetailCode::PlayerNotExist));
        }
        Ok(())
    }

    fn owner_event(&self, command: Command) -> Frame {
        Frame::event(
            command,
            ResponseKind::Success,
            json!({ "owner": self.owner }).to_string(),
        )
    }

    fn breakpoint_listing(&self) -> serde_json::Value {
        let listing = |mode: BreakpointMode| {
            self.breakpoints
                .iter()
                .enumerate()
                .filter(|(_, bp)| bp.mode == mode)
                .map(|(id, bp)| json!({ "filename": bp.path, "line": bp.line, "id": id }))
                .collect::<Vec<_>>()
        };
        json!({
            "breakpoints": listing(BreakpointMode::Break),
            "passpoints": listing(BreakpointMode::Pass),
        })
    }
}

enum Failure {
    Error(DetailCode),
    Exception(String),
}

fn params<T: DeserializeOwned>(request: &Frame) -> Result<T, Failure> {
    let value: serde_json::Value = serde_json::from_slice(&request.payload)
        .map_err(|err| Failure::Exception(format!("malformed parameters: {err}")))?;
    serde_json::from_value(value).map_err(|_| Failure::Error(DetailCode::InvalidInput))
}

fn respond(request: &Frame, kind: ResponseKind, detail: &str) -> Reply {
    Reply {
        frames: vec![Frame::response(
            request.message_id,
            request.command,
            kind,
            detail.to_string(),
        )],
        exit: false,
    }
}

fn success(request: &Frame, detail: &str) -> Reply {
    respond(request, ResponseKind::Success, detail)
}

#[cfg(test)]
mod tests {
    use mtlipc_frame::MessageId;

    use super::*;

    fn request(command: Command, payload: &str) -> Frame {
        Frame::request(MessageId::random(), command, payload.to_string())
    }

    fn launched(args: StubArgs) -> StubController {
        let mut controller = StubController::new(args);
        let reply = controller.handle(&request(Command::Launch, "\"\""));
        assert_eq!(reply.frames[0].response_kind(), ResponseKind::Success);
        controller
    }

    fn detail(reply: &Reply) -> String {
        reply.frames[0].payload_str().into_owned()
    }

    #[test]
    fn requests_before_launch_are_rejected() {
        let mut controller = StubController::new(StubArgs::default());
        let reply = controller.handle(&request(Command::Continue, "\"\""));
        assert_eq!(reply.frames[0].response_kind(), ResponseKind::Error);
        assert_eq!(detail(&reply), "DEBUGGER_NOT_RUNNING");
    }

    #[test]
    fn continue_can_raise_breakpoint() {
        let mut controller = launched(StubArgs {
            owner: 3,
            break_on_continue: true,
        });
        let req = request(Command::Continue, "\"\"");
        let reply = controller.handle(&req);

        assert_eq!(reply.frames.len(), 2);
        assert_eq!(reply.frames[0].message_id, req.message_id);
        assert!(reply.frames[1].is_event());
        assert_eq!(reply.frames[1].command, Command::IpcHitBreakpoint);
        assert_eq!(reply.frames[1].payload_str(), r#"{"owner":3}"#);
    }

    #[test]
    fn exit_is_not_answered() {
        let mut controller = launched(StubArgs::default());
        let reply = controller.handle(&request(Command::Exit, "\"\""));
        assert!(reply.exit);
        assert!(reply.frames.is_empty());
    }

    #[test]
    fn pause_requires_running() {
        let mut controller = launched(StubArgs {
            owner: 56,
            break_on_continue: false,
        });
        let reply = controller.handle(&request(Command::IpcPause, "\"\""));
        assert_eq!(detail(&reply), "DEBUGGER_ALREADY_PAUSED");

        controller.handle(&request(Command::Continue, "\"\""));
        let reply = controller.handle(&request(Command::IpcPause, "\"\""));
        assert_eq!(detail(&reply), r#"{"firstPlayerID":56}"#);
    }

    #[test]
    fn parameter_problems_map_to_error_or_exception() {
        let mut controller = launched(StubArgs {
            owner: 56,
            break_on_continue: false,
        });

        let reply = controller.handle(&request(Command::IpcGetTeamside, r#"{"player":57}"#));
        assert_eq!(detail(&reply), "DEBUGGER_PLAYER_NOT_EXIST");

        let reply = controller.handle(&request(Command::IpcGetTeamside, r#"{"who":56}"#));
        assert_eq!(detail(&reply), "DEBUGGER_INVALID_INPUT");

        let reply = controller.handle(&request(Command::IpcGetTeamside, "{oops"));
        assert_eq!(reply.frames[0].response_kind(), ResponseKind::Exception);
        let body: serde_json::Value = serde_json::from_str(&detail(&reply)).unwrap();
        assert_eq!(body["send_params"], "{oops");
    }

    #[test]
    fn breakpoints_are_listed_after_clear() {
        let mut controller = launched(StubArgs::default());
        controller.handle(&request(
            Command::IpcSetBreakpoint,
            r#"{"path":"a.mtl","line":3,"mode":"bp"}"#,
        ));
        controller.handle(&request(
            Command::IpcSetBreakpoint,
            r#"{"path":"b.mtl","line":9,"mode":"pp"}"#,
        ));

        let reply = controller.handle(&request(Command::IpcClearBreakpoints, r#"{"path":"a.mtl"}"#));
        let body: serde_json::Value = serde_json::from_str(&detail(&reply)).unwrap();
        assert_eq!(body["breakpoints"].as_array().unwrap().len(), 0);
        assert_eq!(body["passpoints"][0]["line"], 9);
    }

    #[test]
    fn unknown_commands_are_unrecognized() {
        let mut controller = launched(StubArgs::default());
        let reply = controller.handle(&request(Command::Help, "\"\""));
        assert_eq!(detail(&reply), "DEBUGGER_UNRECOGNIZED_COMMAND");
    }
}
