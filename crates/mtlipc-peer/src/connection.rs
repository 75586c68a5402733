use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mtlipc_frame::{Command, Frame, Reassembler};
use mtlipc_transport::{pump_output, ProcessOutput, ProcessSupervisor, PumpExit};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::correlator::Correlator;
use crate::error::{PeerError, Result};
use crate::events::{EventSink, RemoteEvent};
use crate::params::{
    BreakpointMode, ClearBreakpointsParams, ListPlayersParams, PlayerParams, SetBreakpointParams,
    VariableScope, VariablesParams, NO_PARAMS,
};
use crate::response::Response;

const NOTICE_CAPACITY: usize = 16;

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// Process spawned, waiting for LAUNCH to be acknowledged.
    Launching,
    Running,
    /// `disconnect` is sending STOP and EXIT.
    Stopping,
}

/// Unsolicited end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// The remote announced its own exit.
    RemoteExited,
    /// The remote's output closed or became unreadable.
    Closed { reason: String },
}

struct Shared {
    config: ConnectionConfig,
    supervisor: Arc<ProcessSupervisor>,
    correlator: Correlator,
    events: EventSink,
    state: watch::Sender<ConnectionState>,
    notices: broadcast::Sender<ConnectionNotice>,
    cancel: CancellationToken,
    /// The IPC_EXIT event the remote sent on its way out, if any.
    exit_report: Mutex<Option<Response>>,
}

impl Shared {
    fn record_exit(&self, frame: &Frame) {
        let report = Response::from(frame.clone());
        debug!(kind = %report.kind, detail = %report.detail, "remote announced exit");
        *self
            .exit_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report);
    }

    fn take_exit_report(&self) -> Option<Response> {
        self.exit_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Teardown after the reader loop ended on its own.
    async fn remote_gone(&self, notice: ConnectionNotice) {
        let failed = self.correlator.close();

        if *self.state.borrow() == ConnectionState::Stopping {
            // disconnect() owns the rest of the teardown.
            debug!(?notice, failed, "remote closed during disconnect");
            return;
        }

        if let Err(err) = self.supervisor.terminate().await {
            warn!(error = %err, "failed to terminate remote controller");
        }
        self.state.send_replace(ConnectionState::Disconnected);

        match &notice {
            ConnectionNotice::RemoteExited => info!(failed, "remote controller exited"),
            ConnectionNotice::Closed { reason } => {
                warn!(%reason, failed, "connection to remote controller closed")
            }
        }
        if self.notices.send(notice).is_err() {
            trace!("no notice subscribers");
        }
    }
}

/// One debugging session with a remote controller.
///
/// Owns the process, the reader task and all correlation state. Several
/// connections may coexist.
pub struct Connection {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Spawn the remote controller and launch it.
    ///
    /// Unless `stop_on_entry` is set, CONTINUE is sent once LAUNCH succeeds,
    /// so events raised right after launch may arrive before the caller has
    /// subscribed. Set `stop_on_entry` and call
    /// [`continue_execution`](Self::continue_execution) to observe them.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        info!(command = %config.process.command_line(), "connecting to remote controller");
        let (supervisor, output) = ProcessSupervisor::spawn(&config.process)?;
        Self::establish(supervisor, output, config).await
    }

    /// Run the same lifecycle over caller-provided pipes.
    pub async fn connect_with_pipes<R, W>(reader: R, writer: W, config: ConnectionConfig) -> Result<Self>
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self::establish(
            ProcessSupervisor::from_pipes(writer),
            ProcessOutput::new(reader),
            config,
        )
        .await
    }

    async fn establish(
        supervisor: ProcessSupervisor,
        output: ProcessOutput,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let supervisor = Arc::new(supervisor);
        let (state, _) = watch::channel(ConnectionState::Launching);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let shared = Arc::new(Shared {
            correlator: Correlator::new(Arc::clone(&supervisor), config.frame_config()),
            events: EventSink::new(config.event_capacity),
            supervisor,
            state,
            notices,
            cancel: CancellationToken::new(),
            exit_report: Mutex::new(None),
            config,
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&shared), output));
        let connection = Self {
            shared,
            reader: Mutex::new(Some(reader)),
        };

        match connection.start().await {
            Ok(()) => Ok(connection),
            Err(err) => {
                warn!(error = %err, "launch failed, tearing down");
                if let Err(teardown) = connection.finish().await {
                    debug!(error = %teardown, "teardown after failed launch");
                }
                Err(err)
            }
        }
    }

    async fn start(&self) -> Result<()> {
        match self.launch_and_resume().await {
            Err(err) if err.is_disconnect() => Err(self.launch_lost(err).await),
            other => other,
        }
    }

    /// A remote that cannot load its debug database never answers LAUNCH.
    /// It sends an IPC_EXIT event carrying the reason and exits, possibly
    /// before LAUNCH was even read. Report that event instead of the
    /// bare disconnect.
    async fn launch_lost(&self, err: PeerError) -> PeerError {
        let mut state = self.shared.state.subscribe();
        let settled = tokio::time::timeout(
            self.shared.config.shutdown_timeout,
            state.wait_for(|state| *state == ConnectionState::Disconnected),
        )
        .await
        .is_ok();
        if !settled {
            debug!("reader still running after launch was lost");
        }

        match self.shared.take_exit_report() {
            Some(report) => PeerError::LaunchRejected(Box::new(report)),
            None => err,
        }
    }

    async fn launch_and_resume(&self) -> Result<()> {
        let launch = self.launch().await?;
        if !launch.is_success() {
            return Err(PeerError::LaunchRejected(Box::new(launch)));
        }

        let running = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Launching {
                *state = ConnectionState::Running;
                true
            } else {
                false
            }
        });
        if !running {
            return Err(PeerError::Disconnected(
                "remote went away during launch".to_string(),
            ));
        }
        info!(
            pid = self.shared.supervisor.id(),
            detail = %launch.detail,
            "remote controller launched"
        );

        if !self.shared.config.stop_on_entry {
            let resumed = self.continue_execution().await?;
            if !resumed.is_success() {
                return Err(PeerError::LaunchRejected(Box::new(resumed)));
            }
        }
        Ok(())
    }

    /// Stop the session: STOP, then EXIT, then terminate the process.
    ///
    /// The remote does not answer EXIT; its silence until the shutdown
    /// timeout, or its output closing, both count as done. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let began = self.shared.state.send_if_modified(|state| match state {
            ConnectionState::Launching | ConnectionState::Running => {
                *state = ConnectionState::Stopping;
                true
            }
            _ => false,
        });

        if !began {
            let mut state = self.shared.state.subscribe();
            // Another caller is stopping, or the remote already left.
            if state
                .wait_for(|state| *state == ConnectionState::Disconnected)
                .await
                .is_err()
            {
                debug!("state channel closed while waiting for disconnect");
            }
            return self.finish().await;
        }

        info!("disconnecting from remote controller");
        if self.shared.supervisor.exit_status().is_some() || self.shared.correlator.is_closed() {
            debug!("remote already gone, skipping shutdown commands");
        } else if self.shutdown_command(Command::Stop).await {
            self.shutdown_command(Command::Exit).await;
        }

        self.finish().await
    }

    /// Returns false once the remote is known to be unreachable.
    async fn shutdown_command(&self, command: Command) -> bool {
        let timeout = Some(self.shared.config.shutdown_timeout);
        match self
            .shared
            .correlator
            .send_and_await(command, NO_PARAMS.as_bytes(), timeout)
            .await
        {
            Ok(frame) => {
                debug!(%command, kind = %frame.response_kind(), "shutdown command answered");
                true
            }
            Err(PeerError::Timeout { after, .. }) => {
                debug!(%command, ?after, "shutdown command not answered");
                true
            }
            Err(err) if err.is_disconnect() => {
                debug!(%command, "remote closed during shutdown");
                false
            }
            Err(err) => {
                warn!(%command, error = %err, "shutdown command failed");
                false
            }
        }
    }

    async fn finish(&self) -> Result<()> {
        self.shared.cancel.cancel();
        self.shared.correlator.close();
        let terminated = self.shared.supervisor.terminate().await;

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            if let Err(err) = reader.await {
                warn!(error = %err, "reader task ended abnormally");
            }
        }

        if self.shared.state.send_replace(ConnectionState::Disconnected)
            != ConnectionState::Disconnected
        {
            info!("disconnected from remote controller");
        }
        terminated.map_err(Into::into)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Running
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Unsolicited session endings.
    pub fn notices(&self) -> broadcast::Receiver<ConnectionNotice> {
        self.shared.notices.subscribe()
    }

    /// Listener registry and broadcast channel for remote events.
    pub fn events(&self) -> &EventSink {
        &self.shared.events
    }

    /// Shorthand for `events().subscribe()`.
    pub fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// OS process id of the remote, when it was spawned by us.
    pub fn pid(&self) -> Option<u32> {
        self.shared.supervisor.id()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.shared.correlator.oldest_pending_age()
    }

    /// Send `payload` as `command` and wait for the reply.
    ///
    /// ERROR and EXCEPTION replies are returned as `Ok`; see
    /// [`Response::into_result`].
    pub async fn send_and_await(&self, command: Command, payload: &[u8]) -> Result<Response> {
        self.request(command, payload, self.shared.config.request_timeout)
            .await
    }

    /// Send `params` serialized as JSON.
    pub async fn send_json<P: Serialize + ?Sized>(&self, command: Command, params: &P) -> Result<Response> {
        let payload = serde_json::to_vec(params)?;
        self.send_and_await(command, &payload).await
    }

    async fn request(
        &self,
        command: Command,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Response> {
        if self.state() == ConnectionState::Disconnected {
            return Err(PeerError::NotConnected);
        }
        let frame = self
            .shared
            .correlator
            .send_and_await(command, payload, timeout)
            .await?;
        Ok(Response::from(frame))
    }

    pub async fn launch(&self) -> Result<Response> {
        self.send_and_await(Command::Launch, NO_PARAMS.as_bytes()).await
    }

    pub async fn continue_execution(&self) -> Result<Response> {
        self.send_and_await(Command::Continue, NO_PARAMS.as_bytes()).await
    }

    /// Suspend immediately. The reply carries `firstPlayerID`.
    pub async fn pause(&self) -> Result<Response> {
        self.send_and_await(Command::IpcPause, NO_PARAMS.as_bytes()).await
    }

    pub async fn step(&self) -> Result<Response> {
        self.send_and_await(Command::Step, NO_PARAMS.as_bytes()).await
    }

    pub async fn stop(&self) -> Result<Response> {
        self.send_and_await(Command::Stop, NO_PARAMS.as_bytes()).await
    }

    /// Ask the remote to exit. It normally exits without answering, so this
    /// waits only for the shutdown timeout.
    pub async fn exit(&self) -> Result<Response> {
        self.request(
            Command::Exit,
            NO_PARAMS.as_bytes(),
            Some(self.shared.config.shutdown_timeout),
        )
        .await
    }

    pub async fn list_players(&self, include_enemy: bool) -> Result<Response> {
        self.send_json(Command::IpcListPlayers, &ListPlayersParams { include_enemy })
            .await
    }

    pub async fn player_info(&self, player: i32) -> Result<Response> {
        self.send_json(Command::IpcGetPlayerInfo, &PlayerParams { player })
            .await
    }

    pub async fn variables(&self, player: i32, scope: VariableScope) -> Result<Response> {
        self.send_json(Command::IpcGetVariables, &VariablesParams { player, scope })
            .await
    }

    pub async fn teamside(&self, player: i32) -> Result<Response> {
        self.send_json(Command::IpcGetTeamside, &PlayerParams { player })
            .await
    }

    /// Remove all breakpoints and passpoints in one source file.
    pub async fn clear_breakpoints(&self, path: impl Into<String>) -> Result<Response> {
        let params = ClearBreakpointsParams { path: path.into() };
        self.send_json(Command::IpcClearBreakpoints, &params).await
    }

    pub async fn set_breakpoint(
        &self,
        path: impl Into<String>,
        line: u32,
        mode: BreakpointMode,
    ) -> Result<Response> {
        let params = SetBreakpointParams {
            path: path.into(),
            line,
            mode,
        };
        self.send_json(Command::IpcSetBreakpoint, &params).await
    }

    pub async fn set_step_target(&self, player: i32) -> Result<Response> {
        self.send_json(Command::IpcSetStepTarget, &PlayerParams { player })
            .await
    }

    pub async fn trigger<P: Serialize + ?Sized>(&self, params: &P) -> Result<Response> {
        self.send_json(Command::IpcGetTrigger, params).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The reader exits and releases the process, which is killed on drop.
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pid", &self.pid())
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

/// Drain remote output, routing sentinel frames to events and the rest to
/// the correlator, in the order they complete.
async fn read_loop(shared: Arc<Shared>, output: ProcessOutput) {
    let mut reassembler = Reassembler::with_config(shared.config.frame_config());
    let mut ended: Option<ConnectionNotice> = None;

    let exit = pump_output(output, shared.cancel.clone(), |chunk| {
        // Frames ahead of a corrupt header are routed before giving up.
        let fed = reassembler.feed_each(chunk, |frame| {
            if frame.is_event() {
                if let RemoteEvent::Exited(_) = shared.events.dispatch(&frame) {
                    shared.record_exit(&frame);
                    ended = Some(ConnectionNotice::RemoteExited);
                }
            } else {
                shared.correlator.resolve(frame);
            }
        });

        if let Err(err) = fed {
            error!(error = %err, "remote output is corrupt");
            ended = Some(ConnectionNotice::Closed {
                reason: format!("corrupt frame stream: {err}"),
            });
            return ControlFlow::Break(());
        }

        if ended.is_some() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .await;

    let notice = match exit {
        PumpExit::Cancelled => {
            debug!("reader cancelled");
            return;
        }
        PumpExit::Stopped => ended.unwrap_or_else(|| ConnectionNotice::Closed {
            reason: "reader stopped".to_string(),
        }),
        PumpExit::Eof => ConnectionNotice::Closed {
            reason: "remote closed its output".to_string(),
        },
        PumpExit::Failed(err) => ConnectionNotice::Closed {
            reason: format!("failed reading remote output: {err}"),
        },
    };
    shared.remote_gone(notice).await;
}
