use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use mtlipc_frame::{encode_frame, Command, Frame, FrameConfig, FrameError, MessageId, ResponseKind};
use mtlipc_transport::ProcessSupervisor;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{PeerError, Result};

struct PendingEntry {
    command: Command,
    issued: Instant,
    tx: oneshot::Sender<Frame>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<MessageId, PendingEntry>,
    closed: bool,
}

fn lock(table: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request that has been written and is waiting for its reply.
///
/// Dropping it before the reply arrives removes its pending entry.
pub struct PendingResponse {
    id: MessageId,
    command: Command,
    rx: oneshot::Receiver<Frame>,
    table: Weak<Mutex<PendingTable>>,
}

impl PendingResponse {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn command(&self) -> Command {
        self.command
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        if lock(&table).entries.remove(&self.id).is_some() {
            debug!(command = %self.command, message_id = %self.id, "request abandoned before its reply");
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Matches replies to outstanding requests by message id.
///
/// Replies may arrive in any order relative to how requests were issued;
/// each resolves exactly the entry whose id it carries.
pub struct Correlator {
    pending: Arc<Mutex<PendingTable>>,
    supervisor: Arc<ProcessSupervisor>,
    frame_config: FrameConfig,
}

impl Correlator {
    pub fn new(supervisor: Arc<ProcessSupervisor>, frame_config: FrameConfig) -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingTable::default())),
            supervisor,
            frame_config,
        }
    }

    /// Insert a pending entry under a fresh id.
    ///
    /// Fails with [`PeerError::NotConnected`] once the table was closed.
    pub fn register(&self, command: Command) -> Result<(MessageId, oneshot::Receiver<Frame>)> {
        let mut table = self.table();
        if table.closed {
            return Err(PeerError::NotConnected);
        }

        let id = loop {
            let id = MessageId::random();
            if !id.is_sentinel() && !table.entries.contains_key(&id) {
                break id;
            }
        };

        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingEntry {
                command,
                issued: Instant::now(),
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Register, encode and write a request without waiting for the reply.
    pub async fn send_request(&self, command: Command, payload: &[u8]) -> Result<PendingResponse> {
        if payload.len() > self.frame_config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.frame_config.max_payload_size,
            }
            .into());
        }

        // Registered before writing: the reply can beat the write's return.
        // Every early return below drops `pending`, which removes the entry.
        let (id, rx) = self.register(command)?;
        let pending = PendingResponse {
            id,
            command,
            rx,
            table: Arc::downgrade(&self.pending),
        };

        let mut buf = BytesMut::new();
        encode_frame(&id, command, payload, &mut buf)?;

        if let Err(err) = self.write(buf.freeze()).await {
            warn!(%command, message_id = %id, error = %err, "failed to write request");
            return Err(err);
        }

        debug!(%command, message_id = %id, len = payload.len(), "sent request");
        Ok(pending)
    }

    /// Write one encoded frame from its own task.
    ///
    /// A caller that stops waiting cannot cut the frame short on the
    /// remote's stdin; the task finishes the write regardless.
    async fn write(&self, frame: Bytes) -> Result<()> {
        let supervisor = Arc::clone(&self.supervisor);
        let written = tokio::spawn(async move { supervisor.write(&frame).await });
        match written.await {
            Ok(result) => result.map_err(Into::into),
            Err(err) => Err(PeerError::Disconnected(format!(
                "request writer failed: {err}"
            ))),
        }
    }

    /// Wait for the reply to `pending`.
    ///
    /// On timeout the stale entry is removed, so a late reply is dropped.
    pub async fn await_response(
        &self,
        mut pending: PendingResponse,
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        let (id, command) = (pending.id, pending.command);

        let received = match timeout {
            Some(after) => match tokio::time::timeout(after, &mut pending.rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.cancel(&id);
                    debug!(%command, message_id = %id, ?after, "request timed out");
                    return Err(PeerError::Timeout { command, after });
                }
            },
            None => (&mut pending.rx).await,
        };

        received.map_err(|_| {
            PeerError::Disconnected(format!("connection closed before {command} was answered"))
        })
    }

    pub async fn send_and_await(
        &self,
        command: Command,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        let pending = self.send_request(command, payload).await?;
        self.await_response(pending, timeout).await
    }

    /// Complete the entry matching `frame`'s id. Returns false if none matched.
    pub fn resolve(&self, frame: Frame) -> bool {
        if frame.is_event() {
            warn!(command = %frame.command, "event frame passed to correlator, ignoring");
            return false;
        }

        let Some(entry) = self.table().entries.remove(&frame.message_id) else {
            debug!(
                message_id = %frame.message_id,
                command = %frame.command,
                "dropping response with no pending request"
            );
            return false;
        };

        match frame.response_kind() {
            ResponseKind::Success => debug!(
                command = %entry.command,
                message_id = %frame.message_id,
                elapsed = ?entry.issued.elapsed(),
                "request succeeded"
            ),
            ResponseKind::Exception => error!(
                command = %entry.command,
                detail = %frame.payload_str(),
                "remote raised an exception"
            ),
            kind => warn!(
                command = %entry.command,
                %kind,
                detail = %frame.payload_str(),
                "remote returned an error"
            ),
        }

        if entry.tx.send(frame).is_err() {
            debug!(command = %entry.command, "waiter went away before its response arrived");
        }
        true
    }

    /// Drop one pending entry; its waiter sees a disconnect.
    pub fn cancel(&self, id: &MessageId) -> bool {
        self.table().entries.remove(id).is_some()
    }

    /// Drop every pending entry, returning how many there were.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.table().entries.drain().collect();
        drained.len()
    }

    /// Clear the table and refuse further registrations.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut table = self.table();
            table.closed = true;
            table.entries.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending requests");
        }
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }

    pub fn pending_count(&self) -> usize {
        self.table().entries.len()
    }

    /// Age of the longest-waiting request.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.table()
            .entries
            .values()
            .map(|entry| entry.issued.elapsed())
            .max()
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        lock(&self.pending)
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use mtlipc_frame::Reassembler;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;

    fn correlator() -> (Arc<Correlator>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let supervisor = Arc::new(ProcessSupervisor::from_pipes(local));
        (
            Arc::new(Correlator::new(supervisor, FrameConfig::default())),
            remote,
        )
    }

    async fn read_requests(remote: &mut DuplexStream, count: usize) -> Vec<Frame> {
        let mut reassembler = Reassembler::new();
        let mut frames = Vec::new();
        let mut buf = [0u8; 1024];
        while frames.len() < count {
            let n = remote.read(&mut buf).await.unwrap();
            assert!(n > 0, "request stream closed early");
            frames.extend(reassembler.feed(&buf[..n]).unwrap());
        }
        frames
    }

    fn reply(request: &Frame, payload: &str) -> Frame {
        Frame::response(
            request.message_id,
            request.command,
            ResponseKind::Success,
            payload.to_string(),
        )
    }

    #[tokio::test]
    async fn responses_resolve_by_id_in_any_order() {
        let (correlator, mut remote) = correlator();

        let a = correlator.send_request(Command::IpcGetTeamside, b"{\"player\":56}").await.unwrap();
        let b = correlator.send_request(Command::IpcGetPlayerInfo, b"{\"player\":57}").await.unwrap();
        let c = correlator.send_request(Command::IpcListPlayers, b"\"\"").await.unwrap();
        assert_eq!(correlator.pending_count(), 3);

        let requests = read_requests(&mut remote, 3).await;
        assert_eq!(requests[0].message_id, a.id());
        assert_eq!(requests[0].kind, Command::IpcGetTeamside.code());

        assert!(correlator.resolve(reply(&requests[2], "C")));
        assert!(correlator.resolve(reply(&requests[0], "A")));
        assert!(correlator.resolve(reply(&requests[1], "B")));

        let ra = correlator.await_response(a, None).await.unwrap();
        let rb = correlator.await_response(b, None).await.unwrap();
        let rc = correlator.await_response(c, None).await.unwrap();
        assert_eq!(ra.payload.as_ref(), b"A");
        assert_eq!(rb.payload.as_ref(), b"B");
        assert_eq!(rc.payload.as_ref(), b"C");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn resolve_removes_exactly_one_entry() {
        let (correlator, mut remote) = correlator();
        let first = correlator.send_request(Command::Step, b"\"\"").await.unwrap();
        let _second = correlator.send_request(Command::Step, b"\"\"").await.unwrap();

        let requests = read_requests(&mut remote, 2).await;
        assert!(correlator.resolve(reply(&requests[0], "{}")));
        assert_eq!(correlator.pending_count(), 1);

        // A duplicate reply has nothing left to resolve.
        assert!(!correlator.resolve(reply(&requests[0], "{}")));
        assert_eq!(correlator.pending_count(), 1);
        assert!(correlator.await_response(first, None).await.is_ok());
    }

    #[tokio::test]
    async fn timeout_removes_pending_entry() {
        let (correlator, mut remote) = correlator();
        let pending = correlator.send_request(Command::Exit, b"\"\"").await.unwrap();
        let request = read_requests(&mut remote, 1).await.remove(0);

        let err = correlator
            .await_response(pending, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Timeout { command: Command::Exit, .. }));
        assert_eq!(correlator.pending_count(), 0);

        // The late reply is dropped quietly.
        assert!(!correlator.resolve(reply(&request, "{}")));
    }

    #[tokio::test]
    async fn close_fails_waiters_and_rejects_new_requests() {
        let (correlator, _remote) = correlator();
        let pending = correlator.send_request(Command::Continue, b"\"\"").await.unwrap();
        assert!(correlator.oldest_pending_age().is_some());

        assert_eq!(correlator.close(), 1);
        let err = correlator.await_response(pending, None).await.unwrap_err();
        assert!(matches!(err, PeerError::Disconnected(_)));

        let err = correlator.send_request(Command::Continue, b"\"\"").await.unwrap_err();
        assert!(matches!(err, PeerError::NotConnected));
        assert!(correlator.is_closed());
        assert!(correlator.oldest_pending_age().is_none());
    }

    #[tokio::test]
    async fn write_failure_removes_entry() {
        let (correlator, remote) = correlator();
        drop(remote);

        let err = correlator.send_request(Command::Launch, b"\"\"").await.unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn abandoned_requests_leave_no_entry() {
        let (correlator, _remote) = correlator();

        for _ in 0..5 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(10),
                correlator.send_and_await(Command::IpcPause, b"\"\"", None),
            )
            .await;
            assert!(abandoned.is_err());
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropped_pending_response_removes_entry() {
        let (correlator, _remote) = correlator();
        let pending = correlator.send_request(Command::Step, b"\"\"").await.unwrap();
        assert_eq!(correlator.pending_count(), 1);

        drop(pending);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_send_still_writes_whole_frame() {
        // Too small for the frame, so the write blocks until the remote reads.
        let (local, mut remote) = tokio::io::duplex(16);
        let correlator = Correlator::new(
            Arc::new(ProcessSupervisor::from_pipes(local)),
            FrameConfig::default(),
        );
        let payload = vec![b'x'; 512];

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            correlator.send_request(Command::IpcGetTrigger, &payload),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(correlator.pending_count(), 0);

        let request = read_requests(&mut remote, 1).await.remove(0);
        assert_eq!(request.command, Command::IpcGetTrigger);
        assert_eq!(request.payload.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn sentinel_frames_are_never_resolved() {
        let (correlator, _remote) = correlator();
        let _pending = correlator.send_request(Command::Continue, b"\"\"").await.unwrap();

        let event = Frame::event(Command::IpcHitBreakpoint, ResponseKind::Success, "{}");
        assert!(!correlator.resolve(event));
        assert_eq!(correlator.pending_count(), 1);
        assert_eq!(correlator.clear(), 1);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_registering() {
        let (local, _remote) = tokio::io::duplex(64);
        let correlator = Correlator::new(
            Arc::new(ProcessSupervisor::from_pipes(local)),
            FrameConfig {
                max_payload_size: 4,
            },
        );

        let err = correlator
            .send_request(Command::IpcSetBreakpoint, b"{\"path\":\"x\"}")
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Frame(FrameError::PayloadTooLarge { .. })));
        assert_eq!(correlator.pending_count(), 0);
    }
}
