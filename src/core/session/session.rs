use crate::core::communication::{
    control::INTERRUPT, scan, CancelToken, Closer, ControlSequence, Marker, ScanEnd, ScanOutcome,
    Scanner, StreamReader, Transport,
};
use crate::core::session::{
    file_push::{self, FilePush},
    lease::{LeaseBook, LeaseEvent, LeaseHolder, LeaseStats, ReadLease},
    state::{SessionCounters, SessionState, SessionStatistics},
    writer::WriterGate,
};
use crate::domain::{
    config::{SerialSettings, SessionOptions},
    error::{ReplComError, ReplComResult},
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Notifications published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged(SessionState),
    /// Decoded device output
    Output(String),
    /// A failure the caller did not directly ask about
    Error(String),
    /// The connection is gone; `reason` is set when it was not requested
    Disconnected { reason: Option<String> },
}

/// Result of one raw-mode execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    /// Text the program printed
    pub output: String,
    /// Text of the device's error channel, usually a traceback
    pub error: String,
}

impl ExecOutput {
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Point-in-time view of a session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub statistics: SessionStatistics,
    pub leases: LeaseStats,
}

/// Handle on one device session.
///
/// Clones share the same connection. Output produced while no transaction
/// runs is published as [`SessionEvent::Output`] on the channel returned by
/// [`Session::new`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: String,
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    state: RwLock<SessionState>,
    link: Mutex<Option<Link>>,
    /// Serializes connect, transactions and teardown. Lock order: op, link, state.
    op_lock: Arc<Mutex<()>>,
    active_scan: StdMutex<Option<CancelToken>>,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<SessionEvent>,
    counters: Arc<SessionCounters>,
    leases: LeaseBook,
}

struct Link {
    settings: SerialSettings,
    reader: Arc<Mutex<StreamReader>>,
    writer: WriterGate,
    closer: Box<dyn Closer>,
    passthrough: Option<Passthrough>,
    generation: u64,
    connected_at: SystemTime,
}

struct Passthrough {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl Passthrough {
    async fn stop(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.handle).await {
            error!("Passthrough task failed: {}", e);
        }
    }
}

impl Drop for Passthrough {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Session {
    /// Create a disconnected session and the receiver for its events.
    pub fn new(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = SessionInner {
            id: uuid::Uuid::new_v4().to_string(),
            transport,
            options,
            state: RwLock::new(SessionState::Disconnected),
            link: Mutex::new(None),
            op_lock: Arc::new(Mutex::new(())),
            active_scan: StdMutex::new(None),
            generation: AtomicU64::new(0),
            events,
            counters: Arc::new(SessionCounters::default()),
            leases: LeaseBook::new(),
        };
        debug!(session = %inner.id, "Session created on {} transport", inner.transport.transport_type());
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Open the connection and start forwarding device output.
    pub async fn connect(&self, settings: &SerialSettings) -> ReplComResult<()> {
        let inner = &self.inner;
        let _op = Arc::clone(&inner.op_lock)
            .try_lock_owned()
            .map_err(|_| ReplComError::busy("connect"))?;

        inner.set_state_from(SessionState::Disconnected, SessionState::Connecting).await?;
        info!(session = %inner.id, "Connecting to {} at {} baud", settings.port, settings.baud_rate);

        let connection = match inner.transport.open(settings).await {
            Ok(connection) => connection,
            Err(e) => {
                inner.set_state(SessionState::Disconnected).await;
                inner.counters.record_error();
                error!(session = %inner.id, "Failed to open {}: {}", settings.port, e);
                return Err(match e {
                    ReplComError::OpenFailure { .. } => e,
                    other => ReplComError::OpenFailure {
                        message: other.to_string(),
                    },
                });
            }
        };

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut link = Link {
            settings: connection.settings,
            reader: Arc::new(Mutex::new(StreamReader::new(connection.reader))),
            writer: WriterGate::new(connection.writer, inner.leases.clone()),
            closer: connection.closer,
            passthrough: None,
            generation,
            connected_at: SystemTime::now(),
        };

        let mut slot = inner.link.lock().await;
        if let Err(e) = inner.start_passthrough(&mut link) {
            drop(slot);
            if let Err(close_error) = link.closer.close().await {
                warn!(session = %inner.id, "Error while closing {}: {}", settings.port, close_error);
            }
            inner.set_state(SessionState::Disconnected).await;
            return Err(e);
        }
        *slot = Some(link);
        let mut state = inner.state.write().await;
        inner.transition(&mut state, SessionState::Streaming);
        info!(session = %inner.id, "Connected to {}", settings.port);
        Ok(())
    }

    /// Close the connection. Calling this while already disconnected does nothing.
    ///
    /// A running transaction is cancelled and fails with a transport error.
    pub async fn disconnect(&self) -> ReplComResult<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.write().await;
            if state.is_connected() {
                inner.transition(&mut state, SessionState::Closing);
            }
        }
        let running = inner.active_scan().clone();
        if let Some(cancel) = running {
            cancel.cancel();
        }

        let _op = Arc::clone(&inner.op_lock).lock_owned().await;
        inner.disconnect_locked(None).await;
        Ok(())
    }

    /// Send text as-is, without suspending passthrough.
    pub async fn send_raw(&self, text: &str) -> ReplComResult<()> {
        self.send_bytes(text.as_bytes()).await
    }

    pub async fn send_bytes(&self, data: &[u8]) -> ReplComResult<()> {
        let inner = &self.inner;
        if !inner.state.read().await.is_connected() {
            return Err(ReplComError::WriterUnavailable);
        }
        let (writer, generation) = {
            let link = inner.link.lock().await;
            let link = link.as_ref().ok_or(ReplComError::WriterUnavailable)?;
            (link.writer.clone(), link.generation)
        };

        match writer.send(data).await {
            Ok(()) => {
                inner.counters.record_sent(data.len());
                Ok(())
            }
            Err(e) => {
                inner.counters.record_error();
                if e.is_fatal_to_connection() {
                    inner.spawn_fault_teardown(generation, e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Send Ctrl-C to the device.
    pub async fn interrupt(&self) -> ReplComResult<()> {
        self.send_bytes(&[INTERRUPT]).await
    }

    /// Send `control`, then collect text up to `marker`.
    pub async fn run_transaction(
        &self,
        control: &ControlSequence,
        marker: Marker,
    ) -> ReplComResult<String> {
        let mut transaction = self.inner.begin("transaction").await?;
        let result = transaction.exchange(control.as_bytes(), marker).await;
        transaction.finish(result).await
    }

    /// Execute `code` in raw mode and capture both output channels.
    pub async fn exec(&self, code: &str) -> ReplComResult<ExecOutput> {
        let mut transaction = self.inner.begin("exec").await?;
        let result = transaction
            .raw_exec(code, self.inner.options.interrupt_before_raw)
            .await;
        transaction.finish(result).await
    }

    /// Execute `code` and publish what it prints as session events.
    pub async fn run_code(&self, code: &str) -> ReplComResult<()> {
        let result = self.exec(code).await?;
        if !result.output.is_empty() {
            self.inner.emit(SessionEvent::Output(result.output));
        }
        if !result.error.is_empty() {
            self.inner.emit(SessionEvent::Error(result.error));
        }
        Ok(())
    }

    /// Replace `name` on the device with `content`.
    pub async fn write_file(&self, name: &str, content: &str) -> ReplComResult<()> {
        let push = FilePush::new(name, content);
        debug!(
            session = %self.inner.id,
            "Writing {} lines to {}{}",
            push.lines().len(),
            name,
            if push.skipped_trailing() { " (empty final line skipped)" } else { "" }
        );
        let result = self.exec(&push.script()).await?;
        device_result(result).map(|_| ())
    }

    /// Contents of `name` on the device, with `\r\n` normalized to `\n`.
    pub async fn read_file(&self, name: &str) -> ReplComResult<String> {
        let result = self.exec(&file_push::read_script(name)).await?;
        Ok(device_result(result)?.replace("\r\n", "\n"))
    }

    /// Entries of the device directory `path`.
    pub async fn list_files(&self, path: &str) -> ReplComResult<Vec<String>> {
        let result = self.exec(&file_push::list_script(path)).await?;
        Ok(device_result(result)?
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = &self.inner;
        let (port, baud_rate, connected_at) = match inner.link.lock().await.as_ref() {
            Some(link) => (
                Some(link.settings.port.clone()),
                Some(link.settings.baud_rate),
                Some(link.connected_at),
            ),
            None => (None, None, None),
        };
        SessionSnapshot {
            session_id: inner.id.clone(),
            state: self.state().await,
            port,
            baud_rate,
            statistics: inner.counters.snapshot(connected_at),
            leases: inner.leases.stats(),
        }
    }

    pub fn lease_stats(&self) -> LeaseStats {
        self.inner.leases.stats()
    }

    /// Recent lease activity, oldest first.
    pub fn lease_journal(&self) -> Vec<LeaseEvent> {
        self.inner.leases.journal()
    }
}

/// Turn a non-empty error channel into a device error.
fn device_result(result: ExecOutput) -> ReplComResult<String> {
    if result.is_success() {
        Ok(result.output)
    } else {
        Err(ReplComError::Device(result.error.trim_end().to_string()))
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }

    fn active_scan(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.active_scan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, state: &mut SessionState, next: SessionState) {
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            warn!(session = %self.id, "Unexpected state change {} -> {}", state, next);
        }
        debug!(session = %self.id, "State {} -> {}", state, next);
        *state = next;
        self.emit(SessionEvent::StateChanged(next));
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        self.transition(&mut state, next);
    }

    async fn set_state_from(&self, expected: SessionState, next: SessionState) -> ReplComResult<()> {
        let mut state = self.state.write().await;
        if *state != expected {
            return Err(ReplComError::InvalidState {
                state: state.to_string(),
            });
        }
        self.transition(&mut state, next);
        Ok(())
    }

    /// Claim the read end for passthrough and forward everything it yields.
    fn start_passthrough(self: &Arc<Self>, link: &mut Link) -> ReplComResult<()> {
        let mut lease = ReadLease::try_acquire(&link.reader, LeaseHolder::Passthrough, &self.leases)?;
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let events = self.events.clone();
        let counters = Arc::clone(&self.counters);
        let session: Weak<Self> = Arc::downgrade(self);
        let generation = link.generation;

        let handle = tokio::spawn(async move {
            let mut forward = |text: &str| {
                counters.record_received(text.len());
                let _ = events.send(SessionEvent::Output(text.to_string()));
            };
            let result = scan(&mut lease, Scanner::passthrough(), &task_cancel, None, &mut forward).await;
            drop(lease);

            let reason = match result {
                Ok(outcome) if outcome.end == ScanEnd::Cancelled => return,
                Ok(_) => "device closed the connection".to_string(),
                Err(e) => e.to_string(),
            };
            if let Some(session) = session.upgrade() {
                warn!(session = %session.id, "Passthrough stopped: {}", reason);
                session.counters.record_error();
                session.emit(SessionEvent::Error(reason.clone()));
                session.spawn_fault_teardown(generation, reason);
            }
        });

        link.passthrough = Some(Passthrough { cancel, handle });
        Ok(())
    }

    /// Tear down connection `generation` after a transport fault, unless it
    /// has already been replaced or closed.
    fn spawn_fault_teardown(self: &Arc<Self>, generation: u64, reason: String) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let _op = Arc::clone(&session.op_lock).lock_owned().await;
            let current = session.link.lock().await.as_ref().map(|link| link.generation);
            if current == Some(generation) {
                session.disconnect_locked(Some(reason)).await;
            }
        });
    }

    /// Close the link. Caller must hold the op lock.
    async fn disconnect_locked(&self, reason: Option<String>) {
        let link = self.link.lock().await.take();
        let Some(mut link) = link else {
            self.set_state(SessionState::Disconnected).await;
            return;
        };

        self.set_state(SessionState::Closing).await;
        if let Some(passthrough) = link.passthrough.take() {
            passthrough.stop().await;
        }
        if let Err(e) = link.closer.close().await {
            warn!(session = %self.id, "Error while closing {}: {}", link.settings.port, e);
        }
        self.set_state(SessionState::Disconnected).await;

        match &reason {
            Some(reason) => warn!(session = %self.id, "Disconnected from {}: {}", link.settings.port, reason),
            None => info!(session = %self.id, "Disconnected from {}", link.settings.port),
        }
        self.emit(SessionEvent::Disconnected { reason });
    }

    /// Suspend passthrough and hand the read end to a new transaction.
    async fn begin(self: &Arc<Self>, name: &'static str) -> ReplComResult<Transaction> {
        let op = Arc::clone(&self.op_lock)
            .try_lock_owned()
            .map_err(|_| ReplComError::busy(name))?;

        let mut slot = self.link.lock().await;
        let mut state = self.state.write().await;
        match *state {
            SessionState::Streaming => {}
            SessionState::Disconnected => return Err(ReplComError::WriterUnavailable),
            other => {
                return Err(ReplComError::InvalidState {
                    state: other.to_string(),
                })
            }
        }
        let link = slot.as_mut().ok_or(ReplComError::WriterUnavailable)?;

        if let Some(passthrough) = link.passthrough.take() {
            passthrough.stop().await;
        }
        let lease = match ReadLease::try_acquire(&link.reader, LeaseHolder::Transaction, &self.leases) {
            Ok(lease) => lease,
            Err(e) => {
                if let Err(restart) = self.start_passthrough(link) {
                    warn!(session = %self.id, "Could not restart passthrough: {}", restart);
                }
                return Err(e);
            }
        };

        let cancel = CancelToken::new();
        *self.active_scan() = Some(cancel.clone());
        self.transition(&mut state, SessionState::Executing);
        debug!(session = %self.id, "Transaction '{}' started", name);

        Ok(Transaction {
            session: Arc::clone(self),
            name,
            lease: Some(lease),
            writer: link.writer.clone(),
            cancel,
            finished: false,
            op: Some(op),
        })
    }

    /// Give the read end back to passthrough if the connection survived.
    async fn resume_after_transaction(self: &Arc<Self>) {
        let mut slot = self.link.lock().await;
        let Some(link) = slot.as_mut() else {
            return;
        };
        let mut state = self.state.write().await;
        if *state != SessionState::Executing {
            return;
        }
        match self.start_passthrough(link) {
            Ok(()) => self.transition(&mut state, SessionState::Streaming),
            Err(e) => error!(session = %self.id, "Could not resume passthrough: {}", e),
        }
    }
}

/// A write-then-scan exchange that owns the read end until finished.
///
/// Dropping an unfinished transaction still resumes passthrough, from a
/// spawned task.
struct Transaction {
    session: Arc<SessionInner>,
    name: &'static str,
    lease: Option<ReadLease>,
    writer: WriterGate,
    cancel: CancelToken,
    finished: bool,
    op: Option<OwnedMutexGuard<()>>,
}

impl Transaction {
    fn interrupted(&self) -> ReplComError {
        ReplComError::transport(format!(
            "connection closed while {} was running",
            self.name
        ))
    }

    async fn send(&mut self, data: &[u8]) -> ReplComResult<()> {
        if self.cancel.is_cancelled() {
            return Err(self.interrupted());
        }
        self.writer.send(data).await?;
        self.session.counters.record_sent(data.len());
        Ok(())
    }

    async fn scan_until(&mut self, marker: Marker) -> ReplComResult<ScanOutcome> {
        let reader = self.lease.as_mut().ok_or_else(|| ReplComError::InvalidState {
            state: "transaction already finished".to_string(),
        })?;
        let counters = &self.session.counters;
        let mut count = |text: &str| counters.record_received(text.len());

        let outcome = scan(
            reader,
            Scanner::new(marker),
            &self.cancel,
            self.session.options.scan_timeout,
            &mut count,
        )
        .await?;
        if outcome.end == ScanEnd::Cancelled {
            return Err(self.interrupted());
        }
        Ok(outcome)
    }

    async fn exchange(&mut self, control: &[u8], marker: Marker) -> ReplComResult<String> {
        self.send(control).await?;
        Ok(self.scan_until(marker).await?.text)
    }

    async fn raw_exec(&mut self, code: &str, interrupt_first: bool) -> ReplComResult<ExecOutput> {
        let control = ControlSequence::raw_exec(code, interrupt_first);
        self.send(control.as_bytes()).await?;

        let ack = self.scan_until(Marker::raw_ack()).await?;
        if !ack.found_marker() {
            return Err(ReplComError::Device(
                "device did not acknowledge raw mode".to_string(),
            ));
        }
        let output = self.scan_until(Marker::end_of_section()).await?;
        let error = if output.found_marker() {
            self.scan_until(Marker::end_of_section()).await?.text
        } else {
            String::new()
        };
        Ok(ExecOutput {
            output: output.text,
            error,
        })
    }

    /// Release the read end and restore passthrough, or tear the connection
    /// down if `result` says it is broken.
    async fn finish<T>(mut self, result: ReplComResult<T>) -> ReplComResult<T> {
        self.finished = true;
        self.lease.take();
        self.session.active_scan().take();

        let session = Arc::clone(&self.session);
        session.counters.record_transaction(result.is_ok());
        let failure = result
            .as_ref()
            .err()
            .map(|e| (e.is_fatal_to_connection(), e.to_string()));
        match failure {
            None => debug!(session = %session.id, "Transaction '{}' completed", self.name),
            Some((true, reason)) => {
                if *session.state.read().await != SessionState::Closing {
                    error!(session = %session.id, "Transaction '{}' failed: {}", self.name, reason);
                    session.counters.record_error();
                    session.emit(SessionEvent::Error(reason.clone()));
                    session.disconnect_locked(Some(reason)).await;
                }
                return result;
            }
            Some((false, reason)) => {
                warn!(session = %session.id, "Transaction '{}' failed: {}", self.name, reason)
            }
        }
        session.resume_after_transaction().await;
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.lease.take();
        self.session.active_scan().take();

        let session = Arc::clone(&self.session);
        let op = self.op.take();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _op = op;
                session.resume_after_transaction().await;
            });
        }
    }
}
