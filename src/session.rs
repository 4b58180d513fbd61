//! One connected sensor.
//!
//! A session runs two duties over the same connection until either ends it:
//!
//! - the command duty relays operator commands to the sensor;
//! - the receive duty decodes telemetry from the sensor and appends it to
//!   the log.
//!
//! They share a [`RunningFlag`] and the connection's write half. Clearing the
//! flag wakes whichever duty is blocked on input or on a socket read, so a
//! session ended by one duty is observed by the other immediately. Closing the
//! write half is idempotent, so both duties (and the session driver) may
//! attempt it.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::config::{Config, Framing};
use crate::framing::Framer;
use crate::operator::{self, OperatorInput};
use crate::record::TelemetryRecord;
use crate::storage::TelemetryLog;

/// Shared termination signal for one session.
///
/// Starts set; once cleared it stays cleared.
#[derive(Debug)]
pub struct RunningFlag {
    running: AtomicBool,
    notify: Notify,
}

impl RunningFlag {
    pub fn new() -> Self {
        RunningFlag {
            running: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the flag and wake every waiter. Returns true for the call that
    /// actually cleared it.
    pub fn clear(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            self.notify.notify_waiters();
        }
        was_running
    }

    /// Resolve once the flag has been cleared.
    pub async fn cleared(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent clear is not missed
            notified.as_mut().enable();

            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Write side of the connection, shared by the duties.
#[derive(Debug)]
pub struct PeerWriter<W> {
    inner: Mutex<Option<W>>,
}

impl<W: AsyncWrite + Unpin> PeerWriter<W> {
    pub fn new(writer: W) -> Self {
        PeerWriter {
            inner: Mutex::new(Some(writer)),
        }
    }

    /// Write the whole payload. Fails with `NotConnected` once closed.
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(payload).await?;
                writer.flush().await
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            )),
        }
    }

    /// Shut down and drop the write half. Returns true for the call that
    /// actually closed it; later calls do nothing.
    pub async fn close(&self) -> bool {
        let taken = self.inner.lock().await.take();
        match taken {
            Some(mut writer) => {
                if let Err(e) = writer.shutdown().await {
                    debug!(error = %e, "Error shutting down connection");
                }
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

/// Failures that end a session
#[derive(Debug)]
pub enum SessionError {
    /// Writing a command to the sensor failed
    Send(io::Error),
    /// Reading from the sensor failed
    Receive(io::Error),
    /// Opening or writing the telemetry log failed
    Storage(PathBuf, io::Error),
    /// A duty task panicked or was aborted
    Task(tokio::task::JoinError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Send(e) => write!(f, "Failed to send command: {}", e),
            SessionError::Receive(e) => write!(f, "Failed to receive data: {}", e),
            SessionError::Storage(path, e) => {
                write!(f, "Failed to write '{}': {}", path.display(), e)
            }
            SessionError::Task(e) => write!(f, "Session task failed: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

/// How the command duty ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandExit {
    /// Operator entered `exit`
    Operator,
    /// The other duty ended the session
    Stopped,
    /// No more operator input will arrive
    InputClosed,
}

/// How the receive duty ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveExit {
    /// Sensor closed its side
    PeerClosed,
    /// The other duty ended the session
    Stopped,
}

/// Tally kept by the receive duty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub exit: ReceiveExit,
    pub stored: u64,
    pub discarded: u64,
}

/// Per-session receive settings
#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    pub output: PathBuf,
    pub read_buffer_size: usize,
    pub framing: Framing,
}

impl From<&Config> for ReceiveSettings {
    fn from(config: &Config) -> Self {
        ReceiveSettings {
            output: config.output.clone(),
            read_buffer_size: config.read_buffer_size,
            framing: config.framing,
        }
    }
}

/// Relay operator commands to the sensor until the session ends.
pub async fn command_duty<W>(
    input: Arc<OperatorInput>,
    writer: Arc<PeerWriter<W>>,
    flag: Arc<RunningFlag>,
) -> Result<CommandExit, SessionError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        operator::prompt();

        let line = tokio::select! {
            biased;
            _ = flag.cleared() => return Ok(CommandExit::Stopped),
            line = input.next_line() => line,
        };

        let Some(line) = line else {
            warn!("Operator input closed, commands disabled for this session");
            return Ok(CommandExit::InputClosed);
        };

        let command = Command::parse(&line);
        let Some(payload) = command.payload() else {
            debug!(input = %line.trim(), "Unrecognized command");
            operator::report("Unrecognized command.");
            continue;
        };

        // A sensor that stops reading must not hold the duty past the session
        let sent = tokio::select! {
            biased;
            _ = flag.cleared() => return Ok(CommandExit::Stopped),
            sent = writer.send(payload) => sent,
        };
        if let Err(e) = sent {
            flag.clear();
            writer.close().await;
            return Err(SessionError::Send(e));
        }
        debug!(?command, "Command sent");

        match command {
            Command::Start => operator::report("Data transmission started."),
            Command::Stop => operator::report("Data transmission stopped."),
            Command::Exit => {
                operator::report("Closing connection with the sensor.");
                flag.clear();
                writer.close().await;
                return Ok(CommandExit::Operator);
            }
            Command::Unrecognized(_) => {}
        }
    }
}

/// Decode telemetry from the sensor and append it to the log until the
/// session ends.
pub async fn receive_duty<R>(
    mut reader: R,
    settings: ReceiveSettings,
    flag: Arc<RunningFlag>,
) -> Result<ReceiveSummary, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut log = match TelemetryLog::open(&settings.output).await {
        Ok(log) => log,
        Err(e) => {
            flag.clear();
            return Err(SessionError::Storage(settings.output, e));
        }
    };

    let mut framer = Framer::new(settings.framing);
    let mut buffer = vec![0u8; settings.read_buffer_size];
    let mut discarded = 0;

    let exit = loop {
        let read = tokio::select! {
            biased;
            _ = flag.cleared() => break ReceiveExit::Stopped,
            read = reader.read(&mut buffer) => read,
        };

        let n = match read {
            Ok(n) => n,
            Err(e) => {
                flag.clear();
                return Err(SessionError::Receive(e));
            }
        };

        if n == 0 {
            if let Some(rest) = framer.finish() {
                discarded += store_frame(&mut log, &rest, &flag).await?;
            }
            info!("Connection closed by the sensor");
            flag.clear();
            break ReceiveExit::PeerClosed;
        }

        for frame in framer.push(&buffer[..n]) {
            discarded += store_frame(&mut log, &frame, &flag).await?;
        }
    };

    Ok(ReceiveSummary {
        exit,
        stored: log.appended(),
        discarded,
    })
}

/// Decode and persist one frame. Returns the number of frames discarded
/// (0 or 1); a log write failure ends the session.
async fn store_frame(
    log: &mut TelemetryLog,
    frame: &[u8],
    flag: &RunningFlag,
) -> Result<u64, SessionError> {
    let record = match TelemetryRecord::decode(frame) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, bytes = frame.len(), "Failed to decode telemetry");
            return Ok(1);
        }
    };

    match log.append(record).await {
        Ok(stored) => {
            info!(fields = stored.field_count(), record = %stored, "Telemetry stored");
            Ok(0)
        }
        Err(e) => {
            flag.clear();
            Err(SessionError::Storage(log.path().to_path_buf(), e))
        }
    }
}

/// Outcome of both duties
#[derive(Debug)]
pub struct SessionReport {
    pub command: Result<CommandExit, SessionError>,
    pub receive: Result<ReceiveSummary, SessionError>,
}

impl SessionReport {
    fn log(&self) {
        match &self.command {
            Ok(exit) => debug!(?exit, "Command duty finished"),
            Err(e) => error!(error = %e, "Command duty failed"),
        }
        match &self.receive {
            Ok(summary) => info!(
                exit = ?summary.exit,
                stored = summary.stored,
                discarded = summary.discarded,
                "Receive duty finished"
            ),
            Err(e) => error!(error = %e, "Receive duty failed"),
        }
    }
}

/// Serve one connection until both duties have returned.
pub async fn run<S>(
    stream: S,
    input: Arc<OperatorInput>,
    settings: ReceiveSettings,
) -> SessionReport
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let flag = Arc::new(RunningFlag::new());
    let writer = Arc::new(PeerWriter::new(writer));

    let command = tokio::spawn(command_duty(input, Arc::clone(&writer), Arc::clone(&flag)));
    let receive = tokio::spawn(receive_duty(reader, settings, Arc::clone(&flag)));

    let (command, receive) = tokio::join!(command, receive);

    flag.clear();
    writer.close().await;

    let report = SessionReport {
        command: command.unwrap_or_else(|e| Err(SessionError::Task(e))),
        receive: receive.unwrap_or_else(|e| Err(SessionError::Task(e))),
    };
    report.log();
    report
}
