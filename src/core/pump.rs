//! Child process pump
//!
//! Spawns a child with its stdout and stderr merged into one anonymous pipe,
//! runs a single background thread that reads that pipe, and hands every chunk
//! to an output sink. Input is written synchronously from the caller's thread.

use std::io::{self, ErrorKind, PipeReader, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

const READER_THREAD_NAME: &str = "mikoterm-reader";
const RETRY_DELAY: Duration = Duration::from_millis(1);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Error, Debug)]
pub enum PumpError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Invalid command line: {0}")]
    InvalidCommand(#[source] shell_words::ParseError),

    #[error("Process is already running")]
    AlreadyRunning,

    #[error("Failed to create pipe: {0}")]
    PipeCreation(#[source] io::Error),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Child stdin was not captured")]
    MissingStdin,

    #[error("Failed to start reader thread: {0}")]
    ThreadSpawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PumpError>;

/// Callback receiving output chunks on the reader thread
pub type OutputSink = Box<dyn FnMut(&[u8]) + Send + 'static>;

// The reader clones the inner Arc and calls the sink outside the slot lock,
// so replacing the sink never waits on a sink call that is blocked.
type SharedSink = Arc<Mutex<OutputSink>>;
type SinkSlot = Arc<Mutex<Option<SharedSink>>>;

/// Tunables for a [`ProcessPump`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOptions {
    /// Upper bound on bytes per read, and so per sink call
    pub read_chunk_size: usize,
    /// How long `shutdown` waits for the reader thread before detaching it
    pub shutdown_timeout: Duration,
}

impl PumpOptions {
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            read_chunk_size: Self::DEFAULT_READ_CHUNK_SIZE,
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Owns one child process and the thread reading its output
pub struct ProcessPump {
    options: PumpOptions,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    /// Child alive and accepting input. Fresh per run, like `stop`.
    running: Arc<AtomicBool>,
    /// Set only by `shutdown`; the reader otherwise runs until EOF
    stop: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    sink: SinkSlot,
    exit_status: Option<ExitStatus>,
}

impl Default for ProcessPump {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessPump {
    pub fn new() -> Self {
        Self::with_options(PumpOptions::default())
    }

    pub fn with_options(options: PumpOptions) -> Self {
        Self {
            options,
            child: None,
            stdin: None,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
            sink: Arc::new(Mutex::new(None)),
            exit_status: None,
        }
    }

    /// Spawn `command` and start reading its output.
    ///
    /// The command line is split into program and arguments with POSIX shell
    /// quoting rules, so `sh -c 'echo a b'` passes `echo a b` as one argument.
    /// No shell is involved otherwise.
    pub fn initialize(&mut self, command: &str) -> Result<()> {
        if self.is_running() {
            return Err(PumpError::AlreadyRunning);
        }
        // Reap whatever an earlier run left behind
        self.shutdown();
        self.exit_status = None;

        let words = shell_words::split(command).map_err(PumpError::InvalidCommand)?;
        let (program, args) = words.split_first().ok_or(PumpError::EmptyCommand)?;

        let (output_read, output_write) = io::pipe().map_err(PumpError::PipeCreation)?;
        let error_write = output_write
            .try_clone()
            .map_err(PumpError::PipeCreation)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(output_write)
            .stderr(error_write);
        let spawned = cmd.spawn();
        // The Command still holds the parent's write ends; EOF only arrives once they close
        drop(cmd);

        let mut child = spawned.map_err(|source| PumpError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let Some(stdin) = child.stdin.take() else {
            reap(&mut child);
            return Err(PumpError::MissingStdin);
        };

        let running = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let reader_thread = match spawn_reader(
            output_read,
            Arc::clone(&running),
            Arc::clone(&stop),
            Arc::clone(&self.sink),
            self.options.read_chunk_size.max(1),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                drop(stdin);
                reap(&mut child);
                return Err(e);
            }
        };

        info!("Started '{}' (pid {})", command, child.id());
        self.running = running;
        self.stop = stop;
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.reader_thread = Some(reader_thread);
        Ok(())
    }

    /// Write bytes to the child's stdin. Does nothing once the child has stopped.
    pub fn send_input(&mut self, bytes: &[u8]) {
        if !self.is_running() {
            return;
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        if let Err(e) = stdin.write_all(bytes).and_then(|()| stdin.flush()) {
            debug!("Write to child failed: {}", e);
            self.running.store(false, Ordering::SeqCst);
        }
    }

    /// Poll the child without blocking and record its exit status once available.
    ///
    /// Output the child wrote before exiting keeps flowing to the sink until
    /// the reader sees EOF; see [`output_closed`](Self::output_closed).
    pub fn update(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                info!("Child exited: {}", status);
                self.running.store(false, Ordering::SeqCst);
                self.exit_status = Some(status);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to poll child: {}", e),
        }
    }

    /// Install the callback for output chunks, replacing any previous one.
    ///
    /// The sink runs on the reader thread and must not block on the pump's owner.
    pub fn set_output_sink<F>(&mut self, sink: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(sink)));
        match self.sink.lock() {
            Ok(mut slot) => *slot = Some(sink),
            Err(poisoned) => *poisoned.into_inner() = Some(sink),
        }
    }

    /// Stop the child and the reader thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.stdin = None;

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_status.get_or_insert(status);
                }
                _ => {
                    info!("Terminating child (pid {})", child.id());
                    if let Err(e) = child.kill() {
                        debug!("Kill failed: {}", e);
                    }
                    match child.wait() {
                        Ok(status) => {
                            self.exit_status.get_or_insert(status);
                        }
                        Err(e) => warn!("Failed to reap child: {}", e),
                    }
                }
            }
        }

        if let Some(handle) = self.reader_thread.take() {
            self.join_reader(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True once the reader has delivered everything it will ever deliver
    /// (EOF, read error, or shutdown), or when no reader was started.
    pub fn output_closed(&self) -> bool {
        self.reader_thread
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Exit code once the child has been reaped. `None` while running, or when
    /// the child was ended by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn join_reader(&self, handle: JoinHandle<()>) {
        let deadline = Instant::now() + self.options.shutdown_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Reader thread still blocked after {:?}, detaching",
                    self.options.shutdown_timeout
                );
                return;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if handle.join().is_err() {
            warn!("Reader thread panicked");
        }
    }
}

impl Drop for ProcessPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_reader(
    mut reader: PipeReader,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    slot: SinkSlot,
    chunk_size: usize,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(READER_THREAD_NAME.to_string())
        .spawn(move || {
            let mut buf = vec![0u8; chunk_size];
            while !stop.load(Ordering::SeqCst) {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("Child output closed");
                        break;
                    }
                    Ok(n) => deliver(&slot, &buf[..n]),
                    Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                        thread::sleep(RETRY_DELAY);
                    }
                    Err(e) => {
                        debug!("Read from child failed: {}", e);
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        })
        .map_err(PumpError::ThreadSpawn)
}

// Hand a chunk to the current sink. The slot lock is released before the call.
fn deliver(slot: &SinkSlot, bytes: &[u8]) {
    let sink = match slot.lock() {
        Ok(slot) => slot.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    let Some(sink) = sink else {
        return;
    };
    match sink.lock() {
        Ok(mut sink) => sink(bytes),
        Err(_) => debug!("Output sink poisoned, dropping {} bytes", bytes.len()),
    };
}

// Kill and wait on a child we are abandoning
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[cfg(unix)]
    fn collecting_pump() -> (ProcessPump, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        let mut pump = ProcessPump::new();
        pump.set_output_sink(move |bytes: &[u8]| {
            let _ = tx.send(bytes.to_vec());
        });
        (pump, rx)
    }

    #[cfg(unix)]
    fn collect_until(rx: &mpsc::Receiver<Vec<u8>>, needle: &str) -> String {
        let deadline = Instant::now() + TIMEOUT;
        let mut output = Vec::new();
        while Instant::now() < deadline {
            if let Ok(chunk) = rx.recv_timeout(Duration::from_millis(50)) {
                output.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&output).contains(needle) {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_empty_command() {
        let mut pump = ProcessPump::new();
        assert!(matches!(pump.initialize("   "), Err(PumpError::EmptyCommand)));
        assert!(!pump.is_running());
    }

    #[test]
    fn test_unbalanced_quote_rejected() {
        let mut pump = ProcessPump::new();
        assert!(matches!(
            pump.initialize("sh -c 'echo a"),
            Err(PumpError::InvalidCommand(_))
        ));
        assert!(!pump.is_running());
    }

    #[test]
    fn test_spawn_failure() {
        let mut pump = ProcessPump::new();
        let result = pump.initialize("mikoterm-no-such-program --flag");
        assert!(matches!(result, Err(PumpError::Spawn { .. })));
        assert!(!pump.is_running());
        assert_eq!(pump.pid(), None);
    }

    #[test]
    fn test_shutdown_without_initialize() {
        let mut pump = ProcessPump::new();
        pump.shutdown();
        pump.shutdown();
        assert!(!pump.is_running());
        assert_eq!(pump.exit_code(), None);
    }

    #[test]
    fn test_send_input_when_not_running_is_noop() {
        let mut pump = ProcessPump::new();
        pump.send_input(b"ignored\n");
        pump.update();
        assert!(!pump.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_echo_reaches_sink() {
        let (mut pump, rx) = collecting_pump();
        pump.initialize("echo hello").unwrap();
        let output = collect_until(&rx, "hello\n");
        assert_eq!(output, "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_is_merged() {
        let (mut pump, rx) = collecting_pump();
        pump.initialize("ls /mikoterm-missing-path").unwrap();
        let output = collect_until(&rx, "mikoterm-missing-path");
        assert!(output.contains("mikoterm-missing-path"), "got {:?}", output);
    }

    #[cfg(unix)]
    #[test]
    fn test_input_round_trip() {
        let (mut pump, rx) = collecting_pump();
        pump.initialize("cat").unwrap();
        assert!(pump.is_running());
        assert!(pump.pid().is_some());

        pump.send_input(b"ping\n");
        assert_eq!(collect_until(&rx, "ping\n"), "ping\n");

        pump.shutdown();
        assert!(!pump.is_running());
        pump.send_input(b"after\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_update_records_exit_code() {
        let mut pump = ProcessPump::new();
        pump.initialize("false").unwrap();

        let deadline = Instant::now() + TIMEOUT;
        while pump.exit_code().is_none() && Instant::now() < deadline {
            pump.update();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pump.exit_code(), Some(1));
        assert!(!pump.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_already_running() {
        let mut pump = ProcessPump::new();
        pump.initialize("sleep 30").unwrap();
        assert!(matches!(
            pump.initialize("sleep 30"),
            Err(PumpError::AlreadyRunning)
        ));
        pump.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_terminates_child() {
        let mut pump = ProcessPump::new();
        pump.initialize("sleep 30").unwrap();

        let started = Instant::now();
        pump.shutdown();
        assert!(started.elapsed() < TIMEOUT);
        assert!(!pump.is_running());
        assert!(pump.exit_status().is_some());
        assert_eq!(pump.pid(), None);

        pump.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn test_restart_after_exit() {
        let (mut pump, rx) = collecting_pump();
        pump.initialize("echo first").unwrap();
        assert_eq!(collect_until(&rx, "first\n"), "first\n");

        let deadline = Instant::now() + TIMEOUT;
        while pump.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        pump.initialize("echo second").unwrap();
        assert_eq!(collect_until(&rx, "second\n"), "second\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_quoted_argument_kept_whole() {
        let (mut pump, rx) = collecting_pump();
        pump.initialize("sh -c 'echo a   b'").unwrap();
        assert_eq!(collect_until(&rx, "\n"), "a b\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_output_drained_after_exit_observed() {
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        let mut pump = ProcessPump::new();
        pump.set_output_sink(move |bytes: &[u8]| {
            // Slow consumer, so the child exits well before its output is read
            thread::sleep(Duration::from_micros(200));
            counter.fetch_add(bytes.len(), Ordering::SeqCst);
        });
        pump.initialize("seq 1 100000").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while pump.exit_code().is_none() && Instant::now() < deadline {
            pump.update();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(pump.exit_code(), Some(0));
        assert!(!pump.is_running());

        while !pump.output_closed() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(pump.output_closed());
        // Sum of the line lengths of 1..=100000, newline included
        assert_eq!(received.load(Ordering::SeqCst), 588_895);
    }

    #[test]
    fn test_output_closed_without_reader() {
        let pump = ProcessPump::new();
        assert!(pump.output_closed());
    }

    #[cfg(unix)]
    #[test]
    fn test_replacing_blocked_sink_does_not_wait() {
        // Rendezvous channel nobody receives from: the first send blocks forever
        let (blocked_tx, blocked_rx) = mpsc::sync_channel::<Vec<u8>>(0);
        let mut pump = ProcessPump::new();
        pump.set_output_sink(move |bytes: &[u8]| {
            let _ = blocked_tx.send(bytes.to_vec());
        });
        pump.initialize("yes").unwrap();
        thread::sleep(Duration::from_millis(100));

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            pump.set_output_sink(|_: &[u8]| {});
            let _ = done_tx.send(pump);
        });
        let mut pump = done_rx
            .recv_timeout(TIMEOUT)
            .expect("set_output_sink waited on the blocked sink");

        drop(blocked_rx);
        pump.shutdown();
        assert!(!pump.is_running());
    }
}
