//! Terminal session management
//!
//! A session pairs one [`ProcessPump`] with one [`TerminalGrid`]. Output chunks
//! cross from the reader thread to the owner over a bounded channel and are
//! applied to the grid only on the owner's thread.

use std::sync::mpsc::{self, Receiver, TryRecvError};

use tracing::{debug, info};

use super::pump::{ProcessPump, PumpError, PumpOptions};
use super::term::TerminalGrid;
use crate::config::Config;

/// Output chunks buffered before the reader thread blocks
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A child process rendered into a terminal grid
pub struct Session {
    grid: TerminalGrid,
    pump: ProcessPump,
    /// Receiver for output chunks from the reader thread
    output_rx: Option<Receiver<Vec<u8>>>,
    channel_capacity: usize,
}

impl Session {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_options(cols, rows, PumpOptions::default(), DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_config(config: &Config) -> Self {
        Self::with_options(
            config.cols,
            config.rows,
            config.pump_options(),
            config.channel_capacity,
        )
    }

    pub fn with_options(
        cols: u16,
        rows: u16,
        options: PumpOptions,
        channel_capacity: usize,
    ) -> Self {
        Self {
            grid: TerminalGrid::new(cols, rows),
            pump: ProcessPump::with_options(options),
            output_rx: None,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Spawn `command` and start collecting its output.
    ///
    /// Fails with [`PumpError::AlreadyRunning`] while a child is alive, leaving
    /// that child's output flowing as before.
    pub fn start(&mut self, command: &str) -> Result<(), PumpError> {
        if self.pump.is_running() {
            return Err(PumpError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(self.channel_capacity);
        self.pump.set_output_sink(move |bytes: &[u8]| {
            // Receiver gone means the session is shutting down
            let _ = tx.send(bytes.to_vec());
        });
        self.output_rx = Some(rx);

        if let Err(e) = self.pump.initialize(command) {
            self.output_rx = None;
            return Err(e);
        }
        info!("Session started: {}", command);
        Ok(())
    }

    /// Apply all queued output to the grid. Returns true if anything arrived.
    pub fn process_output(&mut self) -> bool {
        let Some(rx) = &self.output_rx else {
            return false;
        };

        let mut processed = false;
        loop {
            match rx.try_recv() {
                Ok(chunk) => {
                    self.grid.append_output(&chunk);
                    processed = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Output channel disconnected");
                    break;
                }
            }
        }
        processed
    }

    /// Poll the child for exit
    pub fn update(&mut self) {
        self.pump.update();
    }

    /// Send input bytes to the child
    pub fn write(&mut self, data: &[u8]) {
        self.pump.send_input(data);
    }

    /// Resize the grid. Pipes carry no window size, so the child is not told.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.grid.resize(cols, rows);
    }

    pub fn is_running(&self) -> bool {
        self.pump.is_running()
    }

    /// True once every chunk the child produced has been queued for
    /// [`process_output`](Self::process_output)
    pub fn output_closed(&self) -> bool {
        self.pump.output_closed()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.pump.exit_code()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pump.pid()
    }

    pub fn grid(&self) -> &TerminalGrid {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut TerminalGrid {
        &mut self.grid
    }

    /// Stop the child. Queued output that was not yet processed is discarded.
    pub fn shutdown(&mut self) {
        // A reader blocked on a full channel wakes up once the receiver is gone
        self.output_rx = None;
        self.pump.shutdown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
