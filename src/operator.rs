//! Operator control surface.
//!
//! A single task owns the process's stdin for its whole lifetime and forwards
//! each line over a channel. Whichever session is active consumes the lines;
//! lines typed while no sensor is connected wait in the channel for the next
//! session.

use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Lines buffered between the stdin task and the active session
const INPUT_QUEUE_DEPTH: usize = 16;

const PROMPT: &str = "Enter 'start' to begin, 'stop' to halt or 'exit' to disconnect: ";

/// Source of operator command lines
#[derive(Debug)]
pub struct OperatorInput {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl OperatorInput {
    /// Spawn the stdin reader task and return the line source it feeds.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::channel(INPUT_QUEUE_DEPTH);

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Operator input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read operator input");
                        break;
                    }
                }
            }
        });

        Self::from_channel(rx)
    }

    /// Wrap an existing channel of lines.
    pub fn from_channel(rx: mpsc::Receiver<String>) -> Self {
        OperatorInput {
            lines: Mutex::new(rx),
        }
    }

    /// Wait for the next line; `None` once the source is exhausted.
    ///
    /// Cancel-safe: a line is never lost if the future is dropped.
    pub async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }
}

/// Show the command prompt.
pub fn prompt() {
    if let Err(e) = write_prompt(&mut io::stdout().lock()) {
        debug!(error = %e, "Failed to write prompt");
    }
}

fn write_prompt<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(PROMPT.as_bytes())?;
    out.flush()
}

/// Print a one-line notice for the operator.
pub fn report(message: &str) {
    println!("{}", message);
}
