//! Forwards box stdout/stderr into the runtime's tracing output.

use std::{
    io::{BufRead, BufReader},
    process::{ChildStderr, ChildStdout},
    thread::{self, JoinHandle},
};

use crate::runtime::constants::log_targets;
use crate::runtime::types::BoxID;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Owns one reader thread per output pipe of a box process.
///
/// Lines from stdout are logged at DEBUG under `box:stdout`, lines from
/// stderr at WARN under `box:stderr`, each tagged with the box id. The
/// threads end on their own when the pipes reach EOF.
pub(super) struct LogStreamHandler {
    threads: Vec<JoinHandle<()>>,
}

impl LogStreamHandler {
    pub(super) fn new(box_id: &BoxID, stdout: ChildStdout, stderr: ChildStderr) -> BoxliteResult<Self> {
        let stdout_thread = Self::spawn_reader(box_id, BufReader::new(stdout), Stream::Stdout)?;
        let stderr_thread = Self::spawn_reader(box_id, BufReader::new(stderr), Stream::Stderr)?;

        Ok(Self {
            threads: vec![stdout_thread, stderr_thread],
        })
    }

    /// Drop ANSI color sequences (`ESC [ ... m`) so they don't end up in log files.
    fn strip_ansi_codes(text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            if c != '\x1b' {
                result.push(c);
                continue;
            }
            if chars.next() == Some('[') {
                for next_char in chars.by_ref() {
                    if next_char == 'm' {
                        break;
                    }
                }
            }
        }

        result
    }

    fn spawn_reader<R: BufRead + Send + 'static>(
        box_id: &BoxID,
        reader: R,
        stream: Stream,
    ) -> BoxliteResult<JoinHandle<()>> {
        let box_id = box_id.clone();

        thread::Builder::new()
            .name(format!("box-{}-{}", box_id.short(), stream.name()))
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => Self::strip_ansi_codes(&line),
                        Err(e) => {
                            tracing::warn!(
                                box_id = %box_id,
                                stream = stream.name(),
                                "Failed to read from box pipe: {}", e
                            );
                            break;
                        }
                    };

                    match stream {
                        Stream::Stdout => {
                            tracing::debug!(target: log_targets::BOX_STDOUT, box_id = %box_id, "{}", line)
                        }
                        Stream::Stderr => {
                            tracing::warn!(target: log_targets::BOX_STDERR, box_id = %box_id, "{}", line)
                        }
                    }
                }
                tracing::trace!(box_id = %box_id, stream = stream.name(), "Pipe closed");
            })
            .map_err(|e| {
                BoxliteError::Engine(format!(
                    "Failed to spawn {} reader thread: {}",
                    stream.name(),
                    e
                ))
            })
    }

    /// Wait for both reader threads to drain their pipes.
    ///
    /// Blocks until every process holding the pipes has exited, so only call
    /// this from a thread that may block.
    pub(super) fn join(mut self) {
        for handle in self.threads.drain(..) {
            if let Err(e) = handle.join() {
                tracing::warn!("box log reader thread panicked: {:?}", e);
            }
        }
    }
}
