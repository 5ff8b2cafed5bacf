use crate::error::SampleError;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound accepted for any single external command
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs external diagnostic tools with a hard timeout
///
/// Output pipes are drained on helper threads so a chatty tool cannot block on
/// a full pipe while we wait for it. A child that outlives its timeout is
/// killed and reaped before the error is returned. The same deadline covers
/// reading its output, so a background process that inherited the pipes
/// cannot hold the caller past the timeout either.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(MAX_COMMAND_TIMEOUT)
    }
}

impl CommandRunner {
    /// Create a runner; timeouts above [`MAX_COMMAND_TIMEOUT`] are clamped
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: timeout.min(MAX_COMMAND_TIMEOUT),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program` with `args` and return its stdout
    ///
    /// # Errors
    ///
    /// * `SampleError::ToolUnavailable` if the binary cannot be spawned or exits non-zero
    /// * `SampleError::ToolTimeout` if it does not finish within the timeout
    pub fn run(&self, program: &str, args: &[&str]) -> Result<String, SampleError> {
        let tool = describe(program, args);
        log::debug!("Running {} (timeout {:?})", tool, self.timeout);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SampleError::unavailable(&tool, e))?;

        let deadline = Instant::now() + self.timeout;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_with_deadline(&mut child, &tool, deadline)?;

        let stdout = self.collect(stdout, &tool, deadline)?;
        if !status.success() {
            let stderr = self.collect(stderr, &tool, deadline).unwrap_or_default();
            let detail = stderr.trim();
            let reason = if detail.is_empty() {
                status.to_string()
            } else {
                format!("{}: {}", status, detail)
            };
            return Err(SampleError::unavailable(tool, reason));
        }

        Ok(stdout)
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        tool: &str,
        deadline: Instant,
    ) -> Result<ExitStatus, SampleError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    terminate(child, tool);
                    return Err(self.timed_out(tool));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    terminate(child, tool);
                    return Err(SampleError::unavailable(tool, e));
                }
            }
        }
    }

    /// Wait for a drain thread, but no later than `deadline`
    fn collect(
        &self,
        output: Option<Receiver<Vec<u8>>>,
        tool: &str,
        deadline: Instant,
    ) -> Result<String, SampleError> {
        let Some(output) = output else {
            return Ok(String::new());
        };
        match output.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(buf) => Ok(String::from_utf8_lossy(&buf).into_owned()),
            // A leftover descendant still holds the pipe open
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out(tool)),
            Err(RecvTimeoutError::Disconnected) => Ok(String::new()),
        }
    }

    fn timed_out(&self, tool: &str) -> SampleError {
        SampleError::ToolTimeout {
            tool: tool.to_string(),
            timeout: self.timeout,
        }
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn terminate(child: &mut Child, tool: &str) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill {}: {}", tool, e);
    }
    // Reap so the timed-out process does not linger as a zombie
    let _ = child.wait();
}

/// Read `pipe` to the end on a helper thread
///
/// The thread is detached; if the pipe never closes it simply outlives the
/// call and exits once the last writer is gone.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}
