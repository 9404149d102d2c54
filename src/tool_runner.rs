//! Captured tool execution
//!
//! `run_tool` is the one place helper commands (status queries, persist,
//! maintenance changes) are spawned with captured output. Each child runs in
//! its own process group and receives SIGTERM if this process dies.
//!
//! The deploy session is the exception: it needs the real terminal and is
//! started by `session::ScreenHost` instead.

use crate::invocation::ToolInvocation;
use crate::process_guard::CommandProcessGroup;
use anyhow::{Context, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::process::{Child, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Execute a tool with captured stdout and stderr.
///
/// A non-zero exit is not an error here; callers decide through
/// `ToolOutput::ensure_success`.
pub fn run_tool<T: ToolInvocation + ?Sized>(invocation: &T) -> Result<ToolOutput> {
    let line = invocation.command_line();
    tracing::info!("run_tool: {} env={:?}", line, line.env);

    let output = line
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group()
        .output()
        .with_context(|| format!("Failed to run {}", line.program))?;

    let result = ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    };
    log_exit(&line.program, &result);
    Ok(result)
}

/// Like `run_tool`, but give up after `timeout`.
///
/// On expiry the tool's whole process group is killed and an error is
/// returned, so a hung helper cannot block the caller.
pub fn run_tool_with_timeout<T: ToolInvocation + ?Sized>(
    invocation: &T,
    timeout: Duration,
) -> Result<ToolOutput> {
    let line = invocation.command_line();
    tracing::info!("run_tool: {} env={:?} timeout={:?}", line, line.env, timeout);

    let mut child = line
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group()
        .spawn()
        .with_context(|| format!("Failed to run {}", line.program))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("Failed to wait for {}", line.program))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            kill_group(&mut child);
            anyhow::bail!("{} did not finish within {:?}", line.program, timeout);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    };

    let result = ToolOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
        exit_code: status.code(),
        success: status.success(),
    };
    log_exit(&line.program, &result);
    Ok(result)
}

/// Read a pipe to the end on its own thread so a chatty tool never blocks
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                tracing::debug!("Failed to read tool output: {}", e);
            }
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> String {
    let bytes = reader.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kill the tool and anything it started, then reap it
fn kill_group(child: &mut Child) {
    let pid = Pid::from_raw(child.id() as i32);
    tracing::warn!("Killing process group {}", pid);
    if let Err(e) = killpg(pid, Signal::SIGKILL) {
        tracing::debug!("killpg({}) failed: {}", pid, e);
        let _ = child.kill();
    }
    if let Err(e) = child.wait() {
        tracing::debug!("Failed to reap {}: {}", pid, e);
    }
}

fn log_exit(program: &str, result: &ToolOutput) {
    if result.success {
        tracing::debug!("{} exited successfully", program);
    } else {
        tracing::info!(
            "{} failed with exit code {}",
            program,
            result.exit_code.unwrap_or(-1)
        );
    }
}

/// Output from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by signal
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ToolOutput {
    /// Turn a non-zero exit into an error carrying stderr
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            anyhow::bail!(
                "{} failed (exit code {}): {}",
                context,
                self.exit_code.unwrap_or(-1),
                self.stderr.trim()
            )
        }
    }
}
