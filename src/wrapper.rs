//! `wrap` subcommand: run the deploy tool with forwarded arguments and
//! keep a failure on screen until the operator acknowledges it.

use crate::invocation::{DeployTool, ToolInvocation};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};

pub const FAILURE_PROMPT: &str = "Something went wrong setting up hosted engine, or the setup process was cancelled.\n\nPress any key to continue...";

/// Run `deploy_tool args…` on the current terminal and return its exit
/// code. On a non-zero exit the failure prompt is printed and `wait_for_key`
/// is called before returning.
pub fn run_wrapped<W>(deploy_tool: &str, args: Vec<String>, wait_for_key: W) -> Result<i32>
where
    W: FnOnce() -> io::Result<()>,
{
    let invocation = DeployTool {
        deploy_tool: deploy_tool.to_string(),
        args,
    };
    let line = invocation.command_line();
    tracing::info!("Wrapping {}", line);

    let status = line
        .to_command()
        .status()
        .with_context(|| format!("Failed to run {}", line.program))?;

    let code = status.code().unwrap_or(1);
    if code != 0 {
        tracing::warn!("{} exited with {}", line.program, code);
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", FAILURE_PROMPT)?;
        stdout.flush()?;
        wait_for_key().context("Failed waiting for keypress")?;
    }
    Ok(code)
}

/// Block until a single key is pressed, without waiting for Enter
pub fn wait_for_keypress() -> io::Result<()> {
    enable_raw_mode()?;
    let result = loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => break Ok(()),
            Ok(_) => continue,
            Err(e) => break Err(e),
        }
    };
    disable_raw_mode()?;
    result
}
