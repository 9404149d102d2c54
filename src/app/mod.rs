//! Application module
//!
//! # Module Structure
//! - `state` - Page state types (PageState, Focus, Dialog)
//! - `orchestrator` - Deployment sequencing shared with headless mode
//! - Main module - App struct and terminal event loop

mod orchestrator;
mod state;

pub use orchestrator::{Orchestrator, Services, SHUTDOWN_GRACE};
pub use state::{Dialog, Focus, PageState, LAUNCH_NOTICE};

use crate::ui::UiRenderer;
use anyhow::{Context, Result};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::Stdout;
use std::time::Duration;

pub type PageTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Interactive page
pub struct App {
    orchestrator: Orchestrator,
    ui_renderer: UiRenderer,
}

impl App {
    pub fn new(orchestrator: Orchestrator) -> Self {
        tracing::info!("Creating hosted engine page");
        Self {
            orchestrator,
            ui_renderer: UiRenderer::new(),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Cancel background work and remove unfinished downloads
    pub fn shutdown(&mut self) {
        self.orchestrator.shutdown(SHUTDOWN_GRACE);
    }

    /// Run the main application loop
    pub fn run(&mut self, terminal: &mut PageTerminal) -> Result<()> {
        tracing::info!("Starting main application loop");
        self.orchestrator.refresh_status();

        loop {
            self.orchestrator.poll_download();

            if crossterm::event::poll(Duration::from_millis(50))? {
                if let Event::Key(key_event) = crossterm::event::read()? {
                    if key_event.kind == KeyEventKind::Press && self.handle_key_event(key_event, terminal)? {
                        break;
                    }
                }
            }

            terminal.draw(|f| self.ui_renderer.render(f, self.orchestrator.state()))?;
        }

        Ok(())
    }

    /// Handle one key press. Returns true when the page should exit.
    fn handle_key_event(&mut self, key: KeyEvent, terminal: &mut PageTerminal) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(true);
        }

        if self.orchestrator.state().dialog.is_some() {
            self.handle_dialog_key(key, terminal)?;
            return Ok(false);
        }

        let focus = self.orchestrator.state().focus;
        match key.code {
            KeyCode::Tab | KeyCode::Down => {
                let state = self.orchestrator.state_mut();
                state.focus = state.focus.next();
            }
            KeyCode::BackTab | KeyCode::Up => {
                let state = self.orchestrator.state_mut();
                state.focus = state.focus.previous();
            }
            KeyCode::F(5) => self.orchestrator.refresh_status(),
            KeyCode::Esc => return Ok(true),
            _ => match focus {
                Focus::ImagePath => self.edit_image_path(key),
                Focus::Pxe => {
                    if matches!(key.code, KeyCode::Char(' ') | KeyCode::Enter) {
                        let state = self.orchestrator.state_mut();
                        state.pxe = !state.pxe;
                    } else if key.code == KeyCode::Char('q') {
                        return Ok(true);
                    }
                }
                Focus::Maintenance => match key.code {
                    KeyCode::Left | KeyCode::Right | KeyCode::Char(' ') => {
                        let state = self.orchestrator.state_mut();
                        state.maintenance = state.maintenance.next();
                    }
                    KeyCode::Enter => self.orchestrator.apply_maintenance(),
                    KeyCode::Char('q') => return Ok(true),
                    _ => {}
                },
                Focus::Deploy => match key.code {
                    KeyCode::Enter | KeyCode::Char(' ') => self.orchestrator.deploy_from_form(),
                    KeyCode::Char('q') => return Ok(true),
                    _ => {}
                },
            },
        }
        Ok(false)
    }

    fn edit_image_path(&mut self, key: KeyEvent) {
        let state = self.orchestrator.state_mut();
        match key.code {
            KeyCode::Char(c) => state.image_input.push(c),
            KeyCode::Backspace => {
                state.image_input.pop();
            }
            KeyCode::Enter => state.focus = state.focus.next(),
            _ => {}
        }
    }

    fn handle_dialog_key(&mut self, key: KeyEvent, terminal: &mut PageTerminal) -> Result<()> {
        let confirming = matches!(
            self.orchestrator.state().dialog,
            Some(Dialog::ConfirmLaunch { .. })
        );
        match key.code {
            KeyCode::Enter if confirming => {
                if let Some(config) = self.orchestrator.confirm_launch() {
                    let orchestrator = &mut self.orchestrator;
                    with_suspended_terminal(terminal, || {
                        println!("Beginning Hosted Engine Setup ...");
                        orchestrator.launch(&config);
                    })?;
                }
            }
            KeyCode::Enter | KeyCode::Esc => self.orchestrator.dismiss_dialog(),
            _ => {}
        }
        Ok(())
    }
}

/// Hand the real terminal to `f` and take it back afterwards
pub fn with_suspended_terminal<F: FnOnce()>(terminal: &mut PageTerminal, f: F) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    crossterm::execute!(std::io::stdout(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor()?;

    f();

    enable_raw_mode().context("Failed to enable raw mode")?;
    crossterm::execute!(std::io::stdout(), EnterAlternateScreen)
        .context("Failed to enter alternate screen")?;
    terminal.clear()?;
    Ok(())
}
