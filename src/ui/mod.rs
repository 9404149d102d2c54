//! User interface rendering module
//!
//! - Main module - page layout: header, status panel, form, nav bar
//! - `dialogs` - modal dialogs drawn over the page

mod dialogs;

use crate::app::{Focus, PageState};
use crate::theme::Styles;
use crate::types::MaintenanceLevel;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};
use strum::IntoEnumIterator;

pub use dialogs::centered_rect;

/// Stateless page renderer
#[derive(Debug, Default)]
pub struct UiRenderer;

impl UiRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, f: &mut Frame, state: &PageState) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(6),
                Constraint::Min(9),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(f.area());

        render_header(f, chunks[0]);
        render_status(f, state, chunks[1]);
        render_form(f, state, chunks[2]);
        render_message(f, state, chunks[3]);
        render_nav_bar(f, state, chunks[4]);

        if let Some(dialog) = &state.dialog {
            dialogs::render_dialog(f, dialog);
        }
    }
}

fn render_header(f: &mut Frame, area: Rect) {
    let header = Paragraph::new("Hosted Engine Setup")
        .alignment(Alignment::Center)
        .style(Styles::title())
        .block(Block::default().borders(Borders::BOTTOM).border_style(Styles::border_inactive()));
    f.render_widget(header, area);
}

fn render_status(f: &mut Frame, state: &PageState, area: Rect) {
    let status = &state.status;
    let configured = if status.is_configured() { "Configured" } else { "Not configured" };
    let maintenance = status
        .maintenance
        .map(|level| level.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let lines = vec![
        labeled("Hosted Engine: ", configured.to_string()),
        labeled(
            "Engine VM: ",
            status.vm_name.clone().unwrap_or_else(|| "-".to_string()),
        ),
        labeled("Engine Status: ", status.engine.to_string()),
        labeled("Maintenance: ", maintenance),
    ];
    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Status ").border_style(Styles::border_inactive()))
        .wrap(Wrap { trim: true });
    f.render_widget(panel, area);
}

fn labeled(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(label, Styles::text_secondary()),
        Span::styled(value, Styles::text()),
    ])
}

fn field_style(state: &PageState, field: Focus) -> ratatui::style::Style {
    if state.focus == field && state.dialog.is_none() {
        Styles::focused()
    } else {
        Styles::text_secondary()
    }
}

fn render_form(f: &mut Frame, state: &PageState, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .margin(1)
        .split(area);

    f.render_widget(
        Block::default().borders(Borders::ALL).title(" Deploy ").border_style(Styles::border_inactive()),
        area,
    );

    let image_focused = state.focus == Focus::ImagePath && state.dialog.is_none();
    let cursor = if image_focused { "_" } else { "" };
    let image = Paragraph::new(format!("{}{}", state.image_input, cursor))
        .style(Styles::text())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Engine ISO/OVA URL or path ")
                .border_style(if image_focused { Styles::border_active() } else { Styles::border_inactive() }),
        );
    f.render_widget(image, rows[0]);

    let pxe = Line::from(vec![
        Span::styled(if state.pxe { "[x] " } else { "[ ] " }, field_style(state, Focus::Pxe)),
        Span::styled("PXE Boot Engine VM", field_style(state, Focus::Pxe)),
    ]);
    f.render_widget(Paragraph::new(pxe), rows[2]);

    let mut levels = vec![Span::styled("Maintenance: ", field_style(state, Focus::Maintenance))];
    for level in MaintenanceLevel::iter() {
        let text = format!(" {} ", level);
        let style = if level == state.maintenance {
            Styles::button_active()
        } else {
            Styles::button_inactive()
        };
        levels.push(Span::styled(text, style));
        levels.push(Span::raw(" "));
    }
    f.render_widget(Paragraph::new(Line::from(levels)), rows[3]);

    let button_style = if state.focus == Focus::Deploy && state.dialog.is_none() {
        Styles::button_active()
    } else {
        Styles::button_inactive()
    };
    f.render_widget(
        Paragraph::new(Span::styled("[ Setup Hosted Engine ]", button_style)).alignment(Alignment::Center),
        rows[4],
    );
}

fn render_message(f: &mut Frame, state: &PageState, area: Rect) {
    let message = Paragraph::new(state.status_message.as_str())
        .style(Styles::text())
        .block(Block::default().borders(Borders::TOP).border_style(Styles::border_inactive()))
        .wrap(Wrap { trim: true });
    f.render_widget(message, area);
}

fn render_nav_bar(f: &mut Frame, state: &PageState, area: Rect) {
    let hint = match (&state.dialog, state.focus) {
        (Some(_), _) => "Enter: confirm  Esc: close",
        (None, Focus::ImagePath) => "Tab: next field  F5: refresh status  Esc: quit",
        (None, Focus::Maintenance) => "←/→: change level  Enter: apply  Tab: next  q: quit",
        (None, _) => "Space/Enter: select  Tab: next  F5: refresh status  q: quit",
    };
    f.render_widget(Paragraph::new(hint).style(Styles::nav_hint()), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Dialog;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn rendered(state: &PageState) -> String {
        let backend = TestBackend::new(90, 30);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|f| UiRenderer::new().render(f, state)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_page_shows_form_and_status() {
        let state = PageState {
            image_input: "http://host/image.iso".to_string(),
            ..Default::default()
        };
        let screen = rendered(&state);
        assert!(screen.contains("Hosted Engine Setup"));
        assert!(screen.contains("http://host/image.iso"));
        assert!(screen.contains("not configured"));
        assert!(screen.contains("Setup Hosted Engine"));
    }

    #[test]
    fn test_error_dialog_is_drawn() {
        let state = PageState {
            dialog: Some(Dialog::error("Download failed", "server returned HTTP 404")),
            ..Default::default()
        };
        let screen = rendered(&state);
        assert!(screen.contains("Download failed"));
        assert!(screen.contains("HTTP 404"));
    }
}
