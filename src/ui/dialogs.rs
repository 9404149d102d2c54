//! Dialog rendering module
//!
//! Confirmation, download progress, error and info dialogs, drawn centered
//! over the page.

use crate::app::Dialog;
use crate::theme::{Severity, Styles, Theme, UiConstants};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
    Frame,
};

/// Rectangle of `width_pct` percent (clamped to the dialog limits) and
/// `height` rows, centered in `area`
pub fn centered_rect(width_pct: u16, height: u16, area: Rect) -> Rect {
    let width = (area.width * width_pct / 100)
        .clamp(UiConstants::DIALOG_MIN_WIDTH, UiConstants::DIALOG_MAX_WIDTH)
        .min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

pub fn render_dialog(f: &mut Frame, dialog: &Dialog) {
    match dialog {
        Dialog::ConfirmLaunch { text, .. } => render_message(
            f,
            dialog.title(),
            text,
            Severity::Warning,
            "Enter: start setup  Esc: cancel",
        ),
        Dialog::Progress {
            title,
            percentage,
            throughput,
        } => render_progress(f, title, *percentage, throughput),
        Dialog::Error { title, message } => {
            render_message(f, title, message, Severity::Danger, "Enter/Esc: close")
        }
        Dialog::Info { title, message } => {
            render_message(f, title, message, Severity::Info, "Enter/Esc: close")
        }
    }
}

fn dialog_block(title: &str, severity: Severity) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", title))
        .title_alignment(Alignment::Center)
        .border_style(Style::default().fg(Theme::severity_color(severity)))
        .style(Theme::severity_background(severity))
}

fn render_message(f: &mut Frame, title: &str, body: &str, severity: Severity, hint: &str) {
    let area = centered_rect(UiConstants::DIALOG_WIDTH_PCT, 12, f.area());
    f.render_widget(Clear, area);

    let block = dialog_block(title, severity);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(inner);

    let text = Paragraph::new(body)
        .style(Styles::text())
        .wrap(Wrap { trim: false });
    f.render_widget(text, chunks[0]);
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(hint, Styles::nav_hint()))).alignment(Alignment::Center),
        chunks[1],
    );
}

fn render_progress(f: &mut Frame, title: &str, percentage: Option<u8>, throughput: &str) {
    let area = centered_rect(UiConstants::DIALOG_WIDTH_PCT, 7, f.area());
    f.render_widget(Clear, area);

    let block = dialog_block(title, Severity::Info);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(1), Constraint::Min(0)])
        .split(inner);

    match percentage {
        Some(pct) => {
            let gauge = Gauge::default()
                .block(Block::default().borders(Borders::ALL))
                .gauge_style(Styles::progress())
                .percent(u16::from(pct));
            f.render_widget(gauge, chunks[0]);
        }
        None => {
            let waiting = Paragraph::new("Size unknown, downloading...")
                .alignment(Alignment::Center)
                .style(Styles::warning())
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(waiting, chunks[0]);
        }
    }

    let rate = if throughput.is_empty() { "Connecting..." } else { throughput };
    f.render_widget(
        Paragraph::new(rate).alignment(Alignment::Center).style(Styles::success()),
        chunks[1],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_rect_fits_area() {
        let area = Rect::new(0, 0, 100, 40);
        let rect = centered_rect(60, 10, area);
        assert_eq!(rect.width, 60);
        assert_eq!(rect.height, 10);
        assert_eq!(rect.x, 20);
        assert_eq!(rect.y, 15);
    }

    #[test]
    fn test_centered_rect_clamps_to_small_area() {
        let area = Rect::new(0, 0, 30, 5);
        let rect = centered_rect(60, 10, area);
        assert!(rect.width <= area.width);
        assert!(rect.height <= area.height);
    }
}
