//! Centralized theme and styling for the TUI
//!
//! Single source of truth for the colors and styles used by the page and
//! its dialogs.

use ratatui::style::{Color, Modifier, Style};

// =============================================================================
// COLOR PALETTE
// =============================================================================

/// Core color palette for the application
pub struct Colors;

impl Colors {
    /// Primary dark background - used for dialogs
    pub const BG_PRIMARY: Color = Color::Rgb(20, 20, 30);

    /// Warning/danger dialog background
    pub const BG_DANGER: Color = Color::Rgb(30, 20, 20);

    /// Gauge/progress bar background
    pub const BG_GAUGE: Color = Color::Rgb(40, 40, 50);

    pub const FG_PRIMARY: Color = Color::White;
    pub const FG_SECONDARY: Color = Color::Gray;
    pub const FG_MUTED: Color = Color::DarkGray;

    /// Primary accent color - used for borders, titles, highlights
    pub const PRIMARY: Color = Color::Cyan;

    pub const SUCCESS: Color = Color::Green;
    pub const WARNING: Color = Color::Yellow;
    pub const ERROR: Color = Color::Red;

    pub const BORDER_ACTIVE: Color = Color::Cyan;
    pub const BORDER_INACTIVE: Color = Color::DarkGray;

    pub const SELECTED_BG: Color = Color::Yellow;
    pub const SELECTED_FG: Color = Color::Black;

    pub const PROGRESS: Color = Color::Green;
    pub const NAV_HINT: Color = Color::DarkGray;

    pub const SEVERITY_INFO: Color = Color::Cyan;
    pub const SEVERITY_WARNING: Color = Color::Yellow;
    pub const SEVERITY_DANGER: Color = Color::Red;
}

// =============================================================================
// PRE-BUILT STYLES
// =============================================================================

/// Pre-built styles for common UI patterns
pub struct Styles;

impl Styles {
    pub fn text() -> Style {
        Style::default().fg(Colors::FG_PRIMARY)
    }

    pub fn text_secondary() -> Style {
        Style::default().fg(Colors::FG_SECONDARY)
    }

    /// Main title style (cyan, bold)
    pub fn title() -> Style {
        Style::default()
            .fg(Colors::PRIMARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn border_active() -> Style {
        Style::default().fg(Colors::BORDER_ACTIVE)
    }

    pub fn border_inactive() -> Style {
        Style::default().fg(Colors::BORDER_INACTIVE)
    }

    pub fn panel_bg() -> Style {
        Style::default().bg(Colors::BG_PRIMARY)
    }

    pub fn panel_bg_danger() -> Style {
        Style::default().bg(Colors::BG_DANGER)
    }

    /// Focused field label
    pub fn focused() -> Style {
        Style::default()
            .fg(Colors::PRIMARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn success() -> Style {
        Style::default().fg(Colors::SUCCESS)
    }

    pub fn warning() -> Style {
        Style::default().fg(Colors::WARNING)
    }

    pub fn error() -> Style {
        Style::default().fg(Colors::ERROR)
    }

    /// Active/selected button
    pub fn button_active() -> Style {
        Style::default()
            .fg(Colors::SELECTED_FG)
            .bg(Colors::SELECTED_BG)
            .add_modifier(Modifier::BOLD)
    }

    pub fn button_inactive() -> Style {
        Style::default().fg(Colors::FG_PRIMARY)
    }

    /// Progress bar style
    pub fn progress() -> Style {
        Style::default()
            .fg(Colors::PROGRESS)
            .bg(Colors::BG_GAUGE)
    }

    /// Navigation hint (keybindings)
    pub fn nav_hint() -> Style {
        Style::default().fg(Colors::NAV_HINT)
    }
}

// =============================================================================
// THEME CONTEXT
// =============================================================================

/// Severity level for dialogs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Danger,
}

/// Theme context providing semantic style lookups
pub struct Theme;

impl Theme {
    /// Get border color for a severity level
    pub fn severity_color(severity: Severity) -> Color {
        match severity {
            Severity::Info => Colors::SEVERITY_INFO,
            Severity::Warning => Colors::SEVERITY_WARNING,
            Severity::Danger => Colors::SEVERITY_DANGER,
        }
    }

    /// Background for a dialog of this severity
    pub fn severity_background(severity: Severity) -> Style {
        match severity {
            Severity::Danger => Styles::panel_bg_danger(),
            Severity::Info | Severity::Warning => Styles::panel_bg(),
        }
    }
}

/// UI dimension constants
pub struct UiConstants;

impl UiConstants {
    pub const DIALOG_WIDTH_PCT: u16 = 60;
    pub const DIALOG_MAX_WIDTH: u16 = 80;
    pub const DIALOG_MIN_WIDTH: u16 = 40;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styles() {
        let _ = Styles::title();
        let _ = Styles::button_active();
        let _ = Styles::error();
    }

    #[test]
    fn test_theme_lookups() {
        assert_eq!(Theme::severity_color(Severity::Danger), Colors::ERROR);
        assert_eq!(Theme::severity_background(Severity::Info), Styles::panel_bg());
    }
}
