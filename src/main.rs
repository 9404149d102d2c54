//! Hosted Engine Setup TUI - Main entry point

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use hosted_engine_tui::app::{App, Dialog, Orchestrator, Services};
use hosted_engine_tui::cli::{Cli, Commands};
use hosted_engine_tui::planner::DeploymentRequest;
use hosted_engine_tui::process_guard::init_signal_handlers;
use hosted_engine_tui::settings::PluginSettings;
use hosted_engine_tui::status::{HostedEngineCli, StatusQuery};
use hosted_engine_tui::types::MaintenanceLevel;
use hosted_engine_tui::{sanity, wrapper};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::OpenOptions;
use std::io::{stdout, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log to `log_file`, or stderr when it cannot be opened.
/// `RUST_LOG` overrides the default `info` filter.
fn init_logging(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    let file = OpenOptions::new().create(true).append(true).open(log_file);
    let result = match file {
        Ok(file) => subscriber
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .try_init(),
        Err(e) => {
            eprintln!("Cannot open log file {}: {}, logging to stderr", log_file.display(), e);
            subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init()
        }
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Some(Commands::ValidateSettings { settings }) = &cli.command {
        return validate_settings(settings);
    }

    let settings = match load_settings(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_file = cli.log_file.clone().unwrap_or_else(|| settings.log_file.clone());
    init_logging(&log_file);
    tracing::info!("Hosted engine page starting up");

    match run(cli, settings) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<PluginSettings> {
    let settings = PluginSettings::load_or_default(path)?;
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn validate_settings(path: &Path) -> ExitCode {
    match load_settings(Some(path)) {
        Ok(_) => {
            println!("✓ Settings file is valid: {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Settings validation failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, settings: PluginSettings) -> Result<ExitCode> {
    match cli.command {
        None | Some(Commands::Tui) => {
            preflight(&settings, cli.skip_preflight)?;
            run_tui(&settings)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Deploy {
            image,
            pxe,
            maintenance,
            yes,
        }) => {
            preflight(&settings, cli.skip_preflight)?;
            run_headless_deploy(&settings, image.as_deref().unwrap_or(""), pxe, maintenance, yes)
        }
        Some(Commands::Status) => {
            print_status(&settings);
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Wrap { args }) => {
            let code = wrapper::run_wrapped(&settings.deploy_tool, args, wrapper::wait_for_keypress)?;
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        Some(Commands::ValidateSettings { settings }) => Ok(validate_settings(&settings)),
    }
}

fn preflight(settings: &PluginSettings, skip: bool) -> Result<()> {
    if skip {
        tracing::warn!("Pre-flight checks skipped (--skip-preflight)");
        return Ok(());
    }
    sanity::run_preflight_checks(settings)
}

fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = crossterm::execute!(stdout(), LeaveAlternateScreen);
}

/// Run the interactive page
fn run_tui(settings: &PluginSettings) -> Result<()> {
    let orchestrator = Orchestrator::new(Services::from_settings(settings)?);

    if let Err(e) = init_signal_handlers(orchestrator.supervisor(), restore_terminal) {
        tracing::warn!("Failed to initialize signal handlers: {}", e);
    }

    enable_raw_mode().context("Failed to enable raw mode")?;
    crossterm::execute!(stdout(), EnterAlternateScreen).context("Failed to enter alternate screen")?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout())).context("Failed to create terminal")?;

    let mut app = App::new(orchestrator);
    let result = app.run(&mut terminal);

    // Always attempt cleanup, even if the page failed
    restore_terminal();
    let _ = terminal.show_cursor();
    app.shutdown();

    result
}

/// Headless pipeline: plan, download with printed progress, then launch
fn run_headless_deploy(
    settings: &PluginSettings,
    image: &str,
    pxe: bool,
    maintenance: Option<MaintenanceLevel>,
    assume_yes: bool,
) -> Result<ExitCode> {
    let mut orchestrator = Orchestrator::new(Services::from_settings(settings)?);
    if let Err(e) = init_signal_handlers(orchestrator.supervisor(), || {}) {
        tracing::warn!("Failed to initialize signal handlers: {}", e);
    }

    orchestrator.on_deploy_requested(DeploymentRequest::from_form(image, pxe, maintenance));

    while orchestrator.download_in_progress() {
        if !orchestrator.wait_for_download_event(Duration::from_millis(200)) {
            continue;
        }
        if let Some(Dialog::Progress {
            title,
            percentage,
            throughput,
        }) = &orchestrator.state().dialog
        {
            let pct = percentage.map(|p| format!("{:>3}%", p)).unwrap_or_else(|| "  ?%".to_string());
            print!("\r{} {} {:>12}", title, pct, throughput);
            stdout().flush()?;
        }
    }
    println!();

    match orchestrator.state().dialog.clone() {
        Some(Dialog::ConfirmLaunch { text, .. }) => {
            println!("{}", text);
            if !assume_yes && !confirm("Begin Hosted Engine Setup? [y/N] ")? {
                orchestrator.dismiss_dialog();
                println!("Cancelled");
                return Ok(ExitCode::FAILURE);
            }
            let Some(config) = orchestrator.confirm_launch() else {
                return Ok(ExitCode::FAILURE);
            };
            println!("Beginning Hosted Engine Setup ...");
            match orchestrator.launch(&config) {
                Some(outcome) if outcome.succeeded() => Ok(ExitCode::SUCCESS),
                _ => {
                    eprintln!("✗ {}", orchestrator.state().status_message);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Some(Dialog::Error { title, message }) => {
            eprintln!("✗ {}: {}", title, message);
            Ok(ExitCode::FAILURE)
        }
        _ => {
            eprintln!("✗ {}", orchestrator.state().status_message);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_status(settings: &PluginSettings) {
    let query = StatusQuery::new(
        settings.vm_conf_path.clone(),
        settings.ha_conf_path.clone(),
        Arc::new(HostedEngineCli::new(&settings.status_tool, settings.status_timeout())),
    );
    let status = query.current_status();
    let configured = if status.is_configured() { "yes" } else { "no" };
    println!("Hosted Engine: {}", configured);
    println!("Engine VM:     {}", status.vm_name.as_deref().unwrap_or("-"));
    println!("Engine Status: {}", status.engine);
    println!(
        "Maintenance:   {}",
        status.maintenance.map(|level| level.to_string()).unwrap_or_else(|| "unknown".to_string())
    );
}
