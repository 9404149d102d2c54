use crate::types::MaintenanceLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hosted Engine Setup - prepare and launch a hosted engine deployment
#[derive(Parser)]
#[command(name = "hosted-engine-tui")]
#[command(about = "Terminal page for preparing and launching a hosted engine deployment")]
#[command(version)]
pub struct Cli {
    /// JSON settings file overriding paths, tool names and tunables
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Write logs here instead of the configured log file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Skip the root and required-binary checks
    #[arg(long, global = true)]
    pub skip_preflight: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the interactive page (default)
    Tui,
    /// Plan, download if needed and launch the deployment without the page
    Deploy {
        /// Image URL (http, https, ftp) or local path
        #[arg(short, long)]
        image: Option<String>,
        /// Boot the engine VM over PXE instead of from an image
        #[arg(long)]
        pxe: bool,
        /// Maintenance level to record with the selection
        #[arg(short, long)]
        maintenance: Option<MaintenanceLevel>,
        /// Start the setup session without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the hosted engine VM status
    Status,
    /// Run the deploy tool with forwarded arguments, pausing on failure
    Wrap {
        /// Arguments passed through to the deploy tool
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Validate a settings file
    ValidateSettings {
        /// Path to the settings file to validate
        settings: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_no_command() {
        let cli = Cli::try_parse_from(["hosted-engine-tui"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.skip_preflight);
    }

    #[test]
    fn test_cli_deploy_image() {
        let cli = Cli::try_parse_from([
            "hosted-engine-tui",
            "deploy",
            "--image",
            "http://host/engine.iso",
            "--maintenance",
            "global",
            "--yes",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Deploy {
                image,
                pxe,
                maintenance,
                yes,
            }) => {
                assert_eq!(image.as_deref(), Some("http://host/engine.iso"));
                assert!(!pxe);
                assert_eq!(maintenance, Some(MaintenanceLevel::Global));
                assert!(yes);
            }
            _ => panic!("Expected Deploy command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_maintenance() {
        let result = Cli::try_parse_from([
            "hosted-engine-tui",
            "deploy",
            "--pxe",
            "--maintenance",
            "partial",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_wrap_forwards_hyphen_args() {
        let cli = Cli::try_parse_from([
            "hosted-engine-tui",
            "wrap",
            "--",
            "--config-append=/tmp/a.conf",
            "--offline",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Wrap { args }) => {
                assert_eq!(args, vec!["--config-append=/tmp/a.conf", "--offline"]);
            }
            _ => panic!("Expected Wrap command"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hosted-engine-tui",
            "status",
            "--settings",
            "/etc/he-tui.json",
            "--skip-preflight",
        ])
        .unwrap();
        assert_eq!(cli.settings.unwrap().to_str().unwrap(), "/etc/he-tui.json");
        assert!(cli.skip_preflight);
    }

    #[test]
    fn test_cli_validate_settings() {
        let cli = Cli::try_parse_from(["hosted-engine-tui", "validate-settings", "/tmp/s.json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::ValidateSettings { .. })));
    }
}
