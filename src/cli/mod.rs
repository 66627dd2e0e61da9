//! Command-line interface for specify.
//!
//! Provides commands for generating a report, listing the registered
//! collection units, and showing the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{ConsoleProgress, ConsoleShell, HttpUploader};
use crate::config::Settings;
use crate::core::{Delivery, Orchestrator, Redactor, Scheduler};
use crate::domain::Outcome;
use crate::units::{default_registry, Host};

/// specify - system report collector
#[derive(Parser, Debug)]
#[command(name = "specify")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect a report and upload or save it
    Run {
        /// Save the report locally instead of uploading it
        #[arg(long)]
        local_only: bool,

        /// Where to save the report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Remove the OS username from the report
        #[arg(long)]
        redact_username: bool,

        /// Remove the commercial OneDrive path from the report
        #[arg(long)]
        redact_onedrive: bool,

        /// Upload origin (e.g. http://localhost:8080)
        #[arg(long)]
        upload_origin: Option<String>,
    },

    /// List the registered collection units
    Units,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                local_only,
                output,
                redact_username,
                redact_onedrive,
                upload_origin,
            } => {
                let mut settings = Settings::load()?;
                settings.local_only |= local_only;
                settings.redaction.username |= redact_username;
                settings.redaction.onedrive_commercial |= redact_onedrive;
                if let Some(output) = output {
                    settings.output = output;
                }
                if let Some(origin) = upload_origin {
                    settings.upload.origin = origin;
                }
                run_report(&settings).await
            }
            Commands::Units => list_units(),
            Commands::Config => show_config(),
        }
    }
}

/// Build the orchestrator described by `settings`
pub fn build_orchestrator(settings: &Settings) -> Result<Orchestrator> {
    let delivery = if settings.local_only {
        Delivery::local_only(&settings.output)
    } else {
        let uploader = HttpUploader::new(
            settings.upload.origin.clone(),
            settings.upload.endpoint.clone(),
            settings.upload_timeout(),
        )?;
        Delivery::with_uploader(&settings.output, Arc::new(uploader))
    };

    Ok(Orchestrator::new(delivery)
        .with_scheduler(Scheduler::new(settings.scheduler_settings()))
        .with_redactor(Redactor::new(settings.redaction_rules()))
        .with_progress(Arc::new(ConsoleProgress)))
}

async fn run_report(settings: &Settings) -> Result<()> {
    let registry =
        default_registry(Host::current()).context("Failed to register collection units")?;
    let orchestrator = build_orchestrator(settings)?;
    let shell = ConsoleShell::new(settings.upload.origin.clone());

    eprintln!("Collecting system information...");
    match orchestrator.run(&registry, &shell).await {
        Outcome::Fatal { reason } => anyhow::bail!("Report generation failed: {}", reason),
        _ => Ok(()),
    }
}

fn list_units() -> Result<()> {
    let registry =
        default_registry(Host::current()).context("Failed to register collection units")?;

    println!(
        "{:<14} {:<12} {:<10} {:<16} FIELDS",
        "UNIT", "CATEGORY", "BLOCKING", "DEPENDS ON"
    );
    println!("{}", "-".repeat(80));
    for unit in registry.dependency_order() {
        let category = unit
            .category()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let depends = if unit.dependencies().is_empty() {
            "-".to_string()
        } else {
            unit.dependencies().join(",")
        };
        println!(
            "{:<14} {:<12} {:<10} {:<16} {}",
            unit.name(),
            category,
            if unit.is_non_blocking() { "no" } else { "yes" },
            depends,
            unit.fields().join(", ")
        );
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let settings = Settings::load()?;

    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    let yaml = serde_yaml::to_string(&settings).context("Failed to render settings")?;
    print!("{}", yaml);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "specify",
            "run",
            "--local-only",
            "--output",
            "out.json",
            "--redact-username",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                local_only,
                output,
                redact_username,
                redact_onedrive,
                upload_origin,
            } => {
                assert!(local_only);
                assert_eq!(output, Some(PathBuf::from("out.json")));
                assert!(redact_username);
                assert!(!redact_onedrive);
                assert!(upload_origin.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_build_orchestrator_local_only() {
        let settings = Settings {
            local_only: true,
            output: PathBuf::from("x.json"),
            ..Settings::default()
        };
        let orchestrator = build_orchestrator(&settings).unwrap();
        assert!(orchestrator.delivery().is_local_only());
        assert_eq!(orchestrator.delivery().output(), PathBuf::from("x.json").as_path());
        assert!(format!("{:?}", orchestrator).contains("progress: true"));
    }
}
