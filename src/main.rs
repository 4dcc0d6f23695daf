// 🏗️ migrate - run, check and roll back property migration phases

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use property_migration::logging::{init_logging, LogConfig, LogFormat};
use property_migration::orchestrator::log_critical_error;
use property_migration::{
    MigrationConfig, ModuleStatus, Phase, PhaseOrchestrator, PhaseOutcome, RollbackManager,
    RollbackPoint, Workspace,
};

#[derive(Parser)]
#[command(
    name = "migrate",
    version,
    about = "Phased legacy property data migration (dm1_crp → dm2_uat → dm3_prod)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatArg,
}

#[derive(Subcommand)]
enum Command {
    /// Run one migration phase
    Run {
        /// dm1_crp, dm2_uat or dm3_prod
        #[arg(long, value_parser = parse_phase)]
        phase: Phase,

        /// Migration workspace root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Configuration file (default: <ROOT>/config/<PHASE>.yaml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Skip the interactive production confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Parse and validate a configuration file
    CheckConfig {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Restore a rollback point
    Rollback {
        #[arg(value_name = "SNAPSHOT_DIR")]
        snapshot: PathBuf,

        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

fn parse_phase(name: &str) -> std::result::Result<Phase, String> {
    Phase::from_name(name).ok_or_else(|| format!("unknown phase '{}'", name))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    let log_config = LogConfig::from_flags(cli.verbose, cli.quiet).with_format(format);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }

    match cli.command {
        Command::Run {
            phase,
            root,
            config,
            yes,
        } => run_phase(phase, root, config, yes),
        Command::CheckConfig { file } => check_config(file),
        Command::Rollback { snapshot, root } => rollback(snapshot, root),
    }
}

fn run_phase(phase: Phase, root: PathBuf, config: Option<PathBuf>, yes: bool) -> Result<()> {
    println!("🏗️  Phase {}", phase);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if phase == Phase::Production && !yes {
        let stdin = io::stdin();
        if !confirm_production(&mut stdin.lock(), &mut io::stdout())? {
            println!("❌ Production migration cancelled");
            return Ok(());
        }
    }

    let workspace = Workspace::new(&root);
    let mut orchestrator =
        match PhaseOrchestrator::from_workspace(workspace.clone(), phase, config.as_deref()) {
            Ok(o) => o,
            Err(e) => {
                // Nothing was snapshotted yet
                log_critical_error(&workspace, phase.as_str(), &e);
                println!("\n❌ Phase {} failed before start: {}", phase, e);
                println!("   Rollback not possible: no rollback point was created");
                return Err(e).context("could not load migration configuration");
            }
        };

    println!("📋 Modules: {}", orchestrator.config().modules.join(", "));
    println!("🆔 Run: {}\n", orchestrator.run_id());

    match orchestrator.run() {
        Ok(outcome) => {
            print_outcome(&outcome);
            println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("🎉 Phase {} COMPLETE", phase);
            println!("✓ {}", outcome.summary());
            Ok(())
        }
        Err(e) => {
            println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("❌ Phase {} FAILED", phase);
            println!("   State: {:?}", orchestrator.state());
            println!("   See {}", workspace.critical_error_log().display());
            Err(e).with_context(|| format!("phase {} failed", phase))
        }
    }
}

fn print_outcome(outcome: &PhaseOutcome) {
    if let Some(point) = &outcome.rollback_point {
        println!("💾 Rollback point: {}", point.display());
    }
    if let Some(preflight) = &outcome.preflight {
        for check in &preflight.checks {
            println!("✓ Pre-flight {}: {}", check.name, check.detail);
        }
    }

    for m in &outcome.modules {
        match &m.status {
            ModuleStatus::Written => {
                println!("✅ {}: {} records", m.module, m.records);
                if let Some(path) = &m.output_file {
                    println!("   → {}", path.display());
                }
                if let Some(recon) = &m.reconciliation {
                    println!("   🔍 {}", recon.summary());
                }
            }
            ModuleStatus::NoChanges => println!("➖ {}: no changes", m.module),
            ModuleStatus::ValidationFailed => {
                println!("⚠️  {}: validation FAILED, output withheld", m.module);
                if let Some(report) = &m.validation {
                    for error in &report.errors {
                        println!("   - {}", error);
                    }
                }
                if let Some(path) = &m.validation_report {
                    println!("   Report: {}", path.display());
                }
            }
            ModuleStatus::Failed(error) => println!("❌ {}: {}", m.module, error),
        }
    }
}

/// Two typed confirmations: PROD, then CONFIRM
fn confirm_production(input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    for expected in ["PROD", "CONFIRM"] {
        write!(output, "⚠️  Type {} to continue with the production migration: ", expected)?;
        output.flush()?;

        let mut line = String::new();
        input
            .read_line(&mut line)
            .context("could not read confirmation")?;
        if line.trim() != expected {
            return Ok(false);
        }
    }
    Ok(true)
}

fn check_config(file: PathBuf) -> Result<()> {
    let config = MigrationConfig::load(&file)
        .with_context(|| format!("invalid configuration {}", file.display()))?;
    let phase = config.phase_kind()?;

    println!("✓ {} is valid", file.display());
    println!("  Phase: {}", phase);
    println!("  Modules: {}", config.modules.join(", "));
    for module in &config.modules {
        println!(
            "  {}: key {} → {}, {} mapped fields",
            module,
            config.key_column(module)?,
            config.target_key_column(module)?,
            config.field_mapping(module)?.len()
        );
    }
    Ok(())
}

fn rollback(snapshot: PathBuf, root: PathBuf) -> Result<()> {
    let point = RollbackPoint::open(&snapshot)
        .with_context(|| format!("not a rollback point: {}", snapshot.display()))?;
    if point.manifest.phase.is_empty() {
        bail!("rollback point {} names no phase", snapshot.display());
    }

    println!("⏪ Restoring {} from {}", point.phase(), snapshot.display());
    RollbackManager::new(Workspace::new(root))
        .execute_rollback(&point)
        .context("rollback failed")?;
    println!("✓ Rollback complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_confirmation() {
        let mut out = Vec::new();
        assert!(confirm_production(&mut "PROD\nCONFIRM\n".as_bytes(), &mut out).unwrap());
        assert!(!confirm_production(&mut "PROD\nyes\n".as_bytes(), &mut out).unwrap());
        assert!(!confirm_production(&mut "".as_bytes(), &mut out).unwrap());
    }

    #[test]
    fn test_phase_argument() {
        let cli = Cli::try_parse_from(["migrate", "run", "--phase", "dm2", "--yes"]).unwrap();
        match cli.command {
            Command::Run { phase, yes, .. } => {
                assert_eq!(phase, Phase::Staging);
                assert!(yes);
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["migrate", "run", "--phase", "dm9"]).is_err());
    }
}
