//! # Profsync CLI - Configuration profiles you can take anywhere
//!
//! Command-line interface for the profsync library.
//!
//! ## Features
//! - Store the local configuration as a named profile
//! - Restore, verify, list and delete stored profiles
//! - Inspect what a profile would contain right now
//! - Keep a profile in sync while files change
//!
//! ## Usage
//! ```bash
//! # Store the current configuration as "work"
//! profsync store work
//!
//! # See what is stored
//! profsync list
//!
//! # Restore it on another machine
//! profsync restore work --yes
//!
//! # Keep "work" up to date while editing
//! profsync watch work
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use profsync::utils::format_bytes;
use profsync::{
    Config, Profsync, ProfsyncError, Result, SizeReport, TracingSink, Verbosity,
    VerificationReport,
};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Profsync CLI - snapshot, store and restore configuration profiles
#[derive(Parser)]
#[command(name = "profsync")]
#[command(version)]
#[command(about = "Snapshot, store and restore configuration profiles")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/profsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the local configuration as a profile
    Store {
        /// Profile name (lowercase letters, digits and hyphens)
        name: String,
    },

    /// Replace the local configuration with a stored profile
    Restore {
        /// Profile name
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Check a stored profile, or the local state when no name is given
    Verify {
        /// Profile name
        name: Option<String>,
    },

    /// Delete a stored profile
    Delete {
        /// Profile name
        name: String,
    },

    /// List stored profiles
    List,

    /// Show what would be stored right now
    Status,

    /// Keep a profile in sync with local changes until interrupted
    Watch {
        /// Profile name
        name: String,

        /// Only report failures
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if matches!(cli.command, Commands::Watch { quiet: false, .. }) {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(e.exit_code());
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let profsync = Profsync::from_config(&config)?;

    match cli.command {
        Commands::Store { name } => cmd_store(&profsync, &name),
        Commands::Restore { name, yes } => cmd_restore(&profsync, &name, yes),
        Commands::Verify { name } => cmd_verify(&profsync, name.as_deref()),
        Commands::Delete { name } => cmd_delete(&profsync, &name),
        Commands::List => cmd_list(&profsync),
        Commands::Status => cmd_status(&profsync),
        Commands::Watch { name, quiet } => {
            let verbosity = if quiet {
                Verbosity::Quiet
            } else if cli.verbose {
                Verbosity::Verbose
            } else {
                Verbosity::Normal
            };
            cmd_watch(&profsync, &name, verbosity)
        }
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_size(size: &SizeReport) {
    println!(
        "  Size: {} ({} encoded)",
        format_bytes(size.raw_bytes).cyan(),
        format_bytes(size.encoded_bytes).cyan()
    );
    if !size.within_limit {
        println!("  {} Above the remote size limit", "✗".red().bold());
    } else if size.exceeds_web_interface_limit {
        println!("  {} Too large to view in the web interface", "⚠".yellow().bold());
    } else if size.is_large {
        println!("  {} Large profile", "⚠".yellow().bold());
    }
}

fn print_report(report: &VerificationReport) {
    for entry in &report.entries {
        let mark = match (entry.present, &entry.error) {
            (true, None) => "✓".green(),
            (true, Some(_)) => "✗".red(),
            (false, _) if entry.essential => "✗".red(),
            (false, _) => "-".dimmed(),
        };
        let mut line = format!("  {} {}", mark, entry.entry);
        if let Some(count) = entry.file_count {
            line.push_str(&format!(" ({} files)", count));
        }
        if entry.essential {
            line.push_str(&" [essential]".dimmed().to_string());
        }
        println!("{}", line);
        if let Some(error) = &entry.error {
            println!("      {}", error.yellow());
        }
    }
}

/// Store the local configuration
///
/// The live verification gate runs first; nothing is uploaded when the
/// local state is missing essential entries.
fn cmd_store(profsync: &Profsync, name: &str) -> Result<()> {
    println!("{} {}", "Storing profile".blue().bold(), name.yellow());

    let pb = spinner("Archiving and uploading...");
    let result = profsync.store(name);
    pb.finish_and_clear();
    let result = result?;

    println!(
        "{} Stored profile {}",
        "✓".green().bold(),
        result.profile.to_string().yellow().bold()
    );
    println!(
        "  Files: {} in {} directories",
        result.stats.files.to_string().cyan(),
        result.stats.directories
    );
    if result.stats.credentials {
        println!("  Keychain credentials: {}", "included".cyan());
    }
    print_size(&result.size);
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Err(ProfsyncError::config(
            "restore needs confirmation; pass --yes when not running interactively",
        ));
    }
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Restore a profile over the local configuration
///
/// The profile is verified in a temporary directory before anything local
/// is touched.
fn cmd_restore(profsync: &Profsync, name: &str, yes: bool) -> Result<()> {
    if !yes
        && !confirm(&format!(
            "Overwrite local configuration with profile '{}'?",
            name
        ))?
    {
        println!("{}", "Restore cancelled".dimmed());
        return Ok(());
    }

    println!("{} {}", "Restoring profile".blue().bold(), name.yellow());
    let pb = spinner("Downloading and verifying...");
    let result = profsync.restore(name);
    pb.finish_and_clear();
    let result = result?;

    println!("{} Restoration complete", "✓".green().bold());
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    if result.credentials_restored {
        println!("  Keychain credentials: {}", "restored".cyan());
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );

    if !result.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &result.warnings {
            println!("  - {}", warning.yellow());
        }
    }
    Ok(())
}

/// Verify a stored profile or the local state
fn cmd_verify(profsync: &Profsync, name: Option<&str>) -> Result<()> {
    let report = match name {
        Some(name) => {
            println!("{} {}", "Verifying profile".blue().bold(), name.yellow());
            profsync.verify(name)?
        }
        None => {
            println!("{}", "Verifying local configuration".blue().bold());
            profsync.verify_local()
        }
    };

    println!("\n{}", "Verification Report:".bold());
    print_report(&report);
    println!("  Verification time: {}ms", report.verification_time_ms);

    let report = report.into_result()?;
    println!("\n{} {}", "✓".green().bold(), report.summary());
    Ok(())
}

fn cmd_delete(profsync: &Profsync, name: &str) -> Result<()> {
    profsync.delete(name)?;
    println!("{} Deleted profile {}", "✓".green().bold(), name.yellow());
    Ok(())
}

fn cmd_list(profsync: &Profsync) -> Result<()> {
    let profiles = profsync.list()?;
    if profiles.is_empty() {
        println!("{}", "No profiles stored".yellow());
        return Ok(());
    }
    for profile in profiles {
        println!("{}", profile);
    }
    Ok(())
}

/// Show the local state as it would be stored
fn cmd_status(profsync: &Profsync) -> Result<()> {
    let status = profsync.status()?;

    println!("{}", "Profsync Status:".blue().bold());
    println!("\n{}", "Sources:".bold());
    for source in &status.sources {
        let mark = if source.present { "✓".green() } else { "-".dimmed() };
        println!("  {} {} → {}", mark, source.entry_name, source.path.display());
    }
    if status.keychain {
        let state = if status.credentials_present { "present".green() } else { "absent".yellow() };
        println!("  Keychain credentials: {}", state);
    }

    println!("\n{}", "Snapshot:".bold());
    println!("  Fingerprint: {}", status.fingerprint.short().yellow());
    match &status.size {
        Some(size) => {
            let files = status.entries.iter().filter(|e| !e.is_dir).count();
            println!("  Entries: {} ({} files)", status.entries.len(), files);
            print_size(size);
        }
        None => println!("  {}", "Nothing to store".yellow()),
    }

    println!("\n{}", "Verification:".bold());
    print_report(&status.verification);
    if status.verification.valid {
        println!("  {}", "Ready to store".green());
    } else {
        for issue in &status.verification.issues {
            println!("  - {}", issue.yellow());
        }
    }
    Ok(())
}

/// Keep a profile in sync until Ctrl-C
fn cmd_watch(profsync: &Profsync, name: &str, verbosity: Verbosity) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if verbosity != Verbosity::Quiet {
        println!(
            "{} {} {}",
            "Watching profile".blue().bold(),
            name.yellow(),
            "(Ctrl-C to stop)".dimmed()
        );
    }

    let sink = Arc::new(TracingSink::new(verbosity));
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let summary = runtime.block_on(profsync.watch(name, sink, stop))?;

    if verbosity != Verbosity::Quiet {
        println!("{} Stopped after {} saves", "✓".green().bold(), summary.save_count);
    }
    if summary.pending {
        println!("{}", "Some changes were not saved".yellow());
    }
    Ok(())
}
