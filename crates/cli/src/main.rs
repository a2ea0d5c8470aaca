//! portsync command-line tool.
//!
//! Runs upstream sync sessions against a downstream ports tree, re-runs
//! conflict resolution on a repository left mid-merge, and generates /
//! validates configuration files.

mod doctor;
mod logging;
mod report;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use portsync_core::config::AppConfig;
use portsync_core::conflict::{ResolutionDriver, StagingManager};
use portsync_core::{GitClient, SessionOptions, SyncEngine, SyncSession};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// portsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "portsync",
    version,
    about = "Sync a downstream ports tree with upstream and resolve merge conflicts"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "~/.config/portsync/portsync.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full sync session on a new dated branch.
    Run {
        /// Do everything except push the branch.
        #[arg(long)]
        dry_run: bool,

        /// Log at debug level.
        #[arg(short, long)]
        verbose: bool,

        /// Skip poudriere build verification.
        #[arg(long)]
        skip_build: bool,
    },

    /// Resolve conflicts in a repository already in a conflicted merge.
    Resolve {
        /// Repository to resolve (defaults to repository.path).
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Print the resolution report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check tools, configuration and repository health.
    Doctor,

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./portsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = PathBuf::from(expand_tilde(&cli.config));

    match cli.command {
        Commands::Init { output } => {
            let _guard = logging::init("warn", None, false)?;
            cmd_init(&output)
        }
        Commands::Validate => {
            let _guard = logging::init("warn", None, false)?;
            cmd_validate(&config_path)
        }
        Commands::Doctor => {
            let config = load_config(&config_path)?;
            let _guard = logging::init("warn", None, false)?;
            doctor::run_doctor(&config)
        }
        Commands::Run {
            dry_run,
            verbose,
            skip_build,
        } => {
            let config = load_valid_config(&config_path)?;
            let _guard = logging::init(
                &config.session.log_level,
                config.session.log_file.as_deref(),
                verbose,
            )?;
            cmd_run(
                config,
                SessionOptions {
                    dry_run,
                    verbose,
                    skip_build,
                },
            )
        }
        Commands::Resolve { repo, json } => {
            let config = load_valid_config(&config_path)?;
            let _guard = logging::init(
                &config.session.log_level,
                config.session.log_file.as_deref(),
                false,
            )?;
            let repo = repo.unwrap_or_else(|| config.repository.path.clone());
            cmd_resolve(&config, &repo, json)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = AppConfig::load_from_file(path)
        .with_context(|| format!("failed to load configuration file {}", path.display()))?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    Ok(config)
}

/// Load, resolve and validate; sessions refuse an invalid configuration.
fn load_valid_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("invalid configuration {}", path.display()))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_run(config: AppConfig, options: SessionOptions) -> Result<()> {
    let session = SyncSession::today(Arc::new(config), options);
    let branch = session.branch().to_string();
    let mut engine = SyncEngine::new(session);

    println!(
        "Starting sync session on {}{}",
        style::branch(&branch),
        if options.dry_run { " (dry run)" } else { "" }
    );

    match engine.run() {
        Ok(summary) => {
            report::print_summary(&summary);
            let unresolved = summary
                .resolution
                .as_ref()
                .is_some_and(|r| r.needs_manual_follow_up());
            if unresolved {
                println!(
                    "{}",
                    style::warn(&format!(
                        "Branch {} left mid-merge for manual resolution",
                        style::branch(&summary.branch)
                    ))
                );
            } else if summary.pushed {
                println!(
                    "{}",
                    style::success(&format!("Pushed branch {}", style::branch(&summary.branch)))
                );
            } else {
                println!("Branch: {}", style::branch(&summary.branch));
            }
            Ok(())
        }
        Err(e) => {
            let failed_in = engine.failed_in();
            let state = failed_in
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown state".to_string());
            // The error line is the last one printed; name the branch there
            // whenever it may already exist.
            let context = if failed_in.is_some_and(|s| s.branch_touched()) {
                format!("sync session on branch {} failed in {}", branch, state)
            } else {
                format!("sync session failed in {}", state)
            };
            Err(anyhow::Error::new(e).context(context))
        }
    }
}

fn cmd_resolve(config: &AppConfig, repo: &Path, json: bool) -> Result<()> {
    tracing::info!(repo = %repo.display(), "resolving conflicts in existing merge");
    let mut client = GitClient::new(repo)
        .with_context(|| format!("failed to open repository {}", repo.display()))?
        .with_identity(&config.identity.name, &config.identity.email);

    let mut driver = ResolutionDriver::new(StagingManager::from_config(config));
    let report = driver
        .run(&mut client)
        .context("conflict resolution failed")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{}", rendered);
    } else {
        report::print_resolution(&report);
        if let Some(ref sha) = report.commit {
            println!("{}", style::success(&format!("Committed resolution {}", sha)));
        }
    }
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    std::fs::write(output, AppConfig::default_toml()).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your repository and upstream details");
    println!("  2. Set the referenced environment variable (PORTSYNC_GIT_TOKEN) if pushing needs auth");
    println!(
        "  3. Validate with: portsync validate --config {}",
        output.display()
    );
    println!("  4. Check tools with: portsync doctor --config {}", output.display());
    println!("  5. Run a session: portsync run --dry-run --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let repo = &config.repository;
    println!();
    println!("Configuration summary:");
    println!("  Repository    : {}", repo.path.display());
    println!("  Origin        : {} ({})", repo.origin_url, repo.push_remote);
    println!("  Upstream      : {} ({})", repo.upstream_url, repo.upstream_remote);
    println!(
        "  Branches      : {} <- {}/{}",
        repo.base_branch, repo.upstream_remote, repo.upstream_branch
    );
    println!(
        "  Token         : {}",
        if repo.token.is_some() { "set" } else { "not set" }
    );
    println!("  Branch prefix : {}", config.session.branch_prefix);
    println!("  Recovery dir  : {}", config.session.recovery_dir.display());
    println!("  Merge tool    : {:?}", config.merge.tool);
    println!(
        "  Build         : {}",
        if config.build.enabled {
            format!("poudriere jail {}", config.build.jail)
        } else {
            "disabled".to_string()
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}
