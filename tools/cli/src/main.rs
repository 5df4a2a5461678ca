//! Encrypt-all CLI.
//!
//! Encrypts every plain file of every user in one administrative run and
//! hands out the one-time passwords protecting newly created user keys.

mod config;
mod console;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{AppConfig, Overrides, SYSTEM_SECRET_ENV};
use console::{format_table, TerminalConsole};
use encryptall_common::{FsPath, UserId};
use encryptall_engine::{
    Collaborators, EncryptAll, RunSummary, SpoolNotifier, TreeUserBackend, TreeWalker,
    UserManager,
};
use encryptall_keys::{KeyManager, TreeKeyStore};
use encryptall_storage::{create_default_registry, FileTree};

#[derive(Parser)]
#[command(name = "encryptall")]
#[command(about = "Encrypt all user files in one administrative run")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the files live.
#[derive(Args)]
struct TreeArgs {
    /// Root directory of the user file tree.
    #[arg(short, long)]
    root: PathBuf,

    /// Storage backend: "local" or "memory" (default: from config, else local).
    #[arg(short, long)]
    backend: Option<String>,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing keys and encrypt every plain file.
    Run {
        #[command(flatten)]
        tree: TreeArgs,

        /// Encrypt for the system master key instead of per-user keys.
        #[arg(long)]
        master_key: bool,

        /// Answer every question with yes.
        #[arg(short, long)]
        yes: bool,

        /// Show new one-time passwords instead of mailing them.
        #[arg(long)]
        show_passwords: bool,

        /// Spool directory for credential mails.
        #[arg(long)]
        mail_spool: Option<PathBuf>,
    },

    /// Report per user how many files are encrypted and still plain.
    Status {
        #[command(flatten)]
        tree: TreeArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            tree,
            master_key,
            yes,
            show_passwords,
            mail_spool,
        } => {
            let overrides = Overrides {
                backend: tree.backend.clone(),
                master_key,
                show_passwords,
                mail_spool,
                system_secret: std::env::var(SYSTEM_SECRET_ENV).ok(),
            };
            cmd_run(&tree, overrides, yes, cli.json).await
        }

        Commands::Status { tree } => {
            let overrides = Overrides {
                backend: tree.backend.clone(),
                system_secret: std::env::var(SYSTEM_SECRET_ENV).ok(),
                ..Overrides::default()
            };
            cmd_status(&tree, overrides, cli.json).await
        }
    }
}

/// Everything both commands need.
struct Setup {
    config: AppConfig,
    tree: Arc<dyn FileTree>,
    store: Arc<TreeKeyStore>,
    users: Arc<UserManager>,
}

fn open(args: &TreeArgs, overrides: Overrides) -> Result<Setup> {
    let config = AppConfig::load(args.config.as_deref())?.apply(overrides);

    let registry = create_default_registry();
    let tree = registry
        .resolve(
            config.backend(),
            serde_json::json!({ "root": args.root.to_string_lossy() }),
        )
        .with_context(|| format!("Failed to open {} backend", config.backend()))?;
    info!(backend = %config.backend(), root = %args.root.display(), "Opened file tree");

    let store = Arc::new(TreeKeyStore::new(tree.clone(), config.keys.clone()));
    let users = Arc::new(UserManager::new().with_backend(Arc::new(
        TreeUserBackend::new(tree.clone()).with_emails(config.email_map()),
    )));

    Ok(Setup {
        config,
        tree,
        store,
        users,
    })
}

/// Run the full orchestration.
async fn cmd_run(args: &TreeArgs, overrides: Overrides, yes: bool, json: bool) -> Result<()> {
    let setup = open(args, overrides)?;
    let config = setup.config;

    if config.run.mode.is_master_key() && config.keys.system_secret.is_empty() {
        anyhow::bail!(
            "Master key mode needs a system secret (config keys.system_secret or {})",
            SYSTEM_SECRET_ENV
        );
    }

    let console = Arc::new(TerminalConsole::new(yes));
    let mut with = Collaborators::from_key_store(setup.tree, setup.users, setup.store, console);
    if let Some(mail) = &config.mail {
        with = with.with_notifier(Arc::new(SpoolNotifier::new(&mail.spool, &mail.sender)));
    }

    let summary = EncryptAll::new(config.run.clone(), with)
        .run()
        .await
        .context("Encrypt-all run aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if !summary.is_clean() {
        anyhow::bail!(
            "{} files and {} users failed; run again to retry",
            summary.failed_files.len(),
            summary.failed_users.len()
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Encryption finished ({} mode)", summary.mode);
    println!("  Users processed: {}", summary.users_processed);
    println!("  Users skipped: {}", summary.users_skipped);
    println!("  Files encrypted: {}", summary.files_encrypted);
    println!("  Files already encrypted: {}", summary.files_skipped);

    if !summary.failed_users.is_empty() {
        println!("Failed users:");
        for failed in &summary.failed_users {
            println!("  {}: {}", failed.user, failed.reason);
        }
    }
    if !summary.failed_files.is_empty() {
        println!("Failed files:");
        for failed in &summary.failed_files {
            println!("  {}: {}", failed.path, failed.reason);
        }
    }
}

/// Encryption state of one user's files.
#[derive(Debug, Serialize)]
struct UserStatus {
    user: UserId,
    has_keys: bool,
    encrypted: u64,
    plain: u64,
    skipped_shares: u64,
}

/// Read-only walk over every user's files.
async fn cmd_status(args: &TreeArgs, overrides: Overrides, json: bool) -> Result<()> {
    let setup = open(args, overrides)?;
    let mut report = Vec::new();

    for user in setup.users.users().await {
        report.push(user_status(&setup, user).await?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = report
        .iter()
        .map(|s| {
            vec![
                s.user.to_string(),
                if s.has_keys { "yes" } else { "no" }.to_string(),
                s.encrypted.to_string(),
                s.plain.to_string(),
            ]
        })
        .collect();
    println!("Key mode: {}", setup.config.run.mode);
    println!(
        "{}",
        format_table(&["User", "Keys", "Encrypted", "Plain"], &rows)
    );
    Ok(())
}

async fn user_status(setup: &Setup, user: UserId) -> Result<UserStatus> {
    let has_keys = setup
        .store
        .user_has_keys(&user)
        .await
        .with_context(|| format!("Failed to look up keys of {}", user))?;

    let mut walker = TreeWalker::new(setup.tree.clone(), FsPath::user_files_root(&user));
    let mut encrypted = 0;
    let mut plain = 0;
    while let Some(path) = walker
        .next_file()
        .await
        .with_context(|| format!("Failed to walk files of {}", user))?
    {
        if setup.store.version(&path).await? > 0 {
            encrypted += 1;
        } else {
            plain += 1;
        }
    }

    Ok(UserStatus {
        user,
        has_keys,
        encrypted,
        plain,
        skipped_shares: walker.skipped_shares(),
    })
}
