mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use repo_guard::{logging, GuardConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "repo-guard")]
#[command(version)]
#[command(about = "Unattended backup and security scanning for local git repositories", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/repo-guard/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit, branch, push and prune every repository
    Backup {
        /// Create backup branches for dirty repositories on any branch
        #[arg(long)]
        force: bool,
    },

    /// Show repository state without changing anything
    Status,

    /// Run the security checks and write a security summary
    Scan,

    /// Manage encrypted archives of backup sets
    #[command(subcommand)]
    Archive(ArchiveCommand),

    /// Export or import the archive key
    #[command(subcommand)]
    Key(KeyCommand),

    /// Copy a suspicious file into quarantine
    Quarantine {
        /// File to isolate
        file: PathBuf,

        /// Delete the original after the copy is verified
        #[arg(long)]
        remove_original: bool,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ArchiveCommand {
    /// Archive the named backup sets (all when none given)
    Create { sets: Vec<String> },

    /// Verify archives (all when none given)
    Verify { archives: Vec<PathBuf> },

    /// List archives with their validity
    List,

    /// Restore an archive into an empty or missing directory
    Restore { archive: PathBuf, dest: PathBuf },

    /// Apply the retention tiers to every backup set
    Prune,
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Export the archive key
    Export {
        /// Output file path
        output: PathBuf,
    },

    /// Import an archive key (only when none exists)
    Import {
        /// Input file path
        input: PathBuf,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = GuardConfig::load(cli.config.as_deref())?;
    logging::init(cli.verbose, Some(&config.log_dir()))?;

    match cli.command {
        Commands::Backup { force } => commands::backup(config, force),
        Commands::Status => commands::status(config),
        Commands::Scan => commands::scan(config),
        Commands::Archive(cmd) => match cmd {
            ArchiveCommand::Create { sets } => commands::archive_create(config, &sets),
            ArchiveCommand::Verify { archives } => commands::archive_verify(&config, &archives),
            ArchiveCommand::List => commands::archive_list(&config),
            ArchiveCommand::Restore { archive, dest } => {
                commands::archive_restore(&config, &archive, &dest)
            }
            ArchiveCommand::Prune => commands::archive_prune(config),
        },
        Commands::Key(cmd) => match cmd {
            KeyCommand::Export { output } => commands::export_key(&config, &output),
            KeyCommand::Import { input } => commands::import_key(&config, &input),
        },
        Commands::Quarantine {
            file,
            remove_original,
        } => commands::quarantine(&config, &file, remove_original),
        Commands::Config => commands::show_config(&config),
    }
}
