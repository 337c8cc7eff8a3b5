//! CLI argument parsing for the roster-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::types::{CommitOptions, CommitPolicy, ImportMode};

#[derive(Parser)]
#[command(name = "roster-worker", about = "Staff directory import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Validate and import a staff CSV as the local operator
    Import {
        /// CSV file with one teacher per row
        csv: PathBuf,
        /// ZIP archive with profile pictures
        #[arg(long)]
        zip: Option<PathBuf>,
        /// Delete all teachers and subjects before importing
        #[arg(long)]
        replace_all: bool,
        /// Abort the whole import when any row fails to persist
        #[arg(long)]
        all_or_nothing: bool,
        /// Run the import against an empty in-memory directory; nothing is persisted
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove expired staged imports and exit
    PurgeStaging,
}

pub fn commit_options(replace_all: bool, all_or_nothing: bool) -> CommitOptions {
    CommitOptions {
        mode: if replace_all {
            ImportMode::ReplaceAll
        } else {
            ImportMode::Merge
        },
        policy: if all_or_nothing {
            CommitPolicy::AllOrNothing
        } else {
            CommitPolicy::BestEffort
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["roster-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["roster-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_import_command_parses() {
        let cli = Cli::parse_from([
            "roster-worker",
            "import",
            "staff.csv",
            "--zip",
            "pictures.zip",
            "--replace-all",
        ]);
        match cli.command {
            Some(Command::Import { csv, zip, replace_all, all_or_nothing, dry_run }) => {
                assert_eq!(csv, PathBuf::from("staff.csv"));
                assert_eq!(zip, Some(PathBuf::from("pictures.zip")));
                assert!(replace_all);
                assert!(!all_or_nothing);
                assert!(!dry_run);
            }
            _ => panic!("expected import command"),
        }
    }

    #[test]
    fn test_cli_import_dry_run_parses() {
        let cli = Cli::parse_from(["roster-worker", "import", "staff.csv", "--dry-run"]);
        assert!(matches!(cli.command, Some(Command::Import { dry_run: true, zip: None, .. })));
    }

    #[test]
    fn test_cli_purge_staging_parses() {
        let cli = Cli::parse_from(["roster-worker", "purge-staging"]);
        assert!(matches!(cli.command, Some(Command::PurgeStaging)));
    }

    #[test]
    fn test_commit_options_from_flags() {
        assert_eq!(commit_options(false, false), CommitOptions::default());
        let options = commit_options(true, false);
        assert_eq!(options.mode, ImportMode::ReplaceAll);
        assert_eq!(options.effective_policy(), CommitPolicy::AllOrNothing);
        assert_eq!(commit_options(false, true).policy, CommitPolicy::AllOrNothing);
    }
}
