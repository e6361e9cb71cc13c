//! CLI command definitions for homework-worker
//!
//! The main entry point is the `Cli` struct which contains subcommands.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Homework import worker and job API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the job worker loop (default if no subcommand given)
    Work,

    /// Serve the HTTP API with an in-process worker
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Submit an import_homework job
    Submit(SubmitArgs),

    /// Show a job owned by a user
    Job {
        id: i64,
        #[arg(long)]
        user: i64,
    },

    /// Manage the subject catalog
    #[command(subcommand)]
    Subjects(SubjectsCommand),

    /// List a child's tasks
    Tasks { child_id: i64 },
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Owning user id
    #[arg(long)]
    pub user: i64,

    /// Child the homework belongs to
    #[arg(long)]
    pub child: i64,

    /// Homework text
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub text: Option<String>,

    /// Read homework text from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl SubmitArgs {
    pub fn raw_text(&self) -> std::io::Result<String> {
        match (&self.text, &self.file) {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(path)) => std::fs::read_to_string(path),
            (None, None) => Ok(String::new()),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SubjectsCommand {
    /// List subjects
    List,
    /// Add a subject
    Add { name: String },
    /// Insert the canonical subjects
    Seed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_none() {
        let cli = Cli::try_parse_from(["homework-worker"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log, "2");
    }

    #[test]
    fn submit_requires_text_or_file() {
        assert!(Cli::try_parse_from(["homework-worker", "submit", "--user", "1", "--child", "2"]).is_err());
        let cli = Cli::try_parse_from([
            "homework-worker", "submit", "--user", "1", "--child", "2", "--text", "труд: фартук",
        ])
        .unwrap();
        let Some(Command::Submit(args)) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.raw_text().unwrap(), "труд: фартук");
    }

    #[test]
    fn global_database_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["homework-worker", "tasks", "3", "--database", "x.db"]).unwrap();
        assert_eq!(cli.database.as_deref(), Some("x.db"));
        assert!(matches!(cli.command, Some(Command::Tasks { child_id: 3 })));
    }
}
