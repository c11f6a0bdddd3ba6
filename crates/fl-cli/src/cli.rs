//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fl_client::UsageSource;
use fl_core::TimeFrame;

/// Productivity reports and due-date alerts.
///
/// Shapes app and browser usage from the FocusLens backend into daily, weekly
/// or monthly summaries with a focus score, and watches the todo list for
/// items coming due.
#[derive(Debug, Parser)]
#[command(name = "fl", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Summarize usage for a time frame.
    Report {
        /// Time frame: daily, weekly or monthly.
        #[arg(long, default_value = "daily")]
        frame: TimeFrame,

        /// Usage source: apps or tabs.
        #[arg(long, default_value = "apps")]
        source: UsageSource,

        /// Read usage records from a JSON file instead of the backend ("-" for stdin).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Anchor the window at this time (ISO 8601 or relative, e.g. "2 hours ago").
        #[arg(long)]
        now: Option<String>,

        /// Number of subjects listed before the rest are grouped as "Others".
        #[arg(long, default_value_t = 5)]
        top: usize,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check the todo feed once and print any alerts.
    Check {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Watch the todo feed and print alerts as they fire, until Ctrl-C.
    Watch,

    /// Push a todo's due date back.
    Snooze {
        /// The todo ID.
        id: String,

        /// Minutes to add to the due date.
        #[arg(long, default_value_t = 10)]
        minutes: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn report_defaults() {
        let cli = Cli::try_parse_from(["fl", "report"]).unwrap();
        let Some(Commands::Report {
            frame,
            source,
            input,
            now,
            top,
            json,
        }) = cli.command
        else {
            panic!("expected report command");
        };
        assert_eq!(frame, TimeFrame::Daily);
        assert_eq!(source, UsageSource::Apps);
        assert!(input.is_none());
        assert!(now.is_none());
        assert_eq!(top, 5);
        assert!(!json);
    }

    #[test]
    fn report_rejects_unknown_frame() {
        let err = Cli::try_parse_from(["fl", "report", "--frame", "yearly"]).unwrap_err();
        assert!(err.to_string().contains("invalid time frame"));
    }

    #[test]
    fn snooze_takes_id_and_minutes() {
        let cli = Cli::try_parse_from(["fl", "-v", "snooze", "64f1", "--minutes", "30"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Some(Commands::Snooze { ref id, minutes: 30 }) if id == "64f1"
        ));
    }
}
