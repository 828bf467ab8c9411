//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Discover, deduplicate and process news links.
///
/// Harvester asks a search provider for candidate URLs, stores each distinct
/// canonical URL once, and processes pending links with per-domain rate
/// limiting and bounded concurrency.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Database file, overriding config and environment
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Print results as pretty JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Manage query tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Run discovery for a task (or every active task)
    Run(RunArgs),

    /// Process pending links, or specific links by id
    Process(ProcessArgs),

    /// Show link and task counts
    Stats,

    /// List links left in `processing` by an interrupted run
    Stuck,

    /// Show one link and its processed content
    Show {
        /// Link id
        link_id: i64,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    /// Create a task
    Add {
        /// Unique task name
        name: String,
        /// Prompt sent to the search provider
        #[arg(long)]
        prompt: String,
        /// Free-text schedule, stored but never executed
        #[arg(long, value_name = "CRON")]
        schedule: Option<String>,
        /// Create the task disabled
        #[arg(long)]
        inactive: bool,
    },
    /// List tasks (active only unless --all)
    List {
        #[arg(long)]
        all: bool,
    },
    /// Show one task
    Show { name: String },
    /// Enable a task
    Enable { name: String },
    /// Disable a task
    Disable { name: String },
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
#[command(group(clap::ArgGroup::new("target").required(true).args(["name", "all_active"])))]
pub struct RunArgs {
    /// Task name
    pub name: Option<String>,

    /// Run every active task
    #[arg(long)]
    pub all_active: bool,

    /// Register links only; leave them pending
    #[arg(long)]
    pub no_process: bool,
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct ProcessArgs {
    /// Maximum pending links to process (default from config)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), conflicts_with = "ids")]
    pub limit: Option<u32>,

    /// Comma-separated link ids; failed links are re-run
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub ids: Vec<i64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_no_subcommand_parses() {
        let args = Args::try_parse_from(["harvester"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.json);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["harvester", "-vv", "stats"]).unwrap();
        assert_eq!(args.verbose, 2);

        let args = Args::try_parse_from(["harvester", "stats", "--verbose"]).unwrap();
        assert_eq!(args.verbose, 1);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["harvester", "stats", "--json", "--db", "x.db", "-q"]).unwrap();
        assert!(args.json);
        assert!(args.quiet);
        assert_eq!(args.db, Some(PathBuf::from("x.db")));
        assert_eq!(args.command, Some(Command::Stats));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["harvester", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["harvester", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_task_add_full() {
        let args = Args::try_parse_from([
            "harvester",
            "task",
            "add",
            "solar",
            "--prompt",
            "solar news in Malaysia",
            "--schedule",
            "0 6 * * *",
            "--inactive",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Some(Command::Task(TaskCommand::Add {
                name: "solar".into(),
                prompt: "solar news in Malaysia".into(),
                schedule: Some("0 6 * * *".into()),
                inactive: true,
            }))
        );
    }

    #[test]
    fn test_cli_task_add_requires_prompt() {
        let err = Args::try_parse_from(["harvester", "task", "add", "solar"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_run_requires_name_or_all_active() {
        let err = Args::try_parse_from(["harvester", "run"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let err = Args::try_parse_from(["harvester", "run", "solar", "--all-active"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_run_variants() {
        let args = Args::try_parse_from(["harvester", "run", "solar", "--no-process"]).unwrap();
        assert_eq!(
            args.command,
            Some(Command::Run(RunArgs {
                name: Some("solar".into()),
                all_active: false,
                no_process: true,
            }))
        );

        let args = Args::try_parse_from(["harvester", "run", "--all-active"]).unwrap();
        let Some(Command::Run(run)) = args.command else {
            panic!("expected run command");
        };
        assert!(run.all_active);
        assert!(run.name.is_none());
    }

    #[test]
    fn test_cli_process_ids_comma_separated() {
        let args = Args::try_parse_from(["harvester", "process", "--ids", "1,2,3"]).unwrap();
        assert_eq!(
            args.command,
            Some(Command::Process(ProcessArgs {
                limit: None,
                ids: vec![1, 2, 3],
            }))
        );
    }

    #[test]
    fn test_cli_process_limit_and_ids_conflict() {
        let err = Args::try_parse_from(["harvester", "process", "--limit", "5", "--ids", "1"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_process_limit_zero_rejected() {
        let err = Args::try_parse_from(["harvester", "process", "--limit", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_show_requires_numeric_id() {
        let args = Args::try_parse_from(["harvester", "show", "42"]).unwrap();
        assert_eq!(args.command, Some(Command::Show { link_id: 42 }));

        let err = Args::try_parse_from(["harvester", "show", "abc"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["harvester", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
