//! Flowpack CLI - train an MLflow project and package its model
//!
//! `flowpack --mt-file training.yaml` runs the whole pipeline; the subcommands
//! cover repackaging a finished run, generating a model library and printing
//! a packaged model's schema.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

/// Exit status for every pipeline failure.
const FAILURE_EXIT_CODE: u8 = 2;

/// Flowpack - MLflow training and GPPI packaging
#[derive(Parser, Debug)]
#[command(
    name = "flowpack",
    author,
    version,
    about = "Train an MLflow project and package its model as a GPPI binary",
    subcommand_negates_reqs = true
)]
struct Args {
    /// More extensive logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Log level; --verbose wins
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Configuration file (replaces ./.flowpackrc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON/YAML file with a model training resource
    #[arg(long = "mt-file", visible_alias = "mt", value_name = "PATH", required = true)]
    mt_file: Option<PathBuf>,

    /// Directory where the result is saved (default: $ODAHUFLOW_OUTPUT_DIR or mlflow_output)
    #[arg(long)]
    target: Option<PathBuf>,

    /// What to package
    #[arg(long, value_enum, default_value_t = Mode::Gppi)]
    mode: Mode,

    /// Also generate a Python library around the packaged model
    #[arg(long, value_name = "DIR")]
    library_output: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Model tree, entrypoint and project descriptor
    Gppi,
    /// The project's data directory and a name/version descriptor
    Project,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Package the model of an already finished run
    Package {
        /// MLflow run id
        #[arg(long)]
        run_id: String,

        /// JSON/YAML file with the model training resource the run was made for
        #[arg(long = "mt-file", visible_alias = "mt", value_name = "PATH")]
        mt_file: PathBuf,

        /// Directory where the result is saved
        #[arg(long)]
        target: Option<PathBuf>,

        /// Also generate a Python library around the packaged model
        #[arg(long, value_name = "DIR")]
        library_output: Option<PathBuf>,
    },

    /// Generate a Python library around a packaged model
    Library(commands::library::LibraryArgs),

    /// Print the OpenAPI properties of a packaged model's samples
    Schema {
        /// Model directory holding head_input.json / head_output.json
        model_dir: PathBuf,

        /// Human-readable table instead of JSON
        #[arg(long)]
        table: bool,
    },
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        args.log_level.map_or(Level::INFO, Level::from)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(args.verbose)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
    }
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    let config = commands::load_config(args.config.as_deref())?;

    match args.command {
        Some(Command::Package { run_id, mt_file, target, library_output }) => {
            commands::package::execute(config, &run_id, &mt_file, target, library_output).await
        }
        Some(Command::Library(library)) => commands::library::execute(&library),
        Some(Command::Schema { model_dir, table }) => commands::schema::execute(&model_dir, table),
        None => {
            let mt_file = args
                .mt_file
                .ok_or_else(|| anyhow::anyhow!("--mt-file is required"))?;
            commands::train::execute(config, &mt_file, args.target, args.mode, args.library_output).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);
    let verbose = args.verbose;

    match dispatch(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if verbose {
                error!("Exception occurs during model training. Message: {e:?}");
            } else {
                error!("Exception occurs during model training. Message: {e:#}");
            }
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_mt_alias_and_defaults() {
        let args = Args::try_parse_from(["flowpack", "--mt", "training.yaml"]).unwrap();
        assert_eq!(args.mt_file, Some(PathBuf::from("training.yaml")));
        assert_eq!(args.mode, Mode::Gppi);
        assert!(args.target.is_none());
        assert!(args.command.is_none());
    }

    #[test]
    fn test_subcommand_does_not_need_mt_file() {
        let args = Args::try_parse_from(["flowpack", "--verbose", "schema", "./model"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Some(Command::Schema { .. })));
    }

    #[test]
    fn test_log_level_values() {
        let args = Args::try_parse_from(["flowpack", "--mt", "t.yaml", "--log-level", "warn"]).unwrap();
        assert_eq!(args.log_level, Some(LogLevel::Warn));
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);

        let err = Args::try_parse_from(["flowpack", "--mt", "t.yaml", "--log-level", "verbose"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_mt_file_is_required() {
        let err = Args::try_parse_from(["flowpack", "--target", "out"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
