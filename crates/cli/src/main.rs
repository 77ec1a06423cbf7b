// dbfixture CLI - load dataset fixtures into a database and verify them

mod exit_codes;
mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};

use dbfixture_config::FixtureSettings;
use dbfixture_engine::{DatasetSource, FixtureError, LoadStrategy, ReconciliationEngine};
use dbfixture_io::{populate, read_script, reset_schema, DatasetParser, SqliteConnector};

use exit_codes::{fixture_exit_code, EXIT_DIFFERENCE, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "dbfixture")]
#[command(about = "Load dataset fixtures into a database and verify live tables against them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which database to talk to.
#[derive(Args, Debug, Clone)]
struct ConnectionArgs {
    /// Logical connection name from the settings file
    #[arg(long, short = 'c')]
    connection: Option<String>,

    /// Settings file (default: ~/.config/dbfixture/config.toml)
    #[arg(long, env = "DBFIXTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Open this SQLite file directly; the settings file is not read
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Insert,
    Refresh,
}

impl From<StrategyArg> for LoadStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Insert => LoadStrategy::Insert,
            StrategyArg::Refresh => LoadStrategy::Refresh,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Clear the dataset's tables and load its rows
    #[command(after_help = "\
Examples:
  dbfixture load staff.xml --db test.db
  dbfixture load staff.xml --connection main --strategy refresh")]
    Load {
        /// Flat XML dataset
        dataset: PathBuf,

        /// Override the dataset's loadStrategy
        #[arg(long, short = 's', value_enum)]
        strategy: Option<StrategyArg>,

        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Compare live tables against a dataset; exit 1 on the first difference
    #[command(after_help = "\
Examples:
  dbfixture verify expected.xml --db test.db
  dbfixture verify expected.xml --json")]
    Verify {
        /// Flat XML dataset holding the expected rows
        dataset: PathBuf,

        #[arg(long, short = 's', value_enum)]
        strategy: Option<StrategyArg>,

        /// Print the result as one JSON object on stdout
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Drop the tables and sequences a schema script creates, then run it
    ResetSchema {
        script: PathBuf,

        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Replay only the DELETE and INSERT statements of a script
    Populate {
        script: PathBuf,

        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Restart a sequence if the database has it
    ResetSequence {
        name: String,

        #[command(flatten)]
        conn: ConnectionArgs,
    },
}

fn main() -> ExitCode {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::from(EXIT_SUCCESS),
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    let result = match cli.command {
        Commands::Load { dataset, strategy, conn } => cmd_load(dataset, strategy, conn),
        Commands::Verify { dataset, strategy, json, conn } => cmd_verify(dataset, strategy, json, conn),
        Commands::ResetSchema { script, conn } => cmd_reset_schema(script, conn),
        Commands::Populate { script, conn } => cmd_populate(script, conn),
        Commands::ResetSequence { name, conn } => cmd_reset_sequence(name, conn),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    /// Exit with `code` without printing anything more.
    pub fn silent(code: u8) -> Self {
        Self { code, message: String::new(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<FixtureError> for CliError {
    fn from(err: FixtureError) -> Self {
        let hint = match &err {
            FixtureError::SchemaIntrospection(_) => {
                Some("has the schema been created? try `dbfixture reset-schema`".to_string())
            }
            _ => None,
        };
        Self { code: fixture_exit_code(&err), message: err.to_string(), hint }
    }
}

// ============================================================================
// Connection setup
// ============================================================================

struct Target {
    engine: ReconciliationEngine<SqliteConnector>,
    settings: Option<FixtureSettings>,
}

impl Target {
    fn open(args: &ConnectionArgs) -> Result<Self, CliError> {
        if let Some(db) = &args.db {
            let name = args.connection.clone().unwrap_or_else(|| "default".to_string());
            let engine = ReconciliationEngine::new(SqliteConnector::new(db.clone()), name)?;
            return Ok(Self { engine, settings: None });
        }

        let settings = match &args.config {
            Some(path) => FixtureSettings::load_from(path)?,
            None => FixtureSettings::load().map_err(|e| {
                CliError::from(e).with_hint(format!(
                    "pass --db FILE, or create {}",
                    FixtureSettings::config_path().display()
                ))
            })?,
        };

        let name = args
            .connection
            .clone()
            .unwrap_or_else(|| settings.default_connection.clone());
        let conn = settings.connection(&name)?;
        let initial = conn.load_strategy;
        let mut engine = ReconciliationEngine::new(SqliteConnector::new(conn.path.clone()), name)?;
        if let Some(strategy) = initial {
            engine.set_load_strategy(strategy);
        }
        Ok(Self { engine, settings: Some(settings) })
    }

    fn dataset_path(&self, path: &Path) -> PathBuf {
        match &self.settings {
            Some(settings) => settings.dataset_path(path),
            None => path.to_path_buf(),
        }
    }

    /// Parse a dataset; an explicit `--strategy` wins over the document's own.
    fn dataset(&self, path: &Path, strategy: Option<StrategyArg>) -> Result<DatasetSource, CliError> {
        let mut source = DatasetParser::new().parse_file(&self.dataset_path(path))?;
        if let Some(strategy) = strategy {
            source.properties.load_strategy = Some(strategy.into());
        }
        Ok(source)
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_load(dataset: PathBuf, strategy: Option<StrategyArg>, conn: ConnectionArgs) -> Result<(), CliError> {
    let mut target = Target::open(&conn)?;
    let source = target.dataset(&dataset, strategy)?;
    target.engine.load_source(&source)?;
    println!(
        "loaded {} rows into {} ({})",
        source.dataset.len(),
        target.engine.connection_name(),
        target.engine.load_strategy()
    );
    Ok(())
}

fn cmd_verify(
    dataset: PathBuf,
    strategy: Option<StrategyArg>,
    json: bool,
    conn: ConnectionArgs,
) -> Result<(), CliError> {
    let mut target = Target::open(&conn)?;
    let source = target.dataset(&dataset, strategy)?;
    let difference = target.engine.verify_source(&source)?;

    if json {
        let report = serde_json::json!({
            "ok": difference.is_none(),
            "connection": target.engine.connection_name(),
            "strategy": target.engine.load_strategy().to_string(),
            "table": difference.as_ref().map(|d| d.table()),
            "column": difference.as_ref().and_then(|d| d.column()),
            "difference": difference.as_ref().map(|d| d.to_string()),
        });
        println!("{}", report);
    } else {
        match &difference {
            Some(diff) => println!("{diff}"),
            None => println!("no differences in {} rows", source.dataset.len()),
        }
    }

    match difference {
        Some(_) => Err(CliError::silent(EXIT_DIFFERENCE)),
        None => Ok(()),
    }
}

fn cmd_reset_schema(script: PathBuf, conn: ConnectionArgs) -> Result<(), CliError> {
    let target = Target::open(&conn)?;
    let sql = read_script(&script)?;
    target.engine.with_connection(|c| reset_schema(c, &sql))?;
    Ok(())
}

fn cmd_populate(script: PathBuf, conn: ConnectionArgs) -> Result<(), CliError> {
    let target = Target::open(&conn)?;
    let sql = read_script(&script)?;
    target.engine.with_connection(|c| populate(c, &sql))?;
    Ok(())
}

fn cmd_reset_sequence(name: String, conn: ConnectionArgs) -> Result<(), CliError> {
    let target = Target::open(&conn)?;
    target.engine.reset_sequence(&name)?;
    Ok(())
}
