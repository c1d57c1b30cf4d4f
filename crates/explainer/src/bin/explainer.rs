//! Command-line entry point.
//!
//! `worker` runs the job pipeline until interrupted; `submit` and `status`
//! are the intake and query side, talking to the worker only through the
//! job store and the data directory.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use explainer::{
    load_config, ChatCompletionsGenerator, Config, Database, Intake, JobStatus, JobStore,
    ResultWriter, StageArea, StatusResolver, TokioClock, Worker,
};

#[derive(Parser, Debug)]
#[command(name = "explainer", version, about = "Explain slide decks one slide at a time")]
struct Cli {
    /// Path to a JSON config file. Built-in defaults are used when absent.
    #[arg(short, long, env = "EXPLAINER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process pending jobs until interrupted.
    Worker,

    /// Submit a .pptx deck and print its job uid.
    Submit {
        file: PathBuf,
        /// Owner email address.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show a job's status, and its explanations once done.
    Status {
        /// Job uid returned by `submit`.
        #[arg(conflicts_with = "owner")]
        uid: Option<String>,
        /// Look up the latest upload of this owner instead of a uid.
        #[arg(long, requires = "name")]
        owner: Option<String>,
        /// Original file name of the upload, used with --owner.
        #[arg(long, requires = "owner")]
        name: Option<String>,
    },

    /// List an owner's jobs, or all jobs in the given statuses.
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_delimiter = ',', default_value = "pending,processing")]
        status: Vec<JobStatus>,
    },
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("explainer=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &Config) -> Result<JobStore> {
    let path = config.database_path();
    let db = Database::open(&path)
        .with_context(|| format!("Failed to open job store at {}", path.display()))?;
    Ok(JobStore::new(db))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    let store = open_store(&config)?;

    match cli.command {
        Command::Worker => {
            let generator = ChatCompletionsGenerator::from_config(&config.generation)
                .context("Failed to set up the generation service client")?;
            let worker = Worker::from_config(
                &config,
                store,
                Arc::new(generator),
                Arc::new(TokioClock),
            )
            .context("Invalid worker configuration")?;

            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || {
                flag.store(true, Ordering::Relaxed);
            })
            .context("Failed to install Ctrl-C handler")?;

            info!(data_directory = %config.data_directory.display(), "Starting worker");
            worker.run(shutdown).await?;
        }

        Command::Submit { file, owner } => {
            let intake = Intake::new(store, StageArea::new(&config.data_directory));
            let job = intake
                .submit_file(&file, owner.as_deref())
                .with_context(|| format!("Failed to submit {}", file.display()))?;
            println!("{}", job.uid);
        }

        Command::Status { uid, owner, name } => {
            let resolver = StatusResolver::new(
                store,
                StageArea::new(&config.data_directory),
                ResultWriter::new(&config.data_directory),
            );
            let details = match (uid, owner, name) {
                (Some(uid), _, _) => resolver.resolve(&uid)?,
                (None, Some(owner), Some(name)) => {
                    resolver.resolve_by_owner_and_name(&owner, &name)?
                }
                _ => bail!("Give a uid, or both --owner and --name"),
            };
            print_json(&details)?;
        }

        Command::List { owner, status } => match owner {
            Some(owner) => {
                let resolver = StatusResolver::new(
                    store,
                    StageArea::new(&config.data_directory),
                    ResultWriter::new(&config.data_directory),
                );
                print_json(&resolver.history(&owner)?)?;
            }
            None => print_json(&store.list_by_status(&status)?)?,
        },
    }

    Ok(())
}
