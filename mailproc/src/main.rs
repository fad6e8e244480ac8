mod config;
mod lambda;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use mailproc_imf::MessageParser;
use mailproc_ingest::{DeliveryEvent, Ingestor};
use mailproc_store::storage::{aws::AwsRoot, Builder, StorageError};

use config::*;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Option<Command>,

    #[clap(short, long, env = "MAILPROC_CONFIG")]
    /// Optional tuning file, bucket and table always come from BUCKET_NAME and TABLE_NAME
    config_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve SES receipt events from the Lambda runtime (default)
    Lambda,

    /// Ingest one raw object that is already stored in the bucket
    Ingest {
        #[clap(short, long)]
        /// Object key, as written by the receipt rule
        key: String,
        #[clap(short, long)]
        /// Correlation id stored on the record, defaults to the key
        delivery_id: Option<String>,
    },

    /// Print the metadata record of a message
    Status {
        #[clap(short, long)]
        message_id: String,
    },

    #[clap(subcommand)]
    /// Specific tooling, should not be part of a normal workflow, for debug & experimentation only
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Parse a local .eml file and print what would be committed
    Parse {
        file: PathBuf,
        #[clap(short, long, default_value = "local")]
        storage_key: String,
    },
}

#[cfg(tokio_unstable)]
fn tracer() {
    console_subscriber::init();
}

#[cfg(not(tokio_unstable))]
fn tracer() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        // CloudWatch adds its own timestamps
        .without_time()
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var(
            "RUST_LOG",
            "mailproc=info,mailproc_ingest=info,mailproc_store=info",
        )
    }

    // Abort on panic, the runtime restarts the sandbox
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracer();

    let args = Args::parse();
    match args.command.unwrap_or(Command::Lambda) {
        Command::Tools(ToolsCommand::Parse { file, storage_key }) => {
            let config = match args.config_file {
                Some(path) => read_config(path)?,
                None => TuningConfig::default(),
            };
            let raw = std::fs::read(&file).with_context(|| format!("unable to read {:?}", file))?;
            let parsed = MessageParser::new(config.max_header_bytes).parse(&raw, &storage_key)?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Command::Lambda => {
            let config = Config::from_env(args.config_file)?;
            let ingestor = ingestor(&config).await?;
            if let Err(e) = lambda::run(ingestor, config.tuning.object_key_prefix).await {
                bail!("lambda runtime stopped: {}", e);
            }
        }
        Command::Ingest { key, delivery_id } => {
            let config = Config::from_env(args.config_file)?;
            let ingestor = ingestor(&config).await?;
            let event = DeliveryEvent {
                delivery_id: delivery_id.unwrap_or_else(|| key.clone()),
                storage_key: key,
            };
            let outcome = ingestor.ingest(&event).await?;
            println!("{:?}", outcome);
        }
        Command::Status { message_id } => {
            let config = Config::from_env(args.config_file)?;
            let ingestor = ingestor(&config).await?;
            match ingestor.repository().get_status(&message_id).await {
                Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                Err(StorageError::NotFound) => bail!("no record for {}", message_id),
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

async fn ingestor(config: &Config) -> Result<Ingestor> {
    tracing::info!(bucket = %config.bucket, table = %config.table, commit_mode = ?config.tuning.commit_mode, "starting");
    let root = AwsRoot::new(config.tuning.aws_region.clone()).await;
    let builder: Builder = root.store(config.aws());
    let ingestor = Ingestor::new(&builder, config.pipeline())
        .await
        .context("unable to open the object store and metadata table")?;
    Ok(ingestor)
}
