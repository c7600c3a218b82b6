mod commands;
mod config;
mod context;
mod credentials;
mod model;
mod notify;
mod output;
mod pipeline;
mod plugins;
mod policy;
mod queue;
mod store;
mod traits;

#[cfg(test)]
mod test_helpers;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{
    DiscoverCommand, JobCommand, PolicyCommand, RetrieveCommand, RunCommand, ScanCommand,
};
use config::Settings;
use model::{JobId, Provider, ScanTrigger};
use policy::RegorusEngine;
use std::path::PathBuf;
use traits::RealFileSystem;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "woz")]
#[command(about = "Woz - cloud security posture scanner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args, Debug)]
struct TriggerArgs {
    /// Tenant identifier recorded on every row
    #[arg(long)]
    client_id: String,

    /// AWS account id or GCP project id
    #[arg(long)]
    account_id: String,

    /// Address failure reports are sent to
    #[arg(long)]
    client_email: String,

    /// aws or gcp
    #[arg(long)]
    provider: Provider,
}

impl From<TriggerArgs> for ScanTrigger {
    fn from(args: TriggerArgs) -> Self {
        ScanTrigger {
            client_id: args.client_id,
            account_id: args.account_id,
            client_email: args.client_email,
            provider: args.provider,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Discover an account's resources and queue the job for retrieval
    Discover {
        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Retrieve configurations for queued jobs and queue them for scanning
    Retrieve {
        /// Job message JSON; read from stdin, one per line, when omitted
        #[arg(long = "message")]
        messages: Vec<String>,
    },

    /// Scan retrieved configurations and notify clients of failures
    Scan {
        /// Job message JSON; read from stdin, one per line, when omitted
        #[arg(long = "message")]
        messages: Vec<String>,
    },

    /// Run discovery, retrieval and scan in one process
    Run {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Keep jobs and results in memory instead of the store
        #[arg(long)]
        in_memory: bool,
    },

    /// Manage Rego rule-sets
    Policy {
        #[command(subcommand)]
        command: PolicySubcommand,
    },

    /// Inspect discovery jobs
    Job {
        #[command(subcommand)]
        command: JobSubcommand,
    },
}

#[derive(Subcommand)]
enum PolicySubcommand {
    /// Register the rule-set for a resource type
    Add {
        #[arg(long)]
        resource_type: String,

        /// Rule evaluated for each configuration, e.g. data.s3.deny
        #[arg(long)]
        query: String,

        /// Rego source file
        #[arg(long)]
        file: PathBuf,
    },

    /// Print the rule-set for a resource type
    Show { resource_type: String },

    /// List registered rule-sets
    List,

    /// Evaluate a configuration document without storing anything
    Eval {
        #[arg(long)]
        resource_type: String,

        /// JSON configuration document
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(Subcommand)]
enum JobSubcommand {
    /// Print a job with its configurations and scan results
    Show { id: JobId },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = cli.settings;

    match cli.command {
        Commands::Discover { trigger } => {
            DiscoverCommand::execute(&settings, &trigger.into()).await?;
        }
        Commands::Retrieve { messages } => {
            let bodies = commands::collect_messages(messages)?;
            RetrieveCommand::execute(&settings, &bodies).await?;
        }
        Commands::Scan { messages } => {
            let bodies = commands::collect_messages(messages)?;
            ScanCommand::execute(&settings, &bodies).await?;
        }
        Commands::Run { trigger, in_memory } => {
            RunCommand::execute(&settings, &trigger.into(), in_memory).await?;
        }
        Commands::Policy { command } => {
            let store = settings.file_store()?;
            let engine = RegorusEngine::new();
            let fs = RealFileSystem;
            match command {
                PolicySubcommand::Add {
                    resource_type,
                    query,
                    file,
                } => {
                    PolicyCommand::execute_add(store.as_ref(), &engine, &fs, &resource_type, &query, &file)
                        .await?;
                }
                PolicySubcommand::Show { resource_type } => {
                    PolicyCommand::execute_show(store.as_ref(), &resource_type).await?;
                }
                PolicySubcommand::List => {
                    PolicyCommand::execute_list(store.as_ref()).await?;
                }
                PolicySubcommand::Eval { resource_type, input } => {
                    PolicyCommand::execute_eval(store.as_ref(), &engine, &fs, &resource_type, &input)
                        .await?;
                }
            }
        }
        Commands::Job { command } => match command {
            JobSubcommand::Show { id } => {
                let store = settings.file_store()?;
                JobCommand::execute_show(store.as_ref(), &id).await?;
            }
        },
    }

    Ok(())
}
