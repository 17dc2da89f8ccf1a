use anyhow::Result;
use clap::{Parser, Subcommand};
use depositflow::cli::{OutputMode, commands, create_handler};
use depositflow::config::DepositConfig;
use depositflow::logging::{default_log_path, init_logging};
use depositflow::store::{InstanceFilter, StateStore, WorkflowStatus};
use depositflow::{Deposits, StartPoint};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "depositflow")]
#[command(about = "Resumable deposit workflows - run chains that wait for user input")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding `.depositflow/` (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Workflow database (overrides configuration)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Emit JSON events instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a workflow for an owner
    Start {
        /// Chain name
        chain: String,

        /// Owner (user) id
        #[arg(long)]
        owner: String,

        /// Continue this instance if it exists, create it with this id otherwise
        #[arg(long)]
        id: Option<String>,

        /// Initial object payloads, as JSON
        #[arg(long = "object")]
        objects: Vec<String>,
    },

    /// Resume a stopped workflow
    Resume {
        id: String,

        /// beginning, previous, next or same
        #[arg(long, default_value = "same")]
        from: StartPoint,
    },

    /// Show workflow instances
    Status {
        /// Single instance to show
        id: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        chain: Option<String>,

        #[arg(long)]
        state: Option<WorkflowStatus>,

        /// Include finished instances
        #[arg(long)]
        all: bool,
    },

    /// Print an instance's extra data
    Show {
        id: String,

        /// Single key, falling back to the latest object
        key: Option<String>,

        /// Print the merged draft record instead
        #[arg(long, conflicts_with = "key")]
        record: bool,
    },

    /// Submit the current draft as field=value pairs
    Submit {
        id: String,

        #[arg(trailing_var_arg = true)]
        values: Vec<String>,

        /// Do not resume the workflow after submitting
        #[arg(long)]
        no_resume: bool,
    },

    /// Set a field on the current draft
    SetField { id: String, field: String, value: String },

    /// Append to a multi-value field on the current draft
    AppendField { id: String, field: String, value: String },

    /// List an owner's drafts for a chain, or unfinished counts per chain
    Drafts {
        chain: Option<String>,

        #[arg(long)]
        owner: String,
    },

    /// Delete an instance with its objects and jobs
    Delete { id: String },

    /// List configured chains
    Chains,

    /// Validate the configuration
    Validate,

    /// List queued jobs
    Jobs { id: Option<String> },

    /// Resume every halted workflow
    Sweep {
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        chain: Option<String>,

        #[arg(long, default_value = "same")]
        from: StartPoint,

        /// Write a log file under the data directory
        #[arg(long)]
        log: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match (&cli.log_file, &cli.command) {
        (Some(path), _) => Some(path.clone()),
        (None, Commands::Sweep { log: true, .. }) => Some(default_log_path("sweep")?),
        _ => None,
    };
    init_logging(cli.debug, cli.quiet, log_file)?;

    let config = DepositConfig::load(cli.dir.as_deref())?;
    let handler = create_handler(OutputMode::from_flags(cli.json, cli.quiet), cli.debug);

    match &cli.command {
        Commands::Chains => std::process::exit(commands::list_chains(&config, &*handler)),
        Commands::Validate => std::process::exit(commands::validate(&config, &*handler)),
        _ => {}
    }

    let database = match cli.database {
        Some(path) => path,
        None => config.database_path()?,
    };
    if let Some(parent) = database.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(StateStore::open_with_timeout(&database, config.busy_timeout())?);
    let deposits = Arc::new(Deposits::from_config(&config, store)?);

    let code = match cli.command {
        Commands::Start {
            chain,
            owner,
            id,
            objects,
        } => {
            let id = id.as_deref().map(commands::parse_id).transpose()?;
            commands::start(&deposits, &chain, &owner, &objects, id, &*handler)?
        }
        Commands::Resume { id, from } => {
            commands::resume(&deposits, commands::parse_id(&id)?, from, &*handler)?
        }
        Commands::Status {
            id,
            owner,
            chain,
            state,
            all,
        } => {
            let id = id.as_deref().map(commands::parse_id).transpose()?;
            let filter = InstanceFilter {
                owner_id: owner,
                name: chain,
                status: state,
                include_finished: all,
            };
            commands::status(&deposits, id, &filter, &*handler)?
        }
        Commands::Show { id, key, record } => commands::show(
            &deposits,
            commands::parse_id(&id)?,
            key.as_deref(),
            record,
            &*handler,
        )?,
        Commands::Submit {
            id,
            values,
            no_resume,
        } => {
            let values = commands::parse_assignments(&values)?;
            commands::submit(
                &deposits,
                commands::parse_id(&id)?,
                &values,
                !no_resume,
                &*handler,
            )?
        }
        Commands::SetField { id, field, value } => commands::set_field(
            &deposits,
            commands::parse_id(&id)?,
            &field,
            &value,
            false,
            &*handler,
        )?,
        Commands::AppendField { id, field, value } => commands::set_field(
            &deposits,
            commands::parse_id(&id)?,
            &field,
            &value,
            true,
            &*handler,
        )?,
        Commands::Drafts { chain, owner } => commands::drafts(&deposits, &owner, chain.as_deref(), &*handler)?,
        Commands::Delete { id } => commands::delete(&deposits, commands::parse_id(&id)?, &*handler)?,
        Commands::Jobs { id } => {
            let id = id.as_deref().map(commands::parse_id).transpose()?;
            commands::jobs(&deposits, id, &*handler)?
        }
        Commands::Sweep {
            owner,
            chain,
            from,
            log: _,
        } => {
            let filter = InstanceFilter {
                owner_id: owner,
                name: chain,
                ..Default::default()
            };
            let max_concurrent = config.defaults.max_concurrent.unwrap_or(4) as usize;
            commands::sweep(deposits.clone(), filter, from, max_concurrent, &*handler).await?
        }
        Commands::Chains | Commands::Validate => 0,
    };

    std::process::exit(code);
}
