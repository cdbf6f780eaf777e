//! Stepflow CLI - define, run and follow model-invocation workflows.
//!
//! Reuses the same core domain logic (stepflow-core) and server bootstrap
//! (stepflow-server) that power the HTTP API.

use clap::{Parser, Subcommand};

use stepflow_cli::commands;

/// Stepflow CLI - sequential model-invocation workflows
#[derive(Parser)]
#[command(name = "stepflow", version, about = "Stepflow CLI - sequential model-invocation workflows")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "STEPFLOW_DB_PATH", default_value = "stepflow.db")]
    db: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Stepflow HTTP server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3210)]
        port: u16,
    },

    /// Manage and run workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List stored workflows
    List,
    /// Create a workflow from a YAML file
    Create {
        /// Path to the workflow YAML file
        file: String,
    },
    /// Show a workflow with its latest run results
    Show {
        /// Workflow ID
        #[arg(long)]
        id: String,
    },
    /// Replace a workflow's name and steps from a YAML file
    Update {
        /// Workflow ID
        #[arg(long)]
        id: String,
        /// Path to the workflow YAML file
        file: String,
    },
    /// Delete a workflow
    Delete {
        /// Workflow ID
        #[arg(long)]
        id: String,
    },
    /// Validate a workflow YAML file without storing it
    Validate {
        /// Path to the workflow YAML file
        file: String,
    },
    /// Run a workflow and follow its progress
    Run {
        /// Workflow ID
        #[arg(long)]
        id: String,
        /// Only print the final outcome
        #[arg(long, short = 'q')]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() {
    // Load .env / .env.local if present (for API keys, etc.)
    commands::load_dotenv();

    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stepflow_core=warn,stepflow_server=info,stepflow_cli=info".into()),
        )
        .init();

    let result = match cli.command {
        Some(Commands::Server { host, port }) => commands::server::run(host, port, cli.db).await,

        // Validation never touches the database.
        Some(Commands::Workflow {
            action: WorkflowAction::Validate { file },
        }) => commands::workflow::validate(&file).await,

        Some(Commands::Workflow { action }) => match commands::init_state(&cli.db).await {
            Ok(state) => run_workflow_action(&state, action).await,
            Err(e) => Err(e),
        },

        None => {
            // No subcommand: show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_workflow_action(
    state: &stepflow_core::AppState,
    action: WorkflowAction,
) -> Result<(), String> {
    match action {
        WorkflowAction::List => commands::workflow::list(state).await.map(|_| ()),
        WorkflowAction::Create { file } => commands::workflow::create(state, &file).await.map(|_| ()),
        WorkflowAction::Show { id } => commands::workflow::show(state, &id).await.map(|_| ()),
        WorkflowAction::Update { id, file } => {
            commands::workflow::update(state, &id, &file).await.map(|_| ())
        }
        WorkflowAction::Delete { id } => commands::workflow::delete(state, &id).await,
        WorkflowAction::Validate { file } => commands::workflow::validate(&file).await,
        WorkflowAction::Run { id, quiet } => {
            commands::workflow::run(state, &id, quiet).await.map(|_| ())
        }
    }
}
