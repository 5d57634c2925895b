//! Co-founder CLI - run and inspect multi-agent content workflows.
//!
//! Reuses the same core domain logic (cofounder-core) and server bootstrap
//! (cofounder-server) that power the HTTP API.

use clap::{Parser, Subcommand};

use cofounder_cli::commands;

/// Co-founder CLI - Multi-agent content workflows
#[derive(Parser)]
#[command(name = "cofounder", version, about = "Co-founder CLI — Multi-agent content workflows")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "COFOUNDER_DB_PATH", default_value = "cofounder.db")]
    db: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the co-founder HTTP backend server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3210)]
        port: u16,
    },

    /// Run and validate YAML-defined workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// List the agents workflows can use
    Agents {
        /// Directory containing extra specialist definitions
        #[arg(long)]
        specialist_dir: Option<String>,
    },

    /// Inspect persisted executions
    Executions {
        #[command(subcommand)]
        action: ExecutionsAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Execute a workflow from a YAML file
    Run {
        /// Path to the workflow YAML file
        file: String,
        /// Initial input as a JSON string
        #[arg(long)]
        input: Option<String>,
        /// Launch in the background and print the pending handle first
        #[arg(long = "async")]
        run_async: bool,
        /// Directory containing extra specialist definitions
        #[arg(long)]
        specialist_dir: Option<String>,
    },
    /// Validate a workflow YAML file without executing it
    Validate {
        /// Path to the workflow YAML file
        file: String,
    },
}

#[derive(Subcommand)]
enum ExecutionsAction {
    /// List executions of a workflow
    List {
        #[arg(long)]
        workflow_id: String,
    },
    /// Show one execution
    Get {
        /// Execution ID
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cofounder_core=warn,cofounder_server=info,cofounder_cli=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = if let Some(command) = cli.command {
        match command {
            Commands::Server { host, port } => commands::server::run(host, port, cli.db).await,

            Commands::Workflow { action } => match action {
                WorkflowAction::Run {
                    file,
                    input,
                    run_async,
                    specialist_dir,
                } => {
                    let state = commands::init_state(&cli.db, specialist_dir.as_deref());
                    commands::workflow::run(&state, &file, input.as_deref(), run_async).await
                }
                WorkflowAction::Validate { file } => commands::workflow::validate(&file),
            },

            Commands::Agents { specialist_dir } => {
                let state = commands::init_state(&cli.db, specialist_dir.as_deref());
                commands::agents::list(&state)
            }

            Commands::Executions { action } => {
                let state = commands::init_state(&cli.db, None);
                match action {
                    ExecutionsAction::List { workflow_id } => {
                        commands::executions::list(&state, &workflow_id).await
                    }
                    ExecutionsAction::Get { id } => commands::executions::get(&state, &id).await,
                }
            }
        }
    } else {
        // No subcommand - show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
