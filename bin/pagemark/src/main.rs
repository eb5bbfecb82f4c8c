mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::page::{FilterArgs, SourceArgs};

#[derive(Parser)]
#[command(name = "pagemark")]
#[command(about = "Accessibility snapshots with compact element refs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the accessibility snapshot of a page with its refs
    Snapshot {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        filter: FilterArgs,

        /// Print the snapshot and ref table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Snapshot a page, then resolve one ref against it
    Resolve {
        /// Ref token, e.g. e3 or @e3
        #[arg(value_name = "REF")]
        ref_token: String,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        filter: FilterArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Inspect and call registered tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// List all registered tools
    List,
    /// Show detailed info for a specific tool
    Info {
        /// Tool name
        tool_name: String,
    },
    /// Execute a tool directly with JSON parameters
    Call {
        /// Tool name
        tool_name: String,
        /// JSON parameters, e.g. '{"action": "snapshot", "interactive": true}'
        params: String,

        #[command(flatten)]
        source: SourceArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Snapshot { source, filter, json } => {
            commands::snapshot_cmd::run(&source, &filter, json).await?;
        }
        Commands::Resolve {
            ref_token,
            source,
            filter,
            json,
        } => {
            commands::resolve_cmd::run(&ref_token, &source, &filter, json).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show().await?,
            ConfigCommands::Init { force } => commands::config_cmd::init(force).await?,
        },
        Commands::Tools { command } => match command {
            ToolsCommands::List => commands::tools_cmd::list().await?,
            ToolsCommands::Info { tool_name } => commands::tools_cmd::info(&tool_name).await?,
            ToolsCommands::Call {
                tool_name,
                params,
                source,
            } => commands::tools_cmd::call(&tool_name, &params, &source).await?,
        },
    }

    Ok(())
}
