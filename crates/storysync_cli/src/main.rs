//! StorySync CLI
//!
//! Runs the sync server and helps operate it.
//!
//! # Commands
//!
//! - `serve` - Run the HTTP sync server
//! - `token` - Mint a bearer token for a user
//! - `inspect` - Show a stored project's sync bookkeeping

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// StorySync server and tools.
#[derive(Parser)]
#[command(name = "storysync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Directory for project data (in-memory if omitted)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Require bearer tokens signed with this secret
        #[arg(long, env = "STORYSYNC_AUTH_SECRET", hide_env_values = true)]
        auth_secret: Option<String>,

        /// Idle seconds before a sync session expires
        #[arg(long, default_value = "300")]
        session_lease: u64,

        /// Days to keep deletion tombstones
        #[arg(long, default_value = "30")]
        tombstone_retention: u64,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        request_timeout: u64,

        /// Refuse to sync projects that do not exist yet
        #[arg(long)]
        no_create: bool,
    },

    /// Mint a bearer token for a user
    Token {
        /// User ID the token is issued to
        #[arg(short, long)]
        user: i64,

        /// Signing secret; must match the server's
        #[arg(long, env = "STORYSYNC_AUTH_SECRET", hide_env_values = true)]
        secret: String,
    },

    /// Show a stored project's sync bookkeeping
    Inspect {
        /// Server data directory
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Owning user ID
        #[arg(short, long)]
        user: i64,

        /// Project name
        #[arg(short, long)]
        project: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            data_dir,
            auth_secret,
            session_lease,
            tombstone_retention,
            request_timeout,
            no_create,
        } => {
            commands::serve::run(commands::serve::ServeOptions {
                bind,
                data_dir,
                auth_secret,
                session_lease,
                tombstone_retention_days: tombstone_retention,
                request_timeout,
                create_missing_projects: !no_create,
            })?;
        }
        Commands::Token { user, secret } => {
            println!("{}", commands::token::run(user, &secret)?);
        }
        Commands::Inspect {
            data_dir,
            user,
            project,
            format,
        } => {
            commands::inspect::run(&data_dir, user, &project, &format)?;
        }
    }

    Ok(())
}
