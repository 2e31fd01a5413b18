//! ipc-bridge demo - a parent and a child process talking over stdio.
//!
//! `ipc-bridge parent` spawns this same binary as `ipc-bridge child` and
//! exercises events, calls and commands across the pipe.

mod child;
mod parent;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ipc-bridge")]
#[command(about = "Parent/child demo for ipc-bridge")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    role: Option<Role>,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Spawn a child and drive it (default)
    Parent {
        /// Command response timeout in milliseconds (non-positive = library default)
        #[arg(long, default_value = "1000", allow_hyphen_values = true)]
        timeout_ms: i64,
    },
    /// Serve commands over stdin/stdout
    Child,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the child's wire protocol, so logs always go to stderr
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.role.unwrap_or(Role::Parent { timeout_ms: 1000 }) {
        Role::Parent { timeout_ms } => parent::run(timeout_ms, args.debug).await,
        Role::Child => child::run().await,
    }
}
