//! Duka CLI - operator command line for the offline-first point of sale
//!
//! Records are written locally first and replayed against the shop server when it is
//! reachable.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::Parser;
use duka_core::{LocalId, ServerId};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::GlobalArgs;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::create::run_create;
use crate::commands::delete::run_delete;
use crate::commands::list::run_list;
use crate::commands::queue::run_queue;
use crate::commands::resolve::{run_resolve, ConflictTarget};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::update::run_update;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "duka=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let globals = GlobalArgs {
        db_path: cli.db_path,
        profile: cli.profile,
        api_url: cli.api_url,
        offline: cli.offline,
    };

    match cli.command {
        Commands::Create { kind, data } => {
            run_create(kind.into(), data.as_deref(), &globals).await?;
        }
        Commands::Update { kind, id, data } => {
            run_update(kind.into(), id, data.as_deref(), &globals).await?;
        }
        Commands::Delete { kind, id } => run_delete(kind.into(), id, &globals).await?,
        Commands::List { kind, json } => run_list(kind.into(), json, &globals).await?,
        Commands::Sync { json } => run_sync(json, &globals).await?,
        Commands::Status { json } => run_status(json, &globals).await?,
        Commands::Conflicts { json } => run_conflicts(json, &globals).await?,
        Commands::Resolve {
            kind,
            id,
            resolution,
            local,
        } => {
            let target = if local {
                ConflictTarget::Local(LocalId::new(id))
            } else {
                ConflictTarget::Server(ServerId::new(id))
            };
            run_resolve(kind.into(), target, resolution.into(), &globals).await?;
        }
        Commands::Queue { command } => run_queue(command, &globals).await?,
        Commands::Watch => run_watch(&globals).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
        Commands::Config { command } => run_config(command, &globals)?,
        Commands::Auth { command } => run_auth(command, globals.profile.as_deref())?,
    }

    Ok(())
}
