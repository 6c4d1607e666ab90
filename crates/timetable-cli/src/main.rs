//! Timetable CLI - edit timetables offline and sync them across devices.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use cli::{Cli, Commands};
use commands::common::resolve_db_path;
use commands::completions::run_completions;
use commands::course::run_course;
use commands::outbox::run_outbox;
use commands::session::{run_device, run_login, run_logout};
use commands::sync::run_sync;
use commands::table::run_table;
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "timetable_core=info"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let server_url = cli.server_url.as_deref();

    match cli.command {
        Some(Commands::Login { user_id }) => run_login(user_id, &db_path).await?,
        Some(Commands::Logout) => run_logout(&db_path).await?,
        Some(Commands::Device) => run_device(&db_path).await?,
        Some(Commands::Table { command }) => run_table(command, &db_path, server_url).await?,
        Some(Commands::Course { command }) => run_course(command, &db_path, server_url).await?,
        Some(Commands::Outbox { json }) => run_outbox(json, &db_path).await?,
        Some(Commands::Sync { json }) => run_sync(json, &db_path, server_url).await?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
