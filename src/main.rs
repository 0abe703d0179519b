use anyhow::Result;
use clap::Parser;

use package_doctor::cli::{Args, Command};
use package_doctor::logging::init_tracing;
use package_doctor::session::{SessionStore, open_session_store};
use package_doctor::{launch, server};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command() {
        Command::Run => {
            let request = args.resolve_request()?;
            let config = args.into_config()?;
            launch(&config, request).await?;
        }
        Command::Serve { .. } => {
            let config = args.into_config()?;
            server::serve(&config).await?;
        }
        Command::Sessions => {
            let config = args.into_config()?;
            list_sessions(&config).await?;
        }
    }
    Ok(())
}

async fn list_sessions(config: &package_doctor::Config) -> Result<()> {
    let store = open_session_store(&config.session)?;
    let sessions = store.list_sessions(&config.app_name, &config.user_id).await?;
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  events: {:>3}  updated: {}",
            session.id,
            session.event_count,
            session.last_update_time.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
