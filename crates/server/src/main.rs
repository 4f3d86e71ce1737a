mod api;
mod cli;
mod db;
mod pg;
mod router;
mod startup;
mod state;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, LogFormat};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> vigil_core::Config {
    vigil_core::config::load_dotenv();
    match cli.profile.as_deref() {
        Some(p) => vigil_core::Config::for_profile(p),
        None => vigil_core::Config::from_env(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let config = load_config(&cli);

    match cli.command() {
        Command::Serve => {
            config.log_summary();
            let bind = cli.bind.clone().unwrap_or_else(|| config.server.bind_addr());
            startup::run(config, bind).await?;
        }
        Command::Migrate => {
            let pool = db::connect(&config.postgres).await?;
            db::migrate(&pool).await?;
            info!("migrations applied");
        }
        Command::CheckConfig => {
            config.log_summary();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
