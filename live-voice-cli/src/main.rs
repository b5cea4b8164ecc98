use anyhow::Result;
use clap::Parser;
use live_voice_cli::{AppConfig, Cli, app, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; flags and the process environment still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    if cli.list_devices {
        return app::list_devices();
    }

    let config = AppConfig::from_cli(&cli)?;
    app::run(config).await
}
