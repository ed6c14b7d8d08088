use clap::Parser;
use herdbook_backend::{config::Cli, serve_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let Cli { config, log_dir } = Cli::parse();

    serve_app(config, log_dir).await
}
