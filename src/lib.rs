pub mod config;
pub mod db;
mod schema;
pub mod server;

use camino::Utf8PathBuf;

use crate::config::Config;

/// # Errors
pub async fn serve_app(config: Config, log_dir: Option<Utf8PathBuf>) -> anyhow::Result<()> {
    server::serve(config, log_dir).await
}
