use std::fs;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Args, Parser};

#[derive(Args, serde::Deserialize, Clone)]
pub struct Config {
    #[arg(long, default_value_t)]
    dev: bool,
    #[arg(long)]
    secrets_dir: Option<Utf8PathBuf>,
    #[arg(long, env = "HERDBOOK_DB_USER", default_value_t = String::from("postgres"))]
    db_user: String,
    #[arg(long, env = "HERDBOOK_DB_PASSWORD", default_value_t)]
    db_password: String,
    #[arg(long, env = "HERDBOOK_DB_HOST", default_value_t = String::from("localhost"))]
    db_host: String,
    #[arg(long, env = "HERDBOOK_DB_PORT", default_value_t = 5432)]
    db_port: u16,
    #[arg(long, env = "HERDBOOK_DB_NAME", default_value_t = String::from("herdbook"))]
    db_name: String,
    #[arg(long, env = "HERDBOOK_HOST", default_value_t = String::from("localhost"))]
    host: String,
    #[arg(long, env = "HERDBOOK_PORT", default_value_t = 8000)]
    port: u16,
}

impl Config {
    #[must_use]
    pub fn is_dev(&self) -> bool {
        self.dev
    }

    /// # Errors
    pub fn read_secrets(&mut self) -> anyhow::Result<()> {
        let Self {
            secrets_dir,
            db_user,
            db_password,
            db_name,
            ..
        } = self;

        let Some(secrets_dir) = secrets_dir else {
            return Ok(());
        };

        let read_secret = |name: &str| {
            fs::read_to_string(secrets_dir.join(name))
                .map(|contents| contents.trim().to_string())
                .context(format!("failed to read secret {name}"))
        };

        *db_user = read_secret("db_user")?;
        *db_password = read_secret("db_password")?;
        *db_name = read_secret("db_name")?;

        Ok(())
    }

    #[must_use]
    pub fn app_address(&self) -> String {
        let Self {
            host: app_host,
            port: app_port,
            ..
        } = self;

        format!("{app_host}:{app_port}")
    }

    pub(crate) fn db_url(&self) -> String {
        let Self {
            db_user,
            db_password,
            db_host,
            db_port,
            db_name,
            ..
        } = self;

        format!("postgres://{db_user}:{db_password}@{db_host}:{db_port}/{db_name}")
    }
}

#[derive(Parser)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,
    #[arg(long, env = "HERDBOOK_LOG_DIR")]
    pub log_dir: Option<Utf8PathBuf>,
}
