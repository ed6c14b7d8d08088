use testcontainers_modules::{
    postgres::Postgres,
    testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
};
use uuid::Uuid;

const POSTGRES_TAG: &str = "18beta1-alpine";

/// A throwaway Postgres instance for `--dev` runs and tests.
pub struct DevContainer {
    postgres: ContainerAsync<Postgres>,
    root_password: Option<String>,
}

impl DevContainer {
    /// Starts a fresh container. With `with_password`, the superuser gets a
    /// random password so the instance can be reached the way a deployed
    /// database would be; without it, host auth is trusted.
    ///
    /// # Errors
    pub async fn new(container_name: &str, with_password: bool) -> anyhow::Result<Self> {
        let image = Postgres::default();

        let (image, root_password) = if with_password {
            let password = Uuid::now_v7().to_string();
            (image.with_password(&password), Some(password))
        } else {
            (image.with_host_auth(), None)
        };

        let postgres = image
            .with_tag(POSTGRES_TAG)
            .with_container_name(container_name)
            .start()
            .await?;

        Ok(Self {
            postgres,
            root_password,
        })
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.root_password.as_deref()
    }

    /// # Errors
    pub async fn db_host(&self) -> anyhow::Result<String> {
        Ok(self.postgres.get_host().await?.to_string())
    }

    /// # Errors
    pub async fn db_port(&self) -> anyhow::Result<u16> {
        Ok(self.postgres.get_host_port_ipv4(5432).await?)
    }

    /// # Errors
    pub async fn db_url(&self) -> anyhow::Result<String> {
        let host = self.db_host().await?;
        let port = self.db_port().await?;

        let url = match self.password() {
            Some(password) => format!("postgres://postgres:{password}@{host}:{port}/postgres"),
            None => format!("postgres://postgres@{host}:{port}/postgres"),
        };

        Ok(url)
    }
}
