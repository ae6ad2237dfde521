//! Driver connection with pool configuration

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use ferrodoc_common::FerrodocError;
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Database,
};
use tracing::{debug, info};

use crate::document::Document;
use crate::executor::{ExecutorConfig, MongoExecutor};
use crate::model::Model;
use crate::Result;

/// Driver pool settings; `None` keeps the driver's default
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_pool_size: Option<u32>,
    pub max_pool_size: Option<u32>,
    /// Idle connections older than this are closed
    pub max_idle_time: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    /// Reported to the server in its logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("ferrodoc".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(selection) = self.server_selection_timeout {
            options.server_selection_timeout = Some(selection);
        }
        if let Some(app) = self.app_name {
            options.app_name = Some(app);
        }
    }
}

/// A client bound to the database named in its connection string
pub struct Connection {
    client: Client,
    database: Database,
    executor: Arc<MongoExecutor>,
}

impl Connection {
    /// Connect with default pool settings
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with a custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string).await?;
        config.apply(&mut client_options);

        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;
        let database = client.default_database().ok_or_else(|| {
            FerrodocError::Connection("No default database specified in connection string".to_string())
        })?;
        info!(database = database.name(), "Connected");

        let executor = Arc::new(MongoExecutor::new(database.clone()));
        Ok(Self {
            client,
            database,
            executor,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Shared executor for every model built from this connection
    pub fn executor(&self) -> Arc<MongoExecutor> {
        Arc::clone(&self.executor)
    }

    /// Model for `D` bound to this connection's executor
    pub fn model<D: Document>(&self) -> Result<Model<D>> {
        Model::with_config(self.executor(), ExecutorConfig::default())
    }

    /// Round-trips a `ping` command
    pub async fn ping(&self) -> Result<bool> {
        match self.database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                debug!("Ping succeeded");
                Ok(true)
            }
            Err(e) => Err(FerrodocError::Connection(format!("Ping failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_pool_size, Some(10));
        assert_eq!(config.app_name, Some("ferrodoc".to_string()));
    }

    #[tokio::test]
    async fn test_pool_config_applies_to_client_options() {
        let mut options = ClientOptions::parse("mongodb://localhost:27017/app")
            .await
            .unwrap();
        PoolConfig {
            min_pool_size: Some(2),
            max_pool_size: Some(50),
            max_idle_time: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(5)),
            server_selection_timeout: None,
            app_name: Some("my-app".to_string()),
        }
        .apply(&mut options);

        assert_eq!(options.min_pool_size, Some(2));
        assert_eq!(options.max_pool_size, Some(50));
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.app_name.as_deref(), Some("my-app"));
        assert_eq!(options.default_database.as_deref(), Some("app"));
    }
}
