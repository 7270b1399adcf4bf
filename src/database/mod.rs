use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};

use crate::config::StoreConfig;
use crate::utils::error::{is_transport_error, StoreError};

/// Connected MongoDB handle. Cloning shares the driver's connection pool.
#[derive(Clone, Debug)]
pub struct MongoDB {
    client: Client,
    db: Database,
}

impl MongoDB {
    /// Connects and pings the server; the returned handle is known to be reachable.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut client_options = ClientOptions::parse(&config.uri)
            .await
            .map_err(classify_parse_error)?;

        client_options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        client_options.max_pool_size = Some(config.max_pool_size);
        client_options.min_pool_size = Some(config.min_pool_size);
        client_options.max_idle_time = Some(std::time::Duration::from_secs(300));
        client_options.connect_timeout = Some(config.connect_timeout);
        client_options.server_selection_timeout = Some(config.connect_timeout);

        let client = Client::with_options(client_options).map_err(StoreError::from_driver)?;

        log::info!("Connecting to MongoDB at {}", redact(&config.uri));

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(StoreError::Connection)?;

        let db = client.database(&config.database);
        log::info!("Successfully connected to MongoDB database: {}", config.database);

        Ok(Self { client, db })
    }

    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Check if the connection is healthy
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(StoreError::Connection)?;
        Ok(true)
    }

    /// Closes pooled connections and kills any cursors still open on this client.
    pub async fn shutdown(self) {
        log::debug!("Shutting down MongoDB client");
        self.client.shutdown().await;
    }
}

/// `mongodb+srv://` parsing resolves DNS, so a network failure there is not a bad URI.
fn classify_parse_error(err: mongodb::error::Error) -> StoreError {
    if is_transport_error(&err) {
        StoreError::from_driver(err)
    } else {
        StoreError::Config(format!("invalid MongoDB URI: {}", err))
    }
}

/// Strips credentials from a connection string before it is logged.
fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}
