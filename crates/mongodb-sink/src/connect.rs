//! Connection management for the target MongoDB database.

use std::time::Duration;

use anyhow::Context;
use mongodb::{bson::doc, options::ClientOptions, Client as MongoClient, Database};

use crate::error::ConnectionError;

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Target database connection options (library type without clap/serde).
#[derive(Clone, Debug)]
pub struct MongoConnectionOpts {
    pub connection_string: String,
    pub db_name: String,
    pub connect_timeout: Duration,
}

impl MongoConnectionOpts {
    pub fn new(connection_string: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            db_name: db_name.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Opens a handle to the configured database and verifies it with `ping`.
///
/// The driver client is lazy, so without the ping an unreachable server would
/// only surface on the first upsert. Server selection shares the connect
/// timeout so the ping fails within the same bound. Writes are retried once
/// by the driver on transient errors (`retryWrites`).
pub async fn connect(opts: &MongoConnectionOpts) -> Result<Database, ConnectionError> {
    establish(opts).await.map_err(|source| ConnectionError {
        database: opts.db_name.clone(),
        source,
    })
}

async fn establish(opts: &MongoConnectionOpts) -> anyhow::Result<Database> {
    tracing::debug!("Parsing MongoDB connection options");
    let mut mongo_options = ClientOptions::parse(&opts.connection_string)
        .await
        .context("Invalid MongoDB connection string")?;
    mongo_options.connect_timeout = Some(opts.connect_timeout);
    mongo_options.server_selection_timeout = Some(opts.connect_timeout);
    mongo_options.retry_writes = Some(true);

    let mongo_client = MongoClient::with_options(mongo_options)?;
    let database = mongo_client.database(&opts.db_name);

    database
        .run_command(doc! { "ping": 1 })
        .await
        .with_context(|| {
            format!(
                "MongoDB did not answer ping within {}ms",
                opts.connect_timeout.as_millis()
            )
        })?;

    tracing::info!("Connected to MongoDB database '{}'", opts.db_name);
    Ok(database)
}
