//! Connection establishment.
//!
//! [`MongoConnector`] opens one client session per call, applies the
//! configured network and read policy, and verifies liveness before the
//! handle is handed to the pool. The [`Connector`] trait is the seam the
//! pool core is written against, so the lifecycle logic can be exercised
//! without a live deployment.

use std::fmt;

use async_trait::async_trait;
use bson::{Document, doc};
use mongodb::options::{ClientOptions, ReadPreference, ReadPreferenceOptions, SelectionCriteria};
use mongodb::{Client, Collection, Database};

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Opens, probes, and tears down connections on behalf of the pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection handle this connector produces.
    type Conn: Send + 'static;

    /// Open a new connection.
    ///
    /// No retries are performed here; retry policy belongs to the caller.
    async fn connect(&self) -> Result<Self::Conn, PoolError>;

    /// Round-trip liveness probe.
    async fn probe(&self, conn: &Self::Conn) -> Result<(), PoolError>;

    /// Tear the connection down.
    async fn disconnect(&self, conn: Self::Conn) -> Result<(), PoolError>;
}

/// A MongoDB session bound to one database.
///
/// Cheap to clone; clones share the underlying session. The pool guard
/// governs when the session returns to the store, regardless of clones
/// handed to work units.
#[derive(Clone)]
pub struct MongoConn {
    client: Client,
    database: Database,
}

impl MongoConn {
    /// The database this handle is bound to.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The underlying client session.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// A collection handle within the bound database.
    #[must_use]
    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

impl fmt::Debug for MongoConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConn")
            .field("database", &self.database.name())
            .finish_non_exhaustive()
    }
}

/// Factory for [`MongoConn`] handles per the pool configuration.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    config: PoolConfig,
    read_preference: SelectionCriteria,
}

impl MongoConnector {
    /// Create a connector for the given configuration.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let mut options = ReadPreferenceOptions::default();
        options.max_staleness = Some(config.max_staleness);
        let read_preference = SelectionCriteria::ReadPreference(ReadPreference::Secondary {
            options: Some(options),
        });
        Self {
            config,
            read_preference,
        }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Conn = MongoConn;

    async fn connect(&self) -> Result<MongoConn, PoolError> {
        let mut options = ClientOptions::parse(&self.config.address).await?;
        options.connect_timeout = Some(self.config.connect_timeout);
        options.max_pool_size = Some(self.config.max_pool_size);
        options.selection_criteria = Some(self.read_preference.clone());

        let client = Client::with_options(options)?;
        let database = client.database(&self.config.database);

        // A session is only usable once it answers a round trip.
        database
            .run_command(doc! { "ping": 1 })
            .selection_criteria(self.read_preference.clone())
            .await?;

        tracing::debug!(database = database.name(), "opened MongoDB session");
        Ok(MongoConn { client, database })
    }

    async fn probe(&self, conn: &MongoConn) -> Result<(), PoolError> {
        conn.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn disconnect(&self, conn: MongoConn) -> Result<(), PoolError> {
        conn.client.shutdown().await;
        Ok(())
    }
}
