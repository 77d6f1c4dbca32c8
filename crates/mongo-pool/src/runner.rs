//! Task dispatch over pooled connections.
//!
//! [`Pool::run_with`] brackets a caller-supplied unit of work with
//! acquisition and guaranteed release; [`Pool::spawn_with`] does the same
//! on a background task for fire-and-forget parallel dispatch.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::connector::Connector;
use crate::error::PoolError;
use crate::pool::Pool;
use crate::report::ErrorReporter;

impl<C: Connector> Pool<C>
where
    C::Conn: Clone,
{
    /// Run a unit of work against a pooled connection.
    ///
    /// The work receives a clone of the connection handle and a reporter
    /// for the pool's error channel. The connection is released whatever
    /// the outcome: a handle that still probes healthy goes back to the
    /// store, anything else is discarded. Acquisition and work errors are
    /// forwarded to the error channel exactly once each, in addition to
    /// being returned.
    pub async fn run_with<F, Fut, T, E>(&self, work: F) -> Result<T, PoolError>
    where
        F: FnOnce(C::Conn, ErrorReporter) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Into<PoolError>,
    {
        let reporter = self.error_reporter();

        let mut conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(error) => {
                reporter.report(error.clone());
                return Err(error);
            }
        };

        let result = work((*conn).clone(), reporter.clone()).await;

        if let Err(error) = self.release(&mut conn).await {
            tracing::warn!(id = conn.id(), error = %error, "failed to return connection after task");
        }

        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                let error = error.into();
                reporter.report(error.clone());
                Err(error)
            }
        }
    }

    /// Run a unit of work on a background task.
    ///
    /// The returned [`JoinHandle`] completes exactly once, after the work
    /// has finished and its connection has been released; failures are
    /// observable on the pool's error channel.
    pub fn spawn_with<F, Fut>(&self, work: F) -> JoinHandle<()>
    where
        F: FnOnce(C::Conn, ErrorReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), PoolError>> + Send + 'static,
    {
        let pool = self.clone();
        tokio::spawn(async move {
            if let Err(error) = pool.run_with(work).await {
                tracing::debug!(error = %error, "background task failed");
            }
        })
    }
}
