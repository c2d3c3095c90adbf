use chrono::Utc;
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;
use validator::Validate;

use crate::models::{ConnectionDescriptor, ConnectionRow, CreateConnectionRequest};
use crate::services::{MySQLClient, MySQLPoolManager};
use crate::utils::{ApiError, ApiResult};

/// A borrowed connection handle.
///
/// Owns one permit from the connection's semaphore; dropping the handle
/// releases it. The embedded pool is lazy, so borrowing never dials the
/// target database by itself.
#[derive(Debug)]
pub struct ConnectionHandle {
    descriptor: Arc<ConnectionDescriptor>,
    client: MySQLClient,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionHandle {
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn client(&self) -> &MySQLClient {
        &self.client
    }
}

#[derive(Clone)]
struct HandleLimit {
    semaphore: Arc<Semaphore>,
    max: u32,
}

/// Registry of target-database connections.
///
/// Descriptors live in the control store; the in-flight handle count per
/// connection is enforced here through one semaphore per connection. The
/// registry is the single authority for those counts.
pub struct ConnectionRegistry {
    pool: SqlitePool,
    mysql_pool_manager: Arc<MySQLPoolManager>,
    handle_limits: DashMap<Uuid, HandleLimit>,
    default_max_handles: u32,
    acquire_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        pool: SqlitePool,
        mysql_pool_manager: Arc<MySQLPoolManager>,
        default_max_handles: u32,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            mysql_pool_manager,
            handle_limits: DashMap::new(),
            default_max_handles,
            acquire_timeout,
        }
    }

    /// Register a new connection and return its descriptor
    pub async fn register(
        &self,
        mut req: CreateConnectionRequest,
    ) -> ApiResult<ConnectionDescriptor> {
        req.name = req.name.trim().to_string();
        req.host = req.host.trim().to_string();
        req.database_name = req.database_name.trim().to_string();
        req.username = req.username.trim().to_string();

        req.validate()
            .map_err(|e| ApiError::validation_error(format!("Invalid connection request: {}", e)))?;
        if req.port == 0 {
            return Err(ApiError::validation_error("Port cannot be 0"));
        }
        if let Some(0) = req.max_handles {
            return Err(ApiError::validation_error("max_handles must be >= 1"));
        }

        let existing: Option<ConnectionRow> =
            sqlx::query_as("SELECT * FROM connections WHERE name = ?")
                .bind(&req.name)
                .fetch_optional(&self.pool)
                .await?;

        if existing.is_some() {
            return Err(ApiError::validation_error("Connection name already exists"));
        }

        let now = Utc::now();
        let descriptor = ConnectionDescriptor {
            id: Uuid::new_v4(),
            name: req.name,
            host: req.host,
            port: req.port,
            database_name: req.database_name,
            driver: req.driver,
            username: req.username,
            password: req.password,
            enable_ssl: req.enable_ssl,
            max_handles: req.max_handles.unwrap_or(self.default_max_handles),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO connections (id, name, host, port, database_name, driver, username,
             password_encrypted, enable_ssl, max_handles, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(descriptor.id.to_string())
        .bind(&descriptor.name)
        .bind(&descriptor.host)
        .bind(descriptor.port as i64)
        .bind(&descriptor.database_name)
        .bind(descriptor.driver.as_str())
        .bind(&descriptor.username)
        .bind(&descriptor.password)
        .bind(descriptor.enable_ssl)
        .bind(descriptor.max_handles as i64)
        .bind(descriptor.created_at)
        .bind(descriptor.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Connection registered: {} (ID: {}, {}:{}/{})",
            descriptor.name,
            descriptor.id,
            descriptor.host,
            descriptor.port,
            descriptor.database_name
        );

        Ok(descriptor)
    }

    pub async fn lookup(&self, id: Uuid) -> ApiResult<ConnectionDescriptor> {
        let row: Option<ConnectionRow> = sqlx::query_as("SELECT * FROM connections WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ConnectionDescriptor::try_from)
            .transpose()?
            .ok_or_else(|| ApiError::connection_not_found(id))
    }

    pub async fn list(&self) -> ApiResult<Vec<ConnectionDescriptor>> {
        let rows: Vec<ConnectionRow> =
            sqlx::query_as("SELECT * FROM connections ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(ConnectionDescriptor::try_from).collect()
    }

    /// Borrow a handle, waiting up to the acquire timeout for a free slot.
    ///
    /// Exceeding callers fail with ResourceExhausted once the timeout
    /// elapses; a connection unregistered while waiting fails NotFound.
    pub async fn borrow(&self, id: Uuid) -> ApiResult<ConnectionHandle> {
        let descriptor = Arc::new(self.lookup(id).await?);

        let limit = self
            .handle_limits
            .entry(id)
            .or_insert_with(|| HandleLimit {
                semaphore: Arc::new(Semaphore::new(descriptor.max_handles as usize)),
                max: descriptor.max_handles,
            })
            .clone();
        let semaphore = limit.semaphore;

        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            semaphore.clone().acquire_owned(),
        )
        .await
        {
            Err(_) => {
                return Err(ApiError::resource_exhausted(format!(
                    "No free handle for connection {} within {:?}",
                    id, self.acquire_timeout
                )));
            },
            Ok(Err(_closed)) => {
                return Err(ApiError::connection_not_found(id));
            },
            Ok(Ok(permit)) => permit,
        };

        let mysql_pool = self.mysql_pool_manager.get_pool(&descriptor).await?;

        tracing::debug!(
            "Handle borrowed for connection {} ({} free)",
            id,
            semaphore.available_permits()
        );

        Ok(ConnectionHandle {
            descriptor,
            client: MySQLClient::from_pool(mysql_pool),
            _permit: permit,
        })
    }

    /// Unregister a connection. Fails with Busy while live handles exist.
    pub async fn unregister(&self, id: Uuid) -> ApiResult<()> {
        let descriptor = self.lookup(id).await?;

        // Draining the whole semaphore atomically excludes new borrows
        // while the row is deleted.
        let drained = if let Some(entry) = self.handle_limits.get(&id) {
            let limit = entry.clone();
            drop(entry);
            match limit.semaphore.clone().try_acquire_many_owned(limit.max) {
                Ok(permits) => {
                    limit.semaphore.close();
                    drop(permits);
                    true
                },
                Err(_) => {
                    return Err(ApiError::busy(format!(
                        "Connection {} has live handles and cannot be unregistered",
                        id
                    )));
                },
            }
        } else {
            false
        };

        sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if drained {
            self.handle_limits.remove(&id);
        }
        self.mysql_pool_manager.remove_pool(id).await;

        tracing::info!("Connection unregistered: {} ({})", descriptor.name, id);
        Ok(())
    }

    /// Liveness check: borrow a handle and run a trivial query
    pub async fn test_connection(&self, id: Uuid) -> ApiResult<()> {
        let handle = self.borrow(id).await?;
        handle.client().ping().await
    }

    /// Number of handles currently borrowed for a connection
    pub fn live_handles(&self, id: Uuid) -> usize {
        self.handle_limits
            .get(&id)
            .map(|limit| (limit.max as usize).saturating_sub(limit.semaphore.available_permits()))
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("default_max_handles", &self.default_max_handles)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}
