use crate::models::ConnectionDescriptor;
use crate::utils::ApiResult;
use dashmap::DashMap;
use mysql_async::{OptsBuilder, Pool, SslOpts};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Idle pooled connections are reaped after this long; scans are bursty,
/// so connections only need to survive the gap between pipeline stages.
const IDLE_CONNECTION_TTL: Duration = Duration::from_secs(120);
const TTL_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// One mysql_async pool per registered connection, cached in a DashMap so
/// concurrent scans against the same target share it without locking.
#[derive(Clone)]
pub struct MySQLPoolManager {
    pools: Arc<DashMap<Uuid, Pool>>,
}

impl MySQLPoolManager {
    pub fn new() -> Self {
        Self { pools: Arc::new(DashMap::new()) }
    }
}

impl Default for MySQLPoolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MySQLPoolManager {
    /// Get the pool for a descriptor, creating it on first use
    pub async fn get_pool(&self, descriptor: &ConnectionDescriptor) -> ApiResult<Pool> {
        let connection_id = descriptor.id;

        if let Some(pool) = self.pools.get(&connection_id) {
            return Ok(pool.clone());
        }

        let pool = self.create_pool(descriptor)?;

        self.pools.insert(connection_id, pool.clone());

        tracing::info!(
            "Created MySQL connection pool for connection {} ({}:{}, up to {} connections)",
            connection_id,
            descriptor.host,
            descriptor.port,
            descriptor.max_handles
        );

        Ok(pool)
    }

    /// Remove a pool for a specific connection
    ///
    /// Useful when a connection is unregistered or credentials are updated
    pub async fn remove_pool(&self, connection_id: Uuid) {
        if let Some((_, pool)) = self.pools.remove(&connection_id) {
            drop(pool);
            tracing::info!("Removed MySQL connection pool for connection {}", connection_id);
        }
    }

    /// Clear all pools (useful for cleanup/testing)
    pub async fn clear_all(&self) {
        self.pools.clear();
        tracing::info!("Cleared all MySQL connection pools");
    }

    /// Get pool count (for monitoring)
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Create a new MySQL connection pool for a descriptor.
    ///
    /// Pool capacity tracks the registry's handle ceiling for the same
    /// connection, so every granted handle has a pooled connection to run
    /// on and the pool never admits more than the registry does.
    fn create_pool(&self, descriptor: &ConnectionDescriptor) -> ApiResult<Pool> {
        let ssl_opts = if descriptor.enable_ssl { Some(SslOpts::default()) } else { None };
        let (min_connections, max_connections) = connection_limits(descriptor.max_handles);

        let opts = OptsBuilder::default()
            .ip_or_hostname(&descriptor.host)
            .tcp_port(descriptor.port)
            .user(Some(&descriptor.username))
            .pass(Some(&descriptor.password))
            .db_name(Some(&descriptor.database_name))
            .prefer_socket(false)
            .ssl_opts(ssl_opts)
            .tcp_keepalive(Some(30_000_u32))
            .tcp_nodelay(true)
            .pool_opts(
                mysql_async::PoolOpts::default()
                    .with_constraints(
                        mysql_async::PoolConstraints::new(min_connections, max_connections)
                            .ok_or_else(|| {
                                crate::utils::ApiError::internal_error(format!(
                                    "Invalid pool constraints ({}, {}) for connection {}",
                                    min_connections, max_connections, descriptor.id
                                ))
                            })?,
                    )
                    .with_inactive_connection_ttl(IDLE_CONNECTION_TTL)
                    .with_ttl_check_interval(TTL_CHECK_INTERVAL),
            );

        Ok(Pool::new(opts))
    }
}

/// (min, max) pooled connections for a connection whose registry ceiling
/// is `max_handles`
fn connection_limits(max_handles: u32) -> (usize, usize) {
    let max = (max_handles as usize).max(1);
    (max.min(2), max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_capacity_follows_the_handle_ceiling() {
        assert_eq!(connection_limits(10), (2, 10));
        assert_eq!(connection_limits(50), (2, 50));
        assert_eq!(connection_limits(2), (2, 2));
    }

    #[test]
    fn tiny_ceilings_stay_consistent() {
        // min never exceeds max, and a zero ceiling still yields a usable pool
        assert_eq!(connection_limits(1), (1, 1));
        assert_eq!(connection_limits(0), (1, 1));
    }
}
