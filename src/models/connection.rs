use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::utils::ApiError;

/// Supported target-database drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    MySql,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::MySql),
            other => Err(ApiError::validation_error(format!("Unsupported driver: {}", other))),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered target database. Owned by the connection registry;
/// scan jobs reference it by id only.
///
/// The password never leaves this type: `Debug` redacts it and the
/// outward `ConnectionResponse` masks it.
#[derive(Clone, Serialize)]
pub struct ConnectionDescriptor {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub driver: DriverKind,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub enable_ssl: bool,
    /// Ceiling on concurrently borrowed handles for this connection
    pub max_handles: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("driver", &self.driver)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("enable_ssl", &self.enable_ssl)
            .field("max_handles", &self.max_handles)
            .finish()
    }
}

/// Raw row shape for the `connections` table
#[derive(Debug, Clone, FromRow)]
pub struct ConnectionRow {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: i64,
    pub database_name: String,
    pub driver: String,
    pub username: String,
    pub password_encrypted: String,
    pub enable_ssl: bool,
    pub max_handles: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ConnectionRow> for ConnectionDescriptor {
    type Error = ApiError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| ApiError::internal_error(format!("Corrupt connection id: {}", e)))?;
        Ok(Self {
            id,
            name: row.name,
            host: row.host,
            port: row.port as u16,
            database_name: row.database_name,
            driver: DriverKind::parse(&row.driver)?,
            username: row.username,
            password: row.password_encrypted,
            enable_ssl: row.enable_ssl,
            max_handles: row.max_handles.max(1) as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateConnectionRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    #[validate(length(min = 1))]
    pub database_name: String,
    #[serde(default = "default_driver")]
    pub driver: DriverKind,
    #[validate(length(min = 1))]
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub enable_ssl: bool,
    /// Optional override for the per-connection handle ceiling
    pub max_handles: Option<u32>,
}

fn default_driver() -> DriverKind {
    DriverKind::MySql
}

/// Connection view for API consumers; credentials are masked
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionResponse {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub driver: DriverKind,
    pub username: String,
    pub password_masked: String,
    pub enable_ssl: bool,
    pub max_handles: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&ConnectionDescriptor> for ConnectionResponse {
    fn from(d: &ConnectionDescriptor) -> Self {
        Self {
            id: d.id,
            name: d.name.clone(),
            host: d.host.clone(),
            port: d.port,
            database_name: d.database_name.clone(),
            driver: d.driver,
            username: d.username.clone(),
            password_masked: "****".to_string(),
            enable_ssl: d.enable_ssl,
            max_handles: d.max_handles,
            created_at: d.created_at,
        }
    }
}
