use crate::utils::error::ApiError;
use mysql_async::{Pool, prelude::Queryable};
use std::sync::Arc;

/// Thin query executor over a mysql_async pool.
///
/// Everything comes back as text: introspection readers parse what they
/// need and the sampler stores raw values verbatim. NULLs are preserved as
/// `None` so null ratios survive the round-trip.
#[derive(Clone, Debug)]
pub struct MySQLClient {
    pool: Arc<Pool>,
}

impl MySQLClient {
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Execute a query and return results as (column_names, rows)
    pub async fn query_raw(
        &self,
        sql: &str,
    ) -> Result<(Vec<String>, Vec<Vec<Option<String>>>), ApiError> {
        let mut conn = self.pool.get_conn().await.map_err(|e| {
            tracing::error!("Failed to get connection from pool: {}", e);
            ApiError::connection_failed(format!("Failed to get connection: {}", e))
        })?;

        let rows: Vec<mysql_async::Row> = conn.query(sql).await.map_err(|e| {
            tracing::debug!("MySQL query execution failed: {}", e);
            ApiError::connection_failed(format!("Query failed: {}", e))
        })?;

        tracing::debug!("Query returned {} rows", rows.len());

        drop(conn);

        Ok(process_query_result(rows))
    }

    /// Execute a query and return the first column of every row
    pub async fn query_column(&self, sql: &str) -> Result<Vec<Option<String>>, ApiError> {
        let (_, rows) = self.query_raw(sql).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| if row.is_empty() { None } else { row.swap_remove(0) })
            .collect())
    }

    /// Execute a query expected to return a single scalar value
    pub async fn query_scalar(&self, sql: &str) -> Result<Option<String>, ApiError> {
        let values = self.query_column(sql).await?;
        Ok(values.into_iter().next().flatten())
    }

    /// Liveness probe used by connection tests
    pub async fn ping(&self) -> Result<(), ApiError> {
        self.query_scalar("SELECT 1").await?;
        Ok(())
    }
}

fn process_query_result(rows: Vec<mysql_async::Row>) -> (Vec<String>, Vec<Vec<Option<String>>>) {
    if rows.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let col_count = rows[0].columns_ref().len();
    let row_count = rows.len();

    let mut columns = Vec::with_capacity(col_count);
    let mut result_rows = Vec::with_capacity(row_count);

    for col in rows[0].columns_ref().iter() {
        columns.push(col.name_str().to_string());
    }

    for row in rows.iter() {
        let mut row_data = Vec::with_capacity(col_count);
        for col_idx in 0..col_count {
            row_data.push(value_to_string(&row[col_idx]));
        }
        result_rows.push(row_data);
    }

    (columns, result_rows)
}

/// Render a mysql value as text, keeping NULL distinct from empty string
fn value_to_string(value: &mysql_async::Value) -> Option<String> {
    match value {
        mysql_async::Value::NULL => None,
        mysql_async::Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Some(s.to_string()),
            Err(_) => Some(String::from_utf8_lossy(bytes).to_string()),
        },
        mysql_async::Value::Int(i) => Some(i.to_string()),
        mysql_async::Value::UInt(u) => Some(u.to_string()),
        mysql_async::Value::Float(f) => Some(f.to_string()),
        mysql_async::Value::Double(d) => Some(d.to_string()),
        mysql_async::Value::Date(year, month, day, hour, minute, second, _micro) => Some(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        )),
        mysql_async::Value::Time(_neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + (*hours as u32);
            Some(format!("{}:{:02}:{:02}", total_hours, minutes, seconds))
        },
    }
}

/// Quote an identifier for embedding in MySQL SQL text
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Quote a string literal for embedding in MySQL SQL text
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_escape_backticks() {
        assert_eq!(quote_identifier("users"), "`users`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(quote_literal("orders"), "'orders'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn null_values_stay_none() {
        assert_eq!(value_to_string(&mysql_async::Value::NULL), None);
        assert_eq!(value_to_string(&mysql_async::Value::Int(7)), Some("7".to_string()));
    }
}
