use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};

use super::SourceAdapter;

use crate::models::{
    ColumnInfo, ColumnRef, DriverKind, RelationshipInfo, RelationshipKind, SamplingConfig,
    SamplingMethod, SchemaInfo, TableInfo, TableKind,
};
use crate::services::ConnectionHandle;
use crate::services::mysql_client::{quote_identifier, quote_literal};
use crate::utils::{ApiError, ApiResult};

/// information_schema-based adapter for MySQL-compatible databases
pub struct MySqlSourceAdapter;

impl MySqlSourceAdapter {
    pub fn new() -> Self {
        Self
    }

    fn table_filter_clause(filter: Option<&[String]>) -> String {
        match filter {
            Some(tables) if !tables.is_empty() => {
                let quoted: Vec<String> = tables.iter().map(|t| quote_literal(t)).collect();
                format!(" AND TABLE_NAME IN ({})", quoted.join(", "))
            },
            _ => String::new(),
        }
    }

    fn qualified_table(column: &ColumnRef) -> String {
        format!("{}.{}", quote_identifier(&column.schema), quote_identifier(&column.table))
    }
}

impl Default for MySqlSourceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for MySqlSourceAdapter {
    fn driver(&self) -> DriverKind {
        DriverKind::MySql
    }

    async fn extract_schema(
        &self,
        handle: &ConnectionHandle,
        filter: Option<&[String]>,
    ) -> ApiResult<SchemaInfo> {
        let client = handle.client();
        let database = handle.descriptor().database_name.clone();
        let db_literal = quote_literal(&database);
        let filter_clause = Self::table_filter_clause(filter);

        let table_sql = format!(
            "SELECT TABLE_NAME, TABLE_TYPE, TABLE_COMMENT \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = {}{} \
             ORDER BY TABLE_NAME",
            db_literal, filter_clause
        );
        let (_, table_rows) = client
            .query_raw(&table_sql)
            .await
            .map_err(|e| ApiError::metadata_error(format!("Failed to list tables: {}", e)))?;

        let column_sql = format!(
            "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, \
             NUMERIC_PRECISION, IS_NULLABLE, COLUMN_KEY, COLUMN_COMMENT \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = {}{} \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
            db_literal, filter_clause
        );
        let (_, column_rows) = client
            .query_raw(&column_sql)
            .await
            .map_err(|e| ApiError::metadata_error(format!("Failed to list columns: {}", e)))?;

        let fk_sql = format!(
            "SELECT TABLE_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
             FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = {} AND REFERENCED_TABLE_NAME IS NOT NULL \
             ORDER BY TABLE_NAME, COLUMN_NAME",
            db_literal
        );
        let (_, fk_rows) = client.query_raw(&fk_sql).await.map_err(|e| {
            ApiError::metadata_error(format!("Failed to read foreign keys: {}", e))
        })?;

        // (table -> [imported fk], table -> [exported fk]) plus the set of
        // columns that participate as the referencing side
        let mut imported: BTreeMap<String, Vec<RelationshipInfo>> = BTreeMap::new();
        let mut exported: BTreeMap<String, Vec<RelationshipInfo>> = BTreeMap::new();
        let mut fk_columns: HashSet<(String, String)> = HashSet::new();

        for row in &fk_rows {
            let (Some(table), Some(column), Some(ref_table), Some(ref_column)) = (
                row.first().cloned().flatten(),
                row.get(1).cloned().flatten(),
                row.get(2).cloned().flatten(),
                row.get(3).cloned().flatten(),
            ) else {
                continue;
            };

            let source = ColumnRef::new(database.clone(), table.clone(), column.clone());
            let target = ColumnRef::new(database.clone(), ref_table.clone(), ref_column);

            fk_columns.insert((table.clone(), column));
            imported.entry(table).or_default().push(RelationshipInfo {
                source_column: source.clone(),
                target_column: target.clone(),
                kind: RelationshipKind::Imported,
            });
            exported.entry(ref_table).or_default().push(RelationshipInfo {
                source_column: source,
                target_column: target,
                kind: RelationshipKind::Exported,
            });
        }

        let mut columns_by_table: BTreeMap<String, Vec<ColumnInfo>> = BTreeMap::new();
        for row in &column_rows {
            let (Some(table), Some(name), Some(data_type)) = (
                row.first().cloned().flatten(),
                row.get(1).cloned().flatten(),
                row.get(2).cloned().flatten(),
            ) else {
                return Err(ApiError::metadata_error(
                    "Malformed information_schema.COLUMNS row",
                ));
            };

            let size = row
                .get(3)
                .cloned()
                .flatten()
                .or_else(|| row.get(4).cloned().flatten())
                .and_then(|v| v.parse::<i64>().ok());
            let nullable = row
                .get(5)
                .cloned()
                .flatten()
                .map(|v| v.eq_ignore_ascii_case("YES"))
                .unwrap_or(true);
            let column_key = row.get(6).cloned().flatten().unwrap_or_default();
            let comment = row.get(7).cloned().flatten().filter(|c| !c.is_empty());

            columns_by_table.entry(table.clone()).or_default().push(ColumnInfo {
                foreign_key: fk_columns.contains(&(table, name.clone())),
                primary_key: column_key == "PRI",
                name,
                data_type,
                size,
                nullable,
                comment,
            });
        }

        let mut tables = Vec::with_capacity(table_rows.len());
        for row in &table_rows {
            let Some(name) = row.first().cloned().flatten() else {
                return Err(ApiError::metadata_error("Malformed information_schema.TABLES row"));
            };
            let kind = match row.get(1).cloned().flatten().as_deref() {
                Some("VIEW") => TableKind::View,
                _ => TableKind::Table,
            };
            let comment = row.get(2).cloned().flatten().filter(|c| !c.is_empty());

            let mut relationships = imported.remove(&name).unwrap_or_default();
            relationships.extend(exported.remove(&name).unwrap_or_default());

            tables.push(TableInfo {
                columns: columns_by_table.remove(&name).unwrap_or_default(),
                name,
                kind,
                comment,
                relationships,
            });
        }

        let mut schema = SchemaInfo { catalog: "def".to_string(), schema: database, tables };
        schema.sort_tables();

        tracing::info!(
            "Extracted schema for {}: {} tables, {} columns",
            schema.schema,
            schema.tables.len(),
            schema.column_count()
        );

        Ok(schema)
    }

    async fn fetch_values(
        &self,
        handle: &ConnectionHandle,
        column: &ColumnRef,
        config: &SamplingConfig,
        seed: u32,
    ) -> ApiResult<Vec<Option<String>>> {
        let client = handle.client();
        let table = Self::qualified_table(column);
        let col = quote_identifier(&column.column);
        let n = config.sample_size;

        let sql = match config.method {
            SamplingMethod::Random => {
                format!("SELECT {} FROM {} ORDER BY RAND({}) LIMIT {}", col, table, seed, n)
            },
            SamplingMethod::Systematic => {
                let total = client
                    .query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                    .await
                    .map_err(sampling_fault)?
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                let stride = (total / n.max(1)).max(1);
                format!(
                    "SELECT v FROM (SELECT {} AS v, ROW_NUMBER() OVER () AS rn FROM {}) ranked \
                     WHERE (rn - 1) % {} = 0 LIMIT {}",
                    col, table, stride, n
                )
            },
            SamplingMethod::Stratified => {
                let distinct = client
                    .query_scalar(&format!("SELECT COUNT(DISTINCT {}) FROM {}", col, table))
                    .await
                    .map_err(sampling_fault)?
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                let per_value = if distinct == 0 { 1 } else { n.div_ceil(distinct).max(1) };
                format!(
                    "SELECT v FROM (SELECT {} AS v, \
                     ROW_NUMBER() OVER (PARTITION BY {}) AS rn FROM {}) strata \
                     WHERE rn <= {} LIMIT {}",
                    col, col, table, per_value, n
                )
            },
        };

        client.query_column(&sql).await.map_err(sampling_fault)
    }
}

/// Keep connection faults typed; everything else degrades to a sampling fault
fn sampling_fault(e: ApiError) -> ApiError {
    match e {
        ApiError::Connection(_) => e,
        other => ApiError::sampling_error(other.to_string()),
    }
}
