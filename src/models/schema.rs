use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Flat key identifying a column within a scan: (schema, table, column).
///
/// Results, samples, and quasi-identifier groups all reference columns
/// through this key; the column metadata itself lives under the scan's
/// schema snapshot, so there are no parent back-pointers anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct ColumnRef {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self { schema: schema.into(), table: table.into(), column: column.into() }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableKind {
    Table,
    View,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
        }
    }
}

/// Role of a foreign-key relationship relative to the owning table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    /// This table's column references another table's primary key
    Imported,
    /// Another table's column references this table's primary key
    Exported,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RelationshipInfo {
    pub source_column: ColumnRef,
    pub target_column: ColumnRef,
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub size: Option<i64>,
    pub nullable: bool,
    pub primary_key: bool,
    pub foreign_key: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    pub comment: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub relationships: Vec<RelationshipInfo>,
}

/// Snapshot of a database schema, built fresh for every scan
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchemaInfo {
    pub catalog: String,
    pub schema: String,
    pub tables: Vec<TableInfo>,
}

impl SchemaInfo {
    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    /// Tables in deterministic (catalog, schema, name) codepoint order so
    /// downstream sampling is reproducible
    pub fn sort_tables(&mut self) {
        self.tables.sort_by(|a, b| a.name.cmp(&b.name));
    }
}
