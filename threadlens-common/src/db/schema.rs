//! Declarative Table Schemas
//!
//! Schema definitions in code are the single source of truth for destination
//! tables. Provisioning is create-if-absent only:
//!
//! 1. **Absent table** - created from the declared columns
//! 2. **Existing table** - introspected and compared; drift is reported, never repaired
//!
//! # Usage
//!
//! ```rust,ignore
//! let schema = TableSchema::new("message_sentiment", vec![
//!     ColumnDefinition::new("message_id", "TEXT").not_null(),
//!     ColumnDefinition::new("confidence", "REAL").not_null().check("confidence BETWEEN 0 AND 1"),
//! ]);
//!
//! SchemaManager::ensure_table(&pool, &schema).await?;
//! ```

use crate::{Error, Result};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{info, warn};

/// A single bindable cell value for dynamically shaped rows
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Null,
}

impl SqlValue {
    /// Bind this value as the next positional parameter of `query`
    pub fn bind_to<'q>(
        &self,
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Real(f) => query.bind(*f),
            SqlValue::Null => query.bind(Option::<String>::None),
        }
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// CHECK expression (without the surrounding `CHECK (...)`)
    pub check: Option<String>,
}

impl ColumnDefinition {
    /// Create new column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            check: None,
        }
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Attach a CHECK constraint
    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.check = Some(expr.into());
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK ({})", check));
        }
        sql
    }
}

/// Expected shape of a table (order matters for creation and row binding)
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Reject identifiers that cannot be interpolated into SQL verbatim
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(Error::InvalidInput(format!(
                "Invalid table name: {:?}",
                self.name
            )));
        }
        if self.columns.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Table '{}' declares no columns",
                self.name
            )));
        }
        if let Some(bad) = self.columns.iter().find(|c| !is_identifier(&c.name)) {
            return Err(Error::InvalidInput(format!(
                "Invalid column name in '{}': {:?}",
                self.name, bad.name
            )));
        }
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this schema
    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(ColumnDefinition::to_sql).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            columns.join(",\n    ")
        )
    }

    /// Positional `INSERT` statement covering every declared column
    pub fn insert_sql(&self) -> String {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name,
            self.column_names().join(", "),
            placeholders
        )
    }
}

/// Plain SQL identifier: ASCII letter or underscore, then letters, digits, underscores
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i32,
    /// Column name
    pub name: String,
    /// SQL type from PRAGMA table_info
    pub type_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
}

/// Drift detected between expected and actual schema
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDrift {
    /// Column missing from database
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Column type mismatch
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Constraint declared in code but absent from the table
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: String,
    },
}

/// Schema introspection via PRAGMA table_info
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns from database table, in database order (by cid)
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        if !is_identifier(table_name) {
            return Err(Error::InvalidInput(format!(
                "Invalid table name: {:?}",
                table_name
            )));
        }

        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(ActualColumn {
                cid: row.try_get("cid")?,
                name: row.try_get("name")?,
                type_name: row.try_get("type")?,
                not_null: row.try_get::<i32, _>("notnull")? != 0,
            });
        }

        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    /// Check if table exists
    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}

/// Schema comparison - detect drift between expected and actual
pub struct SchemaDiff;

impl SchemaDiff {
    /// Compare expected schema to actual database schema
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            let Some(actual_col) = actual.iter().find(|c| c.name == expected_col.name) else {
                drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.clone(),
                });
                continue;
            };

            if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                drift.push(SchemaDrift::TypeMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    expected: expected_col.sql_type.clone(),
                    actual: actual_col.type_name.clone(),
                });
            }

            if expected_col.not_null && !actual_col.not_null {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    constraint: "NOT NULL".to_string(),
                });
            }
        }

        drift
    }

    /// Check if SQL types are compatible (SQLite type affinity rules)
    fn types_compatible(expected: &str, actual: &str) -> bool {
        let exp = expected.to_uppercase();
        let act = actual.to_uppercase();

        if exp == act {
            return true;
        }

        let int_like = |t: &str| t.contains("INT");
        let text_like = |t: &str| t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB");
        let real_like =
            |t: &str| t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB");

        (int_like(&exp) && int_like(&act))
            || (text_like(&exp) && text_like(&act))
            || (real_like(&exp) && real_like(&act))
    }
}

/// Outcome of provisioning a table
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned {
    /// Table was absent and has been created
    Created,
    /// Table already existed; it was left untouched
    AlreadyPresent { drift: Vec<SchemaDrift> },
}

/// Create-if-absent table provisioning
pub struct SchemaManager;

impl SchemaManager {
    /// Ensure `schema` exists in the database.
    ///
    /// Never alters an existing table: drift is logged and returned.
    pub async fn ensure_table(pool: &SqlitePool, schema: &TableSchema) -> Result<Provisioned> {
        schema.validate()?;

        if SchemaIntrospector::table_exists(pool, &schema.name).await? {
            let actual = SchemaIntrospector::introspect_table(pool, &schema.name).await?;
            let drift = SchemaDiff::compare(&schema.name, &schema.columns, &actual);

            if drift.is_empty() {
                info!("Table '{}' already exists", schema.name);
            }
            for change in &drift {
                match change {
                    SchemaDrift::MissingColumn { table, column } => warn!(
                        "Table {} is missing column '{}' ({}); existing schema left unchanged",
                        table, column.name, column.sql_type
                    ),
                    SchemaDrift::TypeMismatch { table, column, expected, actual } => warn!(
                        "Type mismatch in {}.{}: expected '{}', found '{}'; existing schema left unchanged",
                        table, column, expected, actual
                    ),
                    SchemaDrift::ConstraintMismatch { table, column, constraint } => warn!(
                        "Constraint mismatch in {}.{}: missing '{}'; existing schema left unchanged",
                        table, column, constraint
                    ),
                }
            }

            return Ok(Provisioned::AlreadyPresent { drift });
        }

        info!("Creating table '{}'", schema.name);
        sqlx::query(&schema.create_table_sql()).execute(pool).await?;
        info!("Table '{}' created", schema.name);

        Ok(Provisioned::Created)
    }
}
