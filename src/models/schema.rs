//! Schema description models.
//!
//! These back the `describe_schema` tool: columns from
//! `information_schema.columns` plus a few sample rows per allowlisted table.

use super::JsonRow;
use serde::Serialize;
use std::fmt;

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// `information_schema` data type (e.g., `integer`, `character varying`)
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// One allowlisted table as seen by the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub table_name: String,
    /// Empty when the table does not exist in the configured schema.
    pub columns: Vec<ColumnDefinition>,
    pub sample_rows: Vec<JsonRow>,
    /// Why sample rows could not be fetched, if they could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_error: Option<String>,
}

impl TableDescription {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            sample_rows: Vec::new(),
            sample_error: None,
        }
    }

    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// Description of every allowlisted table, in allowlist order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDescription {
    pub schema_name: String,
    pub tables: Vec<TableDescription>,
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Schema: {}", self.schema_name)?;

        for table in &self.tables {
            writeln!(f)?;
            writeln!(f, "Table: {}", table.table_name)?;

            if !table.exists() {
                writeln!(f, "  (not found in schema '{}')", self.schema_name)?;
                continue;
            }

            writeln!(f, "Columns:")?;
            for col in &table.columns {
                let null = if col.nullable { "" } else { ", not null" };
                writeln!(f, "  - {} ({}{})", col.name, col.data_type, null)?;
            }

            if let Some(error) = &table.sample_error {
                writeln!(f, "Sample rows unavailable: {}", error)?;
            } else if table.sample_rows.is_empty() {
                writeln!(f, "Sample rows: (none)")?;
            } else {
                writeln!(f, "Sample rows:")?;
                for row in &table.sample_rows {
                    let line = serde_json::to_string(row).map_err(|_| fmt::Error)?;
                    writeln!(f, "  {}", line)?;
                }
            }
        }

        Ok(())
    }
}
