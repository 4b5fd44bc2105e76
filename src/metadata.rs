//! Schema overview - read-only description of the dataset
//!
//! Tables, columns, descriptions and relationships consulted by the SQL
//! pipeline, the knowledge-lookup agent and the router. Loaded once from a
//! JSON document and never mutated afterwards.

use crate::error::{Result, SageError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default, rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub related_tables: Vec<String>,
    /// Data file backing the table (CSV or Parquet, relative to the data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl TableInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            columns: Vec::new(),
            related_tables: Vec::new(),
            path: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_column(mut self, name: &str, data_type: &str, description: &str) -> Self {
        self.columns.push(ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            description: description.to_string(),
        });
        self
    }

    pub fn related_to(mut self, table: &str) -> Self {
        self.related_tables.push(table.to_string());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Keyword relevance of this table for a free-text question.
    fn relevance(&self, terms: &[String]) -> usize {
        let mut haystack = format!("{} {}", self.name, self.description).to_lowercase();
        for column in &self.columns {
            haystack.push(' ');
            haystack.push_str(&column.name.to_lowercase());
            haystack.push(' ');
            haystack.push_str(&column.description.to_lowercase());
        }
        terms.iter().filter(|t| haystack.contains(t.as_str())).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaOverview {
    pub tables: Vec<TableInfo>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaDocument {
    Object { tables: Vec<TableInfo> },
    Array(Vec<TableInfo>),
}

impl SchemaOverview {
    pub fn from_tables(tables: Vec<TableInfo>) -> Self {
        Self { tables }
    }

    /// Load `{"tables": [...]}` or a bare array of tables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SageError::Config(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let tables = match serde_json::from_str::<SchemaDocument>(content)? {
            SchemaDocument::Object { tables } => tables,
            SchemaDocument::Array(tables) => tables,
        };
        Ok(Self { tables })
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Tables ranked by keyword overlap with the question, best first.
    pub fn search(&self, question: &str, limit: usize) -> Vec<&TableInfo> {
        let terms: Vec<String> = question
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() > 2)
            .map(|t| t.trim_end_matches('s').to_string())
            .collect();

        let mut scored: Vec<(usize, &TableInfo)> = self
            .tables
            .iter()
            .map(|t| (t.relevance(&terms), t))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, t)| t).collect()
    }

    /// Table name -> data file, resolved against `data_dir`.
    pub fn table_paths(&self, data_dir: &Path) -> HashMap<String, PathBuf> {
        self.tables
            .iter()
            .filter_map(|t| t.path.as_ref().map(|p| (t.name.clone(), data_dir.join(p))))
            .collect()
    }
}

/// Read-only source of the schema overview.
pub trait SchemaProvider: Send + Sync {
    fn overview(&self) -> &SchemaOverview;
}

/// Schema fixed at construction time.
pub struct StaticSchema {
    overview: SchemaOverview,
}

impl StaticSchema {
    pub fn new(overview: SchemaOverview) -> Self {
        Self { overview }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(SchemaOverview::load(path)?))
    }
}

impl SchemaProvider for StaticSchema {
    fn overview(&self) -> &SchemaOverview {
        &self.overview
    }
}
