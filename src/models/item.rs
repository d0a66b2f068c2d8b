//! Dataset items and the dataset loader.

use super::{BatchError, DatasetConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// One row of the input dataset.
///
/// Immutable once loaded; the batch holds the full ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Stable identifier (e.g. an SRA accession)
    pub id: String,

    /// Grouping fields in configured column order, outermost first
    pub groups: Vec<String>,
}

impl ItemRecord {
    pub fn new(id: impl Into<String>, groups: &[&str]) -> Self {
        Self {
            id: id.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// Permanent output directory for this item under `root`.
    ///
    /// Groups `(g1, g2, g3)` and id `x` map to `root/g1/g2/g3.x`.
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        let mut dir = root.to_path_buf();
        match self.groups.split_last() {
            Some((last, parents)) => {
                for group in parents {
                    dir.push(group);
                }
                dir.push(format!("{}.{}", last, self.id));
            }
            None => dir.push(&self.id),
        }
        dir
    }
}

/// Load the ordered item sequence from a delimited file with a header row.
pub fn load_dataset(path: &Path, config: &DatasetConfig) -> Result<Vec<ItemRecord>> {
    let file = std::fs::File::open(path).map_err(|e| BatchError::load(path, e.to_string()))?;
    let items = parse_dataset(file, config).map_err(|message| BatchError::load(path, message))?;

    info!(count = items.len(), path = %path.display(), "Loaded dataset");
    Ok(items)
}

/// Parse dataset rows from any reader.
fn parse_dataset<R: std::io::Read>(
    reader: R,
    config: &DatasetConfig,
) -> std::result::Result<Vec<ItemRecord>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter as u8)
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| format!("reading header: {e}"))?
        .clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| format!("missing column '{name}' in header"))
    };

    let id_idx = column(&config.id_column)?;
    let group_idx = config
        .group_columns
        .iter()
        .map(|name| column(name))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut items = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| match e.position() {
            Some(pos) => format!("line {}: {e}", pos.line()),
            None => e.to_string(),
        })?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        let id = row.get(id_idx).unwrap_or_default();
        check_component(id, &config.id_column).map_err(|e| format!("line {line}: {e}"))?;

        let mut groups = Vec::with_capacity(group_idx.len());
        for (&i, name) in group_idx.iter().zip(&config.group_columns) {
            let value = row.get(i).unwrap_or_default();
            check_component(value, name).map_err(|e| format!("line {line}: {e}"))?;
            groups.push(value.to_string());
        }

        items.push(ItemRecord {
            id: id.to_string(),
            groups,
        });
    }

    Ok(items)
}

/// Ids and group values become single path components and cleanup arguments.
fn check_component(value: &str, column: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err(format!("empty '{column}'"));
    }
    if value == "." || value == ".." {
        return Err(format!("'{column}' may not be '{value}'"));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(format!("'{column}' value {value:?} contains a path separator or NUL"));
    }
    Ok(())
}
