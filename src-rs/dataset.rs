//! Matrix data model: axis labels, the view state triple, per-axis metadata,
//! and loading of the initial data document.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{HeatmapError, Result};

/// A row or column identifier. Numeric ids stay numeric end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisLabel {
    Text(String),
    Number(serde_json::Number),
}

impl AxisLabel {
    pub fn text(value: impl Into<String>) -> Self {
        AxisLabel::Text(value.into())
    }
}

impl fmt::Display for AxisLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisLabel::Text(s) => f.write_str(s),
            AxisLabel::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for AxisLabel {
    fn from(value: &str) -> Self {
        AxisLabel::Text(value.to_string())
    }
}

impl From<String> for AxisLabel {
    fn from(value: String) -> Self {
        AxisLabel::Text(value)
    }
}

impl From<u64> for AxisLabel {
    fn from(value: u64) -> Self {
        AxisLabel::Number(value.into())
    }
}

/// The currently rendered `{rows, cols, matrix}` triple.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewState {
    pub rows: Vec<AxisLabel>,
    pub cols: Vec<AxisLabel>,
    pub matrix: Vec<Vec<f64>>,
}

impl ViewState {
    pub fn new(rows: Vec<AxisLabel>, cols: Vec<AxisLabel>, matrix: Vec<Vec<f64>>) -> Self {
        Self { rows, cols, matrix }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.cols.len()
    }

    /// Describes the first rectangularity violation, if any.
    pub fn check_rectangular(&self) -> std::result::Result<(), String> {
        if self.rows.len() != self.matrix.len() {
            return Err(format!(
                "{} rows but matrix has {} rows",
                self.rows.len(),
                self.matrix.len()
            ));
        }
        for (idx, row) in self.matrix.iter().enumerate() {
            if row.len() != self.cols.len() {
                return Err(format!(
                    "matrix row {idx} has {} values but there are {} cols",
                    row.len(),
                    self.cols.len()
                ));
            }
        }
        Ok(())
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        self.matrix.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &f64> {
        self.matrix.iter().flatten()
    }

    /// Inclusive slice of the matrix. Bounds are checked, never trusted.
    pub fn slice(&self, rect: &CellRect) -> Option<Vec<Vec<f64>>> {
        if !rect.is_ordered()
            || rect.end_row >= self.row_count()
            || rect.end_col >= self.col_count()
        {
            return None;
        }
        Some(
            self.matrix[rect.start_row..=rect.end_row]
                .iter()
                .map(|row| row[rect.start_col..=rect.end_col].to_vec())
                .collect(),
        )
    }
}

/// Inclusive cell rectangle in matrix indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRect {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl CellRect {
    /// Rectangle spanned by two corner cells, in any drag direction.
    pub fn spanning(a: CellCoord, b: CellCoord) -> Self {
        Self {
            start_row: a.row.min(b.row),
            end_row: a.row.max(b.row),
            start_col: a.col.min(b.col),
            end_col: a.col.max(b.col),
        }
    }

    pub fn single(cell: CellCoord) -> Self {
        Self::spanning(cell, cell)
    }

    pub fn is_ordered(&self) -> bool {
        self.start_row <= self.end_row && self.start_col <= self.end_col
    }

    pub fn row_span(&self) -> usize {
        self.end_row - self.start_row + 1
    }

    pub fn col_span(&self) -> usize {
        self.end_col - self.start_col + 1
    }

    pub fn contains(&self, cell: CellCoord) -> bool {
        (self.start_row..=self.end_row).contains(&cell.row)
            && (self.start_col..=self.end_col).contains(&cell.col)
    }

    /// Contained cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (self.start_row..=self.end_row)
            .flat_map(move |row| {
                (self.start_col..=self.end_col).map(move |col| CellCoord { row, col })
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: usize,
    pub col: usize,
}

impl CellCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Per-row / per-col auxiliary values, shown on hover only.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Metadata {
    pub row_meta: Vec<Vec<Option<String>>>,
    pub col_meta: Vec<Vec<Option<String>>>,
}

impl Metadata {
    /// Drops metadata that no longer lines up 1:1 with the view.
    pub fn aligned_with(mut self, view: &ViewState) -> Self {
        if !self.row_meta.is_empty() && self.row_meta.len() != view.row_count() {
            debug!(
                meta = self.row_meta.len(),
                rows = view.row_count(),
                "dropping misaligned row metadata"
            );
            self.row_meta.clear();
        }
        if !self.col_meta.is_empty() && self.col_meta.len() != view.col_count() {
            debug!(
                meta = self.col_meta.len(),
                cols = view.col_count(),
                "dropping misaligned column metadata"
            );
            self.col_meta.clear();
        }
        self
    }

    /// Carries metadata from `old` over to `new` by axis label. Entries whose
    /// label is absent from `old` get none; an axis whose old labels are not
    /// unique is dropped.
    pub fn rekeyed(self, old: &ViewState, new: &ViewState) -> Self {
        Self {
            row_meta: rekey_axis(self.row_meta, &old.rows, &new.rows, "row"),
            col_meta: rekey_axis(self.col_meta, &old.cols, &new.cols, "column"),
        }
    }

    pub fn row(&self, idx: usize) -> &[Option<String>] {
        self.row_meta.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn col(&self, idx: usize) -> &[Option<String>] {
        self.col_meta.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_col_meta(&self) -> bool {
        self.col_meta.iter().any(|m| !m.is_empty())
    }
}

fn label_key(label: &AxisLabel) -> (bool, String) {
    (matches!(label, AxisLabel::Number(_)), label.to_string())
}

fn rekey_axis(
    meta: Vec<Vec<Option<String>>>,
    old: &[AxisLabel],
    new: &[AxisLabel],
    axis: &'static str,
) -> Vec<Vec<Option<String>>> {
    if meta.is_empty() {
        return meta;
    }
    if meta.len() != old.len() {
        debug!(axis, meta = meta.len(), labels = old.len(), "dropping misaligned metadata");
        return Vec::new();
    }
    if old == new {
        return meta;
    }
    let index: HashMap<(bool, String), usize> =
        old.iter().enumerate().map(|(i, label)| (label_key(label), i)).collect();
    if index.len() != old.len() {
        debug!(axis, "dropping metadata keyed by duplicate labels");
        return Vec::new();
    }
    let rekeyed: Vec<Vec<Option<String>>> = new
        .iter()
        .map(|label| {
            index
                .get(&label_key(label))
                .map(|&i| meta[i].clone())
                .unwrap_or_default()
        })
        .collect();
    if rekeyed.iter().all(Vec::is_empty) {
        return Vec::new();
    }
    rekeyed
}

/// A loaded data document: the view triple plus whatever metadata came with it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub view: ViewState,
    pub meta: Metadata,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AxisEntry {
    Plain(AxisLabel),
    Described {
        name: AxisLabel,
        #[serde(default)]
        meta: Vec<Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetDocument {
    rows: Vec<AxisEntry>,
    cols: Vec<AxisEntry>,
    matrix: Vec<Vec<f64>>,
    #[serde(default)]
    row_meta: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    col_meta: Option<Vec<Vec<Value>>>,
}

fn meta_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let v = s.trim();
            if v.is_empty() || v == "undefined" {
                None
            } else {
                Some(v.to_string())
            }
        }
        other => Some(other.to_string()),
    }
}

fn split_axis(entries: Vec<AxisEntry>) -> (Vec<AxisLabel>, Vec<Vec<Option<String>>>) {
    let mut labels = Vec::with_capacity(entries.len());
    let mut meta = Vec::with_capacity(entries.len());
    let mut any_meta = false;
    for entry in entries {
        match entry {
            AxisEntry::Plain(label) => {
                labels.push(label);
                meta.push(Vec::new());
            }
            AxisEntry::Described { name, meta: values } => {
                any_meta |= !values.is_empty();
                labels.push(name);
                meta.push(values.iter().map(meta_value).collect());
            }
        }
    }
    if !any_meta {
        meta.clear();
    }
    (labels, meta)
}

fn convert_meta(rows: Vec<Vec<Value>>) -> Vec<Vec<Option<String>>> {
    rows.iter()
        .map(|row| row.iter().map(meta_value).collect())
        .collect()
}

impl Dataset {
    pub fn from_json_str(raw: &str) -> Result<Dataset> {
        let doc: DatasetDocument = serde_json::from_str(raw)
            .map_err(|e| HeatmapError::data_load(format!("malformed data document: {e}")))?;

        let (rows, mut row_meta) = split_axis(doc.rows);
        let (cols, mut col_meta) = split_axis(doc.cols);
        if let Some(explicit) = doc.row_meta {
            row_meta = convert_meta(explicit);
        }
        if let Some(explicit) = doc.col_meta {
            col_meta = convert_meta(explicit);
        }

        let view = ViewState::new(rows, cols, doc.matrix);
        view.check_rectangular().map_err(HeatmapError::data_load)?;
        let meta = Metadata { row_meta, col_meta }.aligned_with(&view);

        Ok(Dataset { view, meta })
    }

    /// Load from a file path.
    pub fn load(path: &Path) -> Result<Dataset> {
        let raw = fs::read_to_string(path).map_err(|e| {
            HeatmapError::data_load(format!("failed to read {}: {e}", path.display()))
        })?;
        let dataset = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            rows = dataset.view.row_count(),
            cols = dataset.view.col_count(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// GET a data document over HTTP.
    pub async fn fetch(url: &str) -> Result<Dataset> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| HeatmapError::data_load(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HeatmapError::data_load(format!("{url} answered HTTP {status}")));
        }
        let raw = response
            .text()
            .await
            .map_err(|e| HeatmapError::data_load(format!("failed to read body from {url}: {e}")))?;
        let dataset = Self::from_json_str(&raw)?;
        info!(
            %url,
            rows = dataset.view.row_count(),
            cols = dataset.view.col_count(),
            "fetched dataset"
        );
        Ok(dataset)
    }

    /// Path or `http(s)://` URL.
    pub async fn open(source: &str) -> Result<Dataset> {
        if source.starts_with("http://") || source.starts_with("https://") {
            Self::fetch(source).await
        } else {
            Self::load(Path::new(source))
        }
    }

    /// Document form consumed by `from_json_str`.
    pub fn to_document(&self) -> Value {
        let mut doc = json!({
            "rows": self.view.rows,
            "cols": self.view.cols,
            "matrix": self.view.matrix,
        });
        if !self.meta.row_meta.is_empty() {
            doc["rowMeta"] = json!(self.meta.row_meta);
        }
        if !self.meta.col_meta.is_empty() {
            doc["colMeta"] = json!(self.meta.col_meta);
        }
        doc
    }
}
