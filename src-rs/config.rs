//! View configuration document (`--config` JSON) and its translation into
//! layout options and a color spec.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::color::{ColorConfig, ColorSpec};
use crate::error::{HeatmapError, Result};
use crate::layout::LayoutOptions;

/// Sizing and chrome toggles nested under `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewOptions {
    pub max_font_size: u32,
    pub min_font_size: u32,
    pub row_label_ellipsis_pos: Option<usize>,
    pub width: u32,
    pub height: u32,
    pub show_version: bool,
    pub show_legend: bool,
    pub tree_gutter_width: u32,
}

impl Default for ViewOptions {
    fn default() -> Self {
        let layout = LayoutOptions::default();
        Self {
            max_font_size: layout.max_font_size,
            min_font_size: layout.min_font_size,
            row_label_ellipsis_pos: layout.row_label_ellipsis_pos,
            width: layout.width,
            height: layout.height,
            show_version: layout.show_version,
            show_legend: layout.show_legend,
            tree_gutter_width: layout.tree_gutter_width,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeatmapConfig {
    pub rows_label: Option<String>,
    pub cols_label: Option<String>,
    /// Captions for the entries of each row's metadata, shown on hover.
    pub row_meta_labels: Vec<String>,
    pub col_meta_labels: Vec<String>,
    pub hide_col_meta: bool,
    pub options: ViewOptions,
    pub color: ColorConfig,
    pub newick: Option<String>,
}

impl HeatmapConfig {
    pub fn from_json_str(raw: &str) -> Result<HeatmapConfig> {
        serde_json::from_str(raw).map_err(HeatmapError::from)
    }

    pub fn load(path: &Path) -> Result<HeatmapConfig> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn layout_options(&self) -> LayoutOptions {
        let o = &self.options;
        LayoutOptions {
            width: o.width,
            height: o.height,
            max_font_size: o.max_font_size,
            min_font_size: o.min_font_size,
            row_label_ellipsis_pos: o.row_label_ellipsis_pos,
            hide_col_meta: self.hide_col_meta,
            tree_gutter_width: o.tree_gutter_width,
            show_legend: o.show_legend,
            show_version: o.show_version,
            rows_label: self.rows_label.clone(),
            cols_label: self.cols_label.clone(),
        }
    }

    pub fn color_spec(&self) -> Result<ColorSpec> {
        ColorSpec::from_config(&self.color)
    }

    /// `caption: value` lines for a metadata row, skipping empty values.
    pub fn describe_meta(captions: &[String], values: &[Option<String>]) -> Vec<String> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, value)| {
                let value = value.as_deref()?;
                Some(match captions.get(i) {
                    Some(caption) => format!("{caption}: {value}"),
                    None => value.to_string(),
                })
            })
            .collect()
    }
}
