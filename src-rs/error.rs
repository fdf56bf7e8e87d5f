//! Error taxonomy shared by the engine, the label store and the service.

use thiserror::Error;

/// Errors raised by the heatmap engine and its collaborators.
#[derive(Error, Debug)]
pub enum HeatmapError {
    /// Initial dataset could not be fetched or parsed.
    #[error("could not load heatmap data: {message}")]
    DataLoad { message: String },

    /// An `update()` payload is not rectangular-consistent. The prior view state is kept.
    #[error("invalid update: {message}")]
    InvalidUpdate { message: String },

    /// A value is not covered by any bin and no default color is configured.
    #[error("no color bin matches value {value}")]
    NoMatchingBin { value: f64 },

    /// Malformed predicate or color in the color configuration.
    #[error("invalid color spec: {message}")]
    InvalidColorSpec { message: String },

    /// Save endpoint unreachable or answered with a non-2xx status.
    #[error("label save failed{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Persistence { status: Option<u16>, message: String },

    /// A save was requested while another one is still in flight.
    #[error("a label save is already in progress")]
    SaveInProgress,

    /// Server side: the submitted label document is unusable.
    #[error("{message}")]
    InvalidLabelFile { message: String },

    /// Label bounds are inverted or fall outside the matrix.
    #[error("label {id} bounds rows {start_row}..={end_row}, cols {start_col}..={end_col} are outside a {rows}x{cols} matrix")]
    LabelBounds {
        id: String,
        start_row: usize,
        end_row: usize,
        start_col: usize,
        end_col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HeatmapError>;

impl HeatmapError {
    pub fn data_load(message: impl Into<String>) -> Self {
        Self::DataLoad {
            message: message.into(),
        }
    }

    pub fn invalid_update(message: impl Into<String>) -> Self {
        Self::InvalidUpdate {
            message: message.into(),
        }
    }

    pub fn invalid_color_spec(message: impl Into<String>) -> Self {
        Self::InvalidColorSpec {
            message: message.into(),
        }
    }

    pub fn invalid_label_file(message: impl Into<String>) -> Self {
        Self::InvalidLabelFile {
            message: message.into(),
        }
    }

    pub fn persistence(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Persistence {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_message_includes_status_when_known() {
        let err = HeatmapError::persistence(Some(500), "Error saving label");
        assert_eq!(err.to_string(), "label save failed (HTTP 500): Error saving label");

        let err = HeatmapError::persistence(None, "connection refused");
        assert_eq!(err.to_string(), "label save failed: connection refused");
    }
}
