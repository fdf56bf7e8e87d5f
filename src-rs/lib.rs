//! hotmap: heatmap rendering and interaction engine.
//!
//! A numeric matrix is laid out as a grid of colored cells on an owned RGBA
//! surface. Pointer events drive hover, drag selection, click and labeling;
//! labels are posted to a persistence service (see [`server`]) that attaches
//! each label's slice of the authoritative matrix before writing it to disk.

pub mod color;
pub mod config;
pub mod dataset;
pub mod draw;
pub mod error;
pub mod heatmap;
pub mod interaction;
pub mod labels;
pub mod layout;
pub mod persist;
pub mod render;
pub mod server;
pub mod tree;

pub use color::{Color, ColorConfig, ColorSpec};
pub use config::HeatmapConfig;
pub use dataset::{AxisLabel, CellCoord, CellRect, Dataset, Metadata, ViewState};
pub use error::{HeatmapError, Result};
pub use heatmap::Heatmap;
pub use interaction::{
    CallbackError, CellInfo, HeatmapCallbacks, InteractionEvent, InteractionState, NoCallbacks,
    PointerEvent, SelectedCell, SelectionResponse, CLICK_SLOP_PX,
};
pub use labels::{Label, LabelData, LabelDocument, LabelStore, PendingSave, SaveReceipt};
pub use layout::{GridLayout, LayoutOptions, Viewport};
pub use persist::{HttpTransport, LabelTransport};
pub use server::LabelService;
pub use tree::{TreeAnnotation, TreeOverlay};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
