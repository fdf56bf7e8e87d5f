//! The `Heatmap` engine: owns the view state, layout, surface, interaction
//! controller and label store, and dispatches gestures to host callbacks.

use std::panic::{self, AssertUnwindSafe};

use image::RgbaImage;
use tracing::{debug, error, info};

use crate::color::ColorSpec;
use crate::config::HeatmapConfig;
use crate::dataset::{CellCoord, CellRect, Dataset, Metadata, ViewState};
use crate::error::{HeatmapError, Result};
use crate::interaction::{
    CallbackError, CellInfo, Gesture, HeatmapCallbacks, InteractionController, InteractionEvent,
    InteractionState, NoCallbacks, PointerEvent, SelectedCell, SelectionResponse,
};
use crate::labels::{Label, LabelStore, PendingSave};
use crate::layout::{GridLayout, LayoutOptions, Viewport};
use crate::render::{GridRenderer, Overlays, RenderCursor, RenderScene};
use crate::tree::{TreeAnnotation, TreeOverlay};

/// Runs a host callback, turning errors and panics into a log line.
fn isolate<T>(
    hook: &'static str,
    f: impl FnOnce() -> std::result::Result<T, CallbackError>,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            error!(hook, error = %err, "callback failed");
            None
        }
        Err(_) => {
            error!(hook, "callback panicked");
            None
        }
    }
}

pub struct Heatmap<C: HeatmapCallbacks = NoCallbacks> {
    view: ViewState,
    meta: Metadata,
    colors: ColorSpec,
    options: LayoutOptions,
    viewport: Viewport,
    tree: Option<TreeAnnotation>,
    callbacks: C,
    controller: InteractionController,
    labels: LabelStore,
    annotation: String,
    highlight: Option<CellRect>,
    last_selection: Option<CellRect>,
    tooltip: Option<String>,
    layout: GridLayout,
    renderer: GridRenderer,
    /// Progressive render in flight, if any.
    pass: Option<RenderCursor>,
    generation: u64,
    dirty: bool,
}

impl<C: HeatmapCallbacks> Heatmap<C> {
    /// Validates the data against the color spec and draws the first frame.
    /// Any failure here is fatal; nothing is rendered.
    pub fn new(dataset: Dataset, config: &HeatmapConfig, callbacks: C) -> Result<Self> {
        let colors = config.color_spec()?;
        let Dataset { view, meta } = dataset;
        view.check_rectangular().map_err(HeatmapError::data_load)?;
        colors.validate_values(view.values())?;
        let meta = meta.aligned_with(&view);

        let options = config.layout_options();
        let tree = config
            .newick
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(TreeAnnotation::new);
        let viewport = Viewport::default();
        let layout = GridLayout::compute(&view, &meta, &options, viewport, tree.is_some());
        let renderer = GridRenderer::new(options.width, options.height);

        let mut heatmap = Self {
            view,
            meta,
            colors,
            options,
            viewport,
            tree,
            callbacks,
            controller: InteractionController::new(),
            labels: LabelStore::new(),
            annotation: String::new(),
            highlight: None,
            last_selection: None,
            tooltip: None,
            layout,
            renderer,
            pass: None,
            generation: 0,
            dirty: true,
        };
        heatmap.redraw()?;
        info!(
            rows = heatmap.view.row_count(),
            cols = heatmap.view.col_count(),
            cell_w = heatmap.layout.cell_w,
            cell_h = heatmap.layout.cell_h,
            "heatmap ready"
        );
        Ok(heatmap)
    }

    /// Swaps the default tree drawer for a host-provided one. No-op without newick.
    pub fn with_tree_drawer(mut self, drawer: Box<dyn TreeOverlay>) -> Self {
        if let Some(tree) = self.tree.take() {
            self.tree = Some(TreeAnnotation::with_drawer(tree.newick(), drawer));
            self.dirty = true;
        }
        self
    }

    pub fn get_state(&self) -> ViewState {
        self.view.clone()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    pub fn color_spec(&self) -> &ColorSpec {
        &self.colors
    }

    /// Bumped on every successful `update`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the view state. On error the previous state stays in place.
    /// Metadata follows the row and column labels it was attached to.
    pub fn update(&mut self, state: ViewState) -> Result<()> {
        state.check_rectangular().map_err(HeatmapError::invalid_update)?;
        self.colors.validate_values(state.values())?;

        let meta = self.meta.clone().rekeyed(&self.view, &state);
        let layout = GridLayout::compute(
            &state,
            &meta,
            &self.options,
            self.viewport,
            self.tree.is_some(),
        );
        let viewport = layout.viewport;
        let previous = (
            std::mem::replace(&mut self.view, state),
            std::mem::replace(&mut self.meta, meta),
            std::mem::replace(&mut self.layout, layout),
            std::mem::replace(&mut self.viewport, viewport),
            self.controller.clone(),
            self.highlight.take(),
            self.last_selection.take(),
            self.tooltip.take(),
        );
        self.controller.reset();

        if let Err(err) = self.redraw() {
            let (view, meta, layout, viewport, controller, highlight, selection, tooltip) =
                previous;
            self.view = view;
            self.meta = meta;
            self.layout = layout;
            self.viewport = viewport;
            self.controller = controller;
            self.highlight = highlight;
            self.last_selection = selection;
            self.tooltip = tooltip;
            self.dirty = true;
            return Err(err);
        }
        self.generation += 1;
        debug!(generation = self.generation, "view state replaced");
        Ok(())
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn interaction_state(&self) -> InteractionState {
        self.controller.state()
    }

    pub fn enable_labeling_mode(&mut self) {
        self.controller.set_labeling_mode(true);
    }

    pub fn disable_labeling_mode(&mut self) {
        self.controller.set_labeling_mode(false);
    }

    pub fn is_labeling(&self) -> bool {
        self.controller.labeling_enabled()
    }

    /// Annotation attached to labels drawn from now on.
    pub fn set_label_annotation(&mut self, text: impl Into<String>) {
        self.annotation = text.into();
    }

    /// Aborts the drag in progress, if any, without callbacks.
    pub fn cancel_gesture(&mut self) {
        self.controller.cancel();
        self.dirty = true;
    }

    pub fn handle_pointer(&mut self, event: PointerEvent) -> Vec<InteractionEvent> {
        let gestures = self.controller.handle(event, &self.layout);
        let mut events = Vec::with_capacity(gestures.len());
        for gesture in gestures {
            self.dirty = true;
            if let Some(event) = self.dispatch(gesture) {
                events.push(event);
            }
        }
        events
    }

    fn dispatch(&mut self, gesture: Gesture) -> Option<InteractionEvent> {
        match gesture {
            Gesture::Hover(cell) => {
                let info = self.cell_info(cell)?;
                let callbacks = &mut self.callbacks;
                let tooltip = isolate("on_hover", || callbacks.on_hover(&info)).flatten();
                self.tooltip = tooltip.clone();
                Some(InteractionEvent::Hover { info, tooltip })
            }
            Gesture::HoverEnd => {
                self.tooltip = None;
                Some(InteractionEvent::HoverEnd)
            }
            Gesture::DragUpdate(_) => None,
            Gesture::Selection(rect) => {
                let cells = self.selected_cells(&rect);
                self.last_selection = Some(rect);
                self.highlight = None;
                let callbacks = &mut self.callbacks;
                let response = isolate("on_selection", || callbacks.on_selection(&cells))
                    .unwrap_or_default();
                let highlighted = response == SelectionResponse::Highlight;
                if highlighted {
                    self.highlight = Some(rect);
                }
                Some(InteractionEvent::Selection {
                    rect,
                    cells: cells.len(),
                    highlighted,
                })
            }
            Gesture::Click(cell) => {
                let rect = match self.last_selection {
                    Some(sel) if sel.contains(cell) => sel,
                    _ => CellRect::single(cell),
                };
                let cells = self.selected_cells(&rect);
                let callbacks = &mut self.callbacks;
                isolate("on_click", || callbacks.on_click(&cells));
                Some(InteractionEvent::Click { cells })
            }
            Gesture::Label(rect) => {
                let label = self.labels.add_label(rect, self.annotation.clone());
                debug!(id = %label.id, "label drawn");
                Some(InteractionEvent::LabelCreated { label })
            }
        }
    }

    /// Hover payload for one cell, or `None` when it is outside the matrix.
    pub fn cell_info(&self, cell: CellCoord) -> Option<CellInfo> {
        let value = self.view.value(cell.row, cell.col)?;
        Some(CellInfo {
            row: cell.row,
            col: cell.col,
            x_label: self.view.cols.get(cell.col)?.to_string(),
            y_label: self.view.rows.get(cell.row)?.to_string(),
            row_meta: self.meta.row(cell.row).to_vec(),
            col_meta: self.meta.col(cell.col).to_vec(),
            value,
        })
    }

    /// Cells of `rect` in row-major order; cells outside the matrix are skipped.
    pub fn selected_cells(&self, rect: &CellRect) -> Vec<SelectedCell> {
        rect.cells()
            .filter_map(|cell| {
                Some(SelectedCell {
                    row: cell.row,
                    col: cell.col,
                    x_label: self.view.cols.get(cell.col)?.to_string(),
                    y_label: self.view.rows.get(cell.row)?.to_string(),
                    value: self.view.value(cell.row, cell.col)?,
                })
            })
            .collect()
    }

    /// Draws a persistent box around the smallest rectangle covering `cells`.
    pub fn highlight_bounding_box(&mut self, cells: &[SelectedCell]) {
        let Some(first) = cells.first() else {
            return;
        };
        let start = CellCoord::new(first.row, first.col);
        let rect = cells.iter().fold(CellRect::single(start), |acc, c| CellRect {
            start_row: acc.start_row.min(c.row),
            end_row: acc.end_row.max(c.row),
            start_col: acc.start_col.min(c.col),
            end_col: acc.end_col.max(c.col),
        });
        self.highlight = Some(rect);
        self.dirty = true;
    }

    pub fn highlight(&self) -> Option<CellRect> {
        self.highlight
    }

    pub fn last_selection(&self) -> Option<CellRect> {
        self.last_selection
    }

    pub fn clear_selection(&mut self) {
        self.highlight = None;
        self.last_selection = None;
        self.dirty = true;
    }

    pub fn tooltip(&self) -> Option<&str> {
        self.tooltip.as_deref()
    }

    pub fn labels(&self) -> &LabelStore {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut LabelStore {
        self.dirty = true;
        &mut self.labels
    }

    /// Adds a label programmatically. Bounds must be ordered and inside the matrix.
    pub fn add_label(&mut self, bounds: CellRect, annotation: impl Into<String>) -> Result<Label> {
        let rows = self.view.row_count();
        let cols = self.view.col_count();
        if !bounds.is_ordered() || bounds.end_row >= rows || bounds.end_col >= cols {
            return Err(HeatmapError::LabelBounds {
                id: "(new)".to_string(),
                start_row: bounds.start_row,
                end_row: bounds.end_row,
                start_col: bounds.start_col,
                end_col: bounds.end_col,
                rows,
                cols,
            });
        }
        self.dirty = true;
        Ok(self.labels.add_label(bounds, annotation))
    }

    /// Claims the save slot for the current labels. See `PendingSave::send`.
    pub fn begin_save_labels(&self) -> Result<PendingSave> {
        self.labels.begin_save(self.generation)
    }

    pub fn viewport(&self) -> Viewport {
        self.layout.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.relayout();
    }

    pub fn zoom_by(&mut self, factor: f64) {
        self.viewport.zoom_by(factor);
        self.relayout();
    }

    pub fn pan_by(&mut self, rows: isize, cols: isize) {
        self.viewport.pan_by(rows, cols);
        self.relayout();
    }

    pub fn reset_viewport(&mut self) {
        self.viewport.reset();
        self.relayout();
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    fn relayout(&mut self) {
        self.layout = GridLayout::compute(
            &self.view,
            &self.meta,
            &self.options,
            self.viewport,
            self.tree.is_some(),
        );
        // Keep the stored viewport in sync with what the layout clamped to.
        self.viewport = self.layout.viewport;
        if let Some(cursor) = self.pass.as_mut() {
            cursor.restart();
        }
        self.dirty = true;
    }

    /// True until a full frame reflecting the current state has been drawn.
    pub fn needs_redraw(&self) -> bool {
        self.dirty
    }

    fn redraw(&mut self) -> Result<()> {
        self.pass = Some(RenderCursor::new(usize::MAX));
        while self.render_step()? {}
        Ok(())
    }

    /// Current frame, redrawn first if anything changed. Finishes a
    /// progressive render already in flight.
    pub fn render(&mut self) -> Result<&RgbaImage> {
        if self.pass.is_some() {
            while self.render_step()? {}
        } else if self.dirty {
            self.redraw()?;
        }
        Ok(self.renderer.surface())
    }

    /// Starts a progressive render drawn `rows_per_step` rows at a time by
    /// `render_step`. Pointer input may be handled between steps; overlays
    /// are drawn last from the state current at that point.
    pub fn begin_render(&mut self, rows_per_step: usize) {
        self.pass = Some(RenderCursor::new(rows_per_step));
    }

    /// Advances the progressive render. Returns `true` while more remains.
    pub fn render_step(&mut self) -> Result<bool> {
        let Some(cursor) = self.pass.as_mut() else {
            return Ok(false);
        };
        let scene = RenderScene {
            view: &self.view,
            meta: &self.meta,
            colors: &self.colors,
            layout: &self.layout,
            options: &self.options,
            tree: self.tree.as_ref(),
            overlays: Overlays {
                labels: self.labels.labels(),
                highlight: self.highlight,
                preview: self.controller.preview(),
                hovered: self.controller.hovered(),
                tooltip: self.tooltip.as_deref(),
            },
        };
        match self.renderer.step(scene, cursor) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.pass = None;
                self.dirty = false;
                Ok(false)
            }
            Err(err) => {
                self.pass = None;
                Err(err)
            }
        }
    }

    /// Fraction of the progressive render done, if one is in flight.
    pub fn render_progress(&self) -> Option<f64> {
        self.pass.as_ref().map(|cursor| cursor.progress(&self.layout))
    }

    /// Last drawn frame, without redrawing.
    pub fn surface(&self) -> &RgbaImage {
        self.renderer.surface()
    }
}

impl<C: HeatmapCallbacks> std::fmt::Debug for Heatmap<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heatmap")
            .field("rows", &self.view.row_count())
            .field("cols", &self.view.col_count())
            .field("generation", &self.generation)
            .field("labels", &self.labels.len())
            .field("state", &self.controller.state())
            .finish()
    }
}
