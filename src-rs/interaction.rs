//! Pointer-event state machine: hover, drag selection, click and labeling
//! mode. The controller only decides what a gesture means; the `Heatmap`
//! facade turns those decisions into callbacks and label-store entries.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{CellCoord, CellRect};
use crate::labels::Label;
use crate::layout::GridLayout;

/// Pointer travel (in pixels) below which a down/up pair is a click.
pub const CLICK_SLOP_PX: f64 = 3.0;

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InteractionState {
    Idle,
    Hovering,
    Selecting,
    LabelingIdle,
    LabelingDrawing,
}

/// Surface-space pointer input, as the host receives it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PointerEvent {
    Down { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Up { x: f64, y: f64 },
    Leave,
}

/// What a pointer event meant, before any callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Hover(CellCoord),
    HoverEnd,
    DragUpdate(CellRect),
    Selection(CellRect),
    Label(CellRect),
    Click(CellCoord),
}

/// The provisional rectangle of a drag in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragPreview {
    pub rect: CellRect,
    pub labeling: bool,
}

/// Everything the hover callback gets to see about one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellInfo {
    pub row: usize,
    pub col: usize,
    /// Column label.
    pub x_label: String,
    /// Row label.
    pub y_label: String,
    pub row_meta: Vec<Option<String>>,
    pub col_meta: Vec<Option<String>>,
    pub value: f64,
}

/// One entry of a selection or click payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedCell {
    pub row: usize,
    pub col: usize,
    pub x_label: String,
    pub y_label: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionResponse {
    #[default]
    Keep,
    /// Draw a bounding box around the selection until the next one.
    Highlight,
}

/// Host hooks. Errors and panics raised here are logged and swallowed so
/// the grid stays interactive.
pub trait HeatmapCallbacks {
    /// Returned text becomes the tooltip for the hovered cell.
    fn on_hover(&mut self, _info: &CellInfo) -> Result<Option<String>, CallbackError> {
        Ok(None)
    }

    fn on_selection(
        &mut self,
        _cells: &[SelectedCell],
    ) -> Result<SelectionResponse, CallbackError> {
        Ok(SelectionResponse::Keep)
    }

    fn on_click(&mut self, _cells: &[SelectedCell]) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Callbacks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl HeatmapCallbacks for NoCallbacks {}

/// Events reported back to the host after callbacks ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InteractionEvent {
    Hover {
        info: CellInfo,
        tooltip: Option<String>,
    },
    HoverEnd,
    Selection {
        rect: CellRect,
        cells: usize,
        highlighted: bool,
    },
    Click {
        cells: Vec<SelectedCell>,
    },
    LabelCreated {
        label: Label,
    },
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    origin_px: (f64, f64),
    origin: CellCoord,
    current: CellCoord,
    past_slop: bool,
    labeling: bool,
}

impl Drag {
    fn rect(&self) -> CellRect {
        CellRect::spanning(self.origin, self.current)
    }

    fn track(&mut self, x: f64, y: f64) {
        let dx = x - self.origin_px.0;
        let dy = y - self.origin_px.1;
        if (dx * dx + dy * dy).sqrt() > CLICK_SLOP_PX {
            self.past_slop = true;
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct InteractionController {
    labeling: bool,
    /// Mode change requested mid-gesture; applied when the gesture ends.
    pending_mode: Option<bool>,
    drag: Option<Drag>,
    hovered: Option<CellCoord>,
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InteractionState {
        match (&self.drag, self.labeling) {
            (Some(drag), _) if drag.labeling => InteractionState::LabelingDrawing,
            (Some(_), _) => InteractionState::Selecting,
            (None, true) => InteractionState::LabelingIdle,
            (None, false) if self.hovered.is_some() => InteractionState::Hovering,
            (None, false) => InteractionState::Idle,
        }
    }

    /// Requested labeling mode, including a change deferred until the
    /// current drag ends.
    pub fn labeling_enabled(&self) -> bool {
        self.pending_mode.unwrap_or(self.labeling)
    }

    pub fn set_labeling_mode(&mut self, enabled: bool) {
        if self.drag.is_some() {
            debug!(enabled, "labeling mode change deferred until gesture ends");
            self.pending_mode = Some(enabled);
        } else {
            self.labeling = enabled;
            self.pending_mode = None;
        }
    }

    pub fn hovered(&self) -> Option<CellCoord> {
        self.hovered
    }

    pub fn preview(&self) -> Option<DragPreview> {
        self.drag.filter(|d| d.past_slop || d.current != d.origin).map(|d| DragPreview {
            rect: d.rect(),
            labeling: d.labeling,
        })
    }

    /// Aborts a drag without reporting anything.
    pub fn cancel(&mut self) {
        self.drag = None;
        self.apply_pending_mode();
    }

    /// Forget all transient state; used when the view is replaced.
    pub fn reset(&mut self) {
        self.drag = None;
        self.hovered = None;
        self.apply_pending_mode();
    }

    fn apply_pending_mode(&mut self) {
        if let Some(mode) = self.pending_mode.take() {
            self.labeling = mode;
        }
    }

    fn update_hover(&mut self, cell: Option<CellCoord>, out: &mut Vec<Gesture>) {
        if cell == self.hovered {
            return;
        }
        self.hovered = cell;
        out.push(match cell {
            Some(c) => Gesture::Hover(c),
            None => Gesture::HoverEnd,
        });
    }

    pub fn handle(&mut self, event: PointerEvent, layout: &GridLayout) -> Vec<Gesture> {
        let mut out = Vec::new();
        match event {
            PointerEvent::Down { x, y } => {
                let cell = layout.hit_test(x, y);
                self.update_hover(cell, &mut out);
                // A down without a matching up leaves a stale drag behind; replace it.
                self.drag = cell.map(|origin| Drag {
                    origin_px: (x, y),
                    origin,
                    current: origin,
                    past_slop: false,
                    labeling: self.labeling,
                });
            }
            PointerEvent::Move { x, y } => {
                self.update_hover(layout.hit_test(x, y), &mut out);
                if let Some(drag) = self.drag.as_mut() {
                    drag.track(x, y);
                    let cell = layout.clamp_to_grid(x, y).unwrap_or(drag.current);
                    if cell != drag.current {
                        drag.current = cell;
                        out.push(Gesture::DragUpdate(drag.rect()));
                    }
                }
            }
            PointerEvent::Up { x, y } => {
                if let Some(mut drag) = self.drag.take() {
                    drag.track(x, y);
                    drag.current = layout.clamp_to_grid(x, y).unwrap_or(drag.current);
                    if !drag.past_slop || drag.current == drag.origin {
                        out.push(Gesture::Click(drag.origin));
                    } else if drag.labeling {
                        out.push(Gesture::Label(drag.rect()));
                    } else {
                        out.push(Gesture::Selection(drag.rect()));
                    }
                    self.apply_pending_mode();
                }
            }
            PointerEvent::Leave => {
                self.update_hover(None, &mut out);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AxisLabel, Metadata, ViewState};
    use crate::layout::{LayoutOptions, Viewport};

    fn layout() -> GridLayout {
        let view = ViewState::new(
            (0..6).map(|r| AxisLabel::text(format!("r{r}"))).collect(),
            (0..8).map(|c| AxisLabel::text(format!("c{c}"))).collect(),
            vec![vec![0.0; 8]; 6],
        );
        let options = LayoutOptions {
            width: 400,
            height: 300,
            show_legend: false,
            ..LayoutOptions::default()
        };
        GridLayout::compute(&view, &Metadata::default(), &options, Viewport::default(), false)
    }

    fn center(layout: &GridLayout, row: usize, col: usize) -> (f64, f64) {
        (
            f64::from(layout.grid.x + col as u32 * layout.cell_w + layout.cell_w / 2),
            f64::from(layout.grid.y + row as u32 * layout.cell_h + layout.cell_h / 2),
        )
    }

    fn drag(
        ctl: &mut InteractionController,
        layout: &GridLayout,
        from: (usize, usize),
        to: (usize, usize),
    ) -> Vec<Gesture> {
        let (x0, y0) = center(layout, from.0, from.1);
        let (x1, y1) = center(layout, to.0, to.1);
        let mut out = ctl.handle(PointerEvent::Down { x: x0, y: y0 }, layout);
        out.extend(ctl.handle(PointerEvent::Move { x: x1, y: y1 }, layout));
        out.extend(ctl.handle(PointerEvent::Up { x: x1, y: y1 }, layout));
        out
    }

    fn last_final(gestures: &[Gesture]) -> Gesture {
        *gestures
            .iter()
            .rev()
            .find(|g| matches!(g, Gesture::Selection(_) | Gesture::Label(_) | Gesture::Click(_)))
            .unwrap()
    }

    #[test]
    fn hover_enters_and_leaves() {
        let layout = layout();
        let mut ctl = InteractionController::new();
        assert_eq!(ctl.state(), InteractionState::Idle);
        let (x, y) = center(&layout, 2, 3);
        let out = ctl.handle(PointerEvent::Move { x, y }, &layout);
        assert_eq!(out, vec![Gesture::Hover(CellCoord::new(2, 3))]);
        assert_eq!(ctl.state(), InteractionState::Hovering);
        // Same cell again: no repeat.
        assert!(ctl.handle(PointerEvent::Move { x: x + 1.0, y }, &layout).is_empty());
        assert_eq!(ctl.handle(PointerEvent::Leave, &layout), vec![Gesture::HoverEnd]);
        assert_eq!(ctl.state(), InteractionState::Idle);
    }

    #[test]
    fn reverse_drags_select_the_same_rectangle() {
        let layout = layout();
        let mut ctl = InteractionController::new();
        let forward = last_final(&drag(&mut ctl, &layout, (1, 1), (3, 4)));
        let backward = last_final(&drag(&mut ctl, &layout, (3, 4), (1, 1)));
        assert_eq!(forward, backward);
        let Gesture::Selection(rect) = forward else {
            panic!("expected a selection, got {forward:?}");
        };
        assert_eq!(
            rect,
            CellRect {
                start_row: 1,
                end_row: 3,
                start_col: 1,
                end_col: 4
            }
        );
    }

    #[test]
    fn zero_movement_is_a_click_in_both_modes() {
        let layout = layout();
        for labeling in [false, true] {
            let mut ctl = InteractionController::new();
            ctl.set_labeling_mode(labeling);
            let (x, y) = center(&layout, 4, 5);
            ctl.handle(PointerEvent::Down { x, y }, &layout);
            let out = ctl.handle(PointerEvent::Up { x, y }, &layout);
            assert_eq!(out, vec![Gesture::Click(CellCoord::new(4, 5))]);
        }
    }

    #[test]
    fn jitter_within_one_cell_is_still_a_click() {
        let layout = layout();
        let mut ctl = InteractionController::new();
        let (x, y) = center(&layout, 0, 0);
        ctl.handle(PointerEvent::Down { x, y }, &layout);
        ctl.handle(PointerEvent::Move { x: x + 1.0, y: y + 1.0 }, &layout);
        let out = ctl.handle(PointerEvent::Up { x: x + 1.0, y: y + 1.0 }, &layout);
        assert_eq!(out, vec![Gesture::Click(CellCoord::new(0, 0))]);
    }

    #[test]
    fn labeling_mode_turns_drags_into_labels() {
        let layout = layout();
        let mut ctl = InteractionController::new();
        ctl.set_labeling_mode(true);
        assert_eq!(ctl.state(), InteractionState::LabelingIdle);
        let out = drag(&mut ctl, &layout, (0, 0), (2, 2));
        assert!(matches!(last_final(&out), Gesture::Label(_)));
        assert!(!out.iter().any(|g| matches!(g, Gesture::Selection(_))));

        ctl.set_labeling_mode(false);
        let out = drag(&mut ctl, &layout, (0, 0), (2, 2));
        assert!(matches!(last_final(&out), Gesture::Selection(_)));
    }

    #[test]
    fn mode_toggle_mid_drag_waits_for_the_gesture_to_end() {
        let layout = layout();
        let mut ctl = InteractionController::new();
        let (x0, y0) = center(&layout, 0, 0);
        let (x1, y1) = center(&layout, 2, 2);
        ctl.handle(PointerEvent::Down { x: x0, y: y0 }, &layout);
        ctl.set_labeling_mode(true);
        assert!(ctl.labeling_enabled());
        assert_eq!(ctl.state(), InteractionState::Selecting);
        ctl.handle(PointerEvent::Move { x: x1, y: y1 }, &layout);
        let out = ctl.handle(PointerEvent::Up { x: x1, y: y1 }, &layout);
        assert!(matches!(out.last(), Some(Gesture::Selection(_))));
        assert_eq!(ctl.state(), InteractionState::LabelingIdle);
    }

    #[test]
    fn release_off_grid_clamps_to_the_edge() {
        let layout = layout();
        let mut ctl = InteractionController::new();
        let (x0, y0) = center(&layout, 1, 1);
        ctl.handle(PointerEvent::Down { x: x0, y: y0 }, &layout);
        let far_x = f64::from(layout.grid.right()) + 40.0;
        let far_y = f64::from(layout.grid.bottom()) + 40.0;
        ctl.handle(PointerEvent::Move { x: far_x, y: far_y }, &layout);
        let out = ctl.handle(PointerEvent::Up { x: far_x, y: far_y }, &layout);
        assert_eq!(
            out.last(),
            Some(&Gesture::Selection(CellRect {
                start_row: 1,
                end_row: 5,
                start_col: 1,
                end_col: 7
            }))
        );
    }

    #[test]
    fn cancel_and_reset_drop_the_drag() {
        let layout = layout();
        let mut ctl = InteractionController::new();
        let (x0, y0) = center(&layout, 1, 1);
        let (x1, y1) = center(&layout, 3, 3);
        ctl.handle(PointerEvent::Down { x: x0, y: y0 }, &layout);
        ctl.handle(PointerEvent::Move { x: x1, y: y1 }, &layout);
        assert!(ctl.preview().is_some());
        ctl.cancel();
        assert!(ctl.preview().is_none());
        assert!(ctl.handle(PointerEvent::Up { x: x1, y: y1 }, &layout).is_empty());

        ctl.handle(PointerEvent::Down { x: x0, y: y0 }, &layout);
        ctl.reset();
        assert_eq!(ctl.state(), InteractionState::Idle);
        assert!(ctl.hovered().is_none());
    }
}
