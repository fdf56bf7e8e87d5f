//! Pixel layout of the grid: cell size, label strips, metadata band, tree
//! gutter, legend, and the viewport used for zoom/pan and hit-testing.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::dataset::{CellCoord, CellRect, Metadata, ViewState};
use crate::draw::{glyph_scale, GLYPH_PX};

const MARGIN: u32 = 4;
const TITLE_PX: u32 = GLYPH_PX + 4;
const LEGEND_PX: u32 = GLYPH_PX + 8;
/// Height of one column-metadata band.
pub const COL_META_BAND_PX: u32 = 8;
const MAX_STRIP_FRACTION: f64 = 0.25;
const MAX_ZOOM: f64 = 64.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutOptions {
    pub width: u32,
    pub height: u32,
    /// Upper bound on label text height in pixels.
    pub max_font_size: u32,
    /// Labels are hidden when cells are shorter than this.
    pub min_font_size: u32,
    /// Character index where `...` goes when a row label is too long.
    /// `None` truncates at the end.
    pub row_label_ellipsis_pos: Option<usize>,
    pub hide_col_meta: bool,
    pub tree_gutter_width: u32,
    pub show_legend: bool,
    pub show_version: bool,
    pub rows_label: Option<String>,
    pub cols_label: Option<String>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            max_font_size: 14,
            min_font_size: 8,
            row_label_ellipsis_pos: None,
            hide_col_meta: false,
            tree_gutter_width: 120,
            show_legend: true,
            show_version: false,
            rows_label: None,
            cols_label: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= f64::from(self.x)
            && y >= f64::from(self.y)
            && x < f64::from(self.x + self.w)
            && y < f64::from(self.y + self.h)
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }
}

/// Zoom factor over the fitted cell size plus the first visible row/col.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub zoom: f64,
    pub row_offset: usize,
    pub col_offset: usize,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            row_offset: 0,
            col_offset: 0,
        }
    }
}

impl Viewport {
    pub fn zoom_by(&mut self, factor: f64) {
        if factor.is_finite() && factor > 0.0 {
            self.zoom = (self.zoom * factor).clamp(1.0, MAX_ZOOM);
        }
    }

    pub fn pan_by(&mut self, rows: isize, cols: isize) {
        self.row_offset = self.row_offset.saturating_add_signed(rows);
        self.col_offset = self.col_offset.saturating_add_signed(cols);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Where everything goes for one render cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridLayout {
    pub width: u32,
    pub height: u32,
    pub cell_w: u32,
    pub cell_h: u32,
    /// Area covered by the visible cells.
    pub grid: PixelRect,
    pub visible_rows: Range<usize>,
    pub visible_cols: Range<usize>,
    /// Viewport after clamping to the data.
    pub viewport: Viewport,
    pub rows_title: Option<PixelRect>,
    pub cols_title: Option<PixelRect>,
    pub tree_gutter: Option<PixelRect>,
    pub row_labels: Option<PixelRect>,
    pub col_labels: Option<PixelRect>,
    pub col_meta: Option<PixelRect>,
    pub legend: Option<PixelRect>,
    pub row_font_px: u32,
    pub col_font_px: u32,
    pub row_label_chars: usize,
    pub col_label_chars: usize,
}

fn longest_label(labels: impl Iterator<Item = usize>) -> u32 {
    labels.max().unwrap_or(0) as u32
}

fn strip_extent(chars: u32, font_px: u32, span: u32) -> u32 {
    let wanted = chars * GLYPH_PX * glyph_scale(font_px) + MARGIN;
    let cap = (f64::from(span) * MAX_STRIP_FRACTION) as u32;
    wanted.min(cap)
}

fn fitted_cell(avail: u32, count: usize, zoom: f64) -> u32 {
    if count == 0 {
        return 1;
    }
    let fit = f64::from(avail) / count as f64;
    ((fit * zoom).floor() as u32).clamp(1, avail.max(1))
}

struct Strips {
    row_labels: bool,
    col_labels: bool,
}

impl GridLayout {
    pub fn compute(
        view: &ViewState,
        meta: &Metadata,
        options: &LayoutOptions,
        viewport: Viewport,
        with_tree: bool,
    ) -> GridLayout {
        let first = Self::compute_with(
            view,
            meta,
            options,
            viewport,
            with_tree,
            Strips {
                row_labels: true,
                col_labels: true,
            },
        );
        // Reclaim strips whose labels turned out too small to draw.
        let strips = Strips {
            row_labels: first.row_font_px >= options.min_font_size,
            col_labels: first.col_font_px >= options.min_font_size,
        };
        if strips.row_labels && strips.col_labels {
            return first;
        }
        let mut second = Self::compute_with(view, meta, options, viewport, with_tree, strips);
        if second.row_labels.is_none() {
            second.row_font_px = 0;
        }
        if second.col_labels.is_none() {
            second.col_font_px = 0;
        }
        second
    }

    fn compute_with(
        view: &ViewState,
        meta: &Metadata,
        options: &LayoutOptions,
        viewport: Viewport,
        with_tree: bool,
        strips: Strips,
    ) -> GridLayout {
        let width = options.width.max(1);
        let height = options.height.max(1);
        let rows = view.row_count();
        let cols = view.col_count();

        let mut left = MARGIN;
        let mut top = MARGIN;
        let mut right = width.saturating_sub(MARGIN);
        let mut bottom = height.saturating_sub(MARGIN);

        let legend = if options.show_legend && bottom > top + LEGEND_PX {
            bottom -= LEGEND_PX;
            Some(PixelRect::new(left, bottom, right.saturating_sub(left), LEGEND_PX))
        } else {
            None
        };

        let rows_title = options.rows_label.as_ref().map(|_| {
            let rect = PixelRect::new(left, top, TITLE_PX, bottom.saturating_sub(top));
            left += TITLE_PX;
            rect
        });
        let cols_title = options.cols_label.as_ref().map(|_| {
            let rect = PixelRect::new(left, top, right.saturating_sub(left), TITLE_PX);
            top += TITLE_PX;
            rect
        });

        let tree_gutter = if with_tree && options.tree_gutter_width > 0 {
            let w = options.tree_gutter_width.min(right.saturating_sub(left) / 2);
            let rect = PixelRect::new(left, top, w, bottom.saturating_sub(top));
            left += w;
            Some(rect)
        } else {
            None
        };

        let max_font = options.max_font_size.max(1);
        let row_strip_w = if strips.row_labels {
            strip_extent(
                longest_label(view.rows.iter().map(|r| r.to_string().chars().count())),
                max_font,
                width,
            )
        } else {
            0
        };
        right = right.saturating_sub(row_strip_w);

        let col_strip_h = if strips.col_labels {
            strip_extent(
                longest_label(view.cols.iter().map(|c| c.to_string().chars().count())),
                max_font,
                height,
            )
        } else {
            0
        };
        let col_labels_rect = (col_strip_h > 0).then(|| {
            let rect = PixelRect::new(left, top, right.saturating_sub(left), col_strip_h);
            top += col_strip_h;
            rect
        });

        let meta_bands = meta.col_meta.iter().map(Vec::len).max().unwrap_or(0) as u32;
        let col_meta = if !options.hide_col_meta && meta.has_col_meta() && meta_bands > 0 {
            let h = meta_bands * COL_META_BAND_PX;
            let rect = PixelRect::new(left, top, right.saturating_sub(left), h);
            top += h + 1;
            Some(rect)
        } else {
            None
        };

        let avail_w = right.saturating_sub(left).max(1);
        let avail_h = bottom.saturating_sub(top).max(1);
        let zoom = viewport.zoom.clamp(1.0, MAX_ZOOM);
        let cell_w = fitted_cell(avail_w, cols, zoom);
        let cell_h = fitted_cell(avail_h, rows, zoom);

        let fit_cols = ((avail_w / cell_w) as usize).min(cols);
        let fit_rows = ((avail_h / cell_h) as usize).min(rows);
        let col_offset = viewport.col_offset.min(cols.saturating_sub(fit_cols));
        let row_offset = viewport.row_offset.min(rows.saturating_sub(fit_rows));
        let visible_cols = col_offset..col_offset + fit_cols;
        let visible_rows = row_offset..row_offset + fit_rows;

        let grid = PixelRect::new(left, top, fit_cols as u32 * cell_w, fit_rows as u32 * cell_h);

        let row_labels = (row_strip_w > 0).then(|| {
            PixelRect::new(grid.right() + 2, grid.y, row_strip_w.saturating_sub(2), grid.h)
        });
        let col_labels = col_labels_rect.map(|r| PixelRect::new(grid.x, r.y, grid.w, r.h));
        let col_meta = col_meta.map(|r| PixelRect::new(grid.x, r.y, grid.w, r.h));
        let tree_gutter = tree_gutter.map(|r| PixelRect::new(r.x, grid.y, r.w, grid.h));

        let row_font_px = cell_h.min(max_font);
        let col_font_px = cell_w.min(max_font);
        let row_label_chars = row_labels
            .map(|r| (r.w / (GLYPH_PX * glyph_scale(row_font_px))) as usize)
            .unwrap_or(0);
        let col_label_chars = col_labels
            .map(|r| (r.h.saturating_sub(MARGIN) / (GLYPH_PX * glyph_scale(col_font_px))) as usize)
            .unwrap_or(0);

        GridLayout {
            width,
            height,
            cell_w,
            cell_h,
            grid,
            visible_rows,
            visible_cols,
            viewport: Viewport {
                zoom,
                row_offset,
                col_offset,
            },
            rows_title,
            cols_title,
            tree_gutter,
            row_labels,
            col_labels,
            col_meta,
            legend,
            row_font_px,
            col_font_px,
            row_label_chars,
            col_label_chars,
        }
    }

    /// Cell under a surface point, if it lies on a visible cell.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<CellCoord> {
        if !self.grid.contains(x, y) {
            return None;
        }
        let col = ((x - f64::from(self.grid.x)) / f64::from(self.cell_w)) as usize;
        let row = ((y - f64::from(self.grid.y)) / f64::from(self.cell_h)) as usize;
        Some(CellCoord::new(
            self.visible_rows.start + row,
            self.visible_cols.start + col,
        ))
    }

    /// Nearest visible cell to a point, used when a drag ends off-grid.
    pub fn clamp_to_grid(&self, x: f64, y: f64) -> Option<CellCoord> {
        if self.visible_rows.is_empty() || self.visible_cols.is_empty() {
            return None;
        }
        let max_x = f64::from(self.grid.right()) - 0.5;
        let max_y = f64::from(self.grid.bottom()) - 0.5;
        let cx = x.clamp(f64::from(self.grid.x), max_x);
        let cy = y.clamp(f64::from(self.grid.y), max_y);
        self.hit_test(cx, cy)
    }

    /// Pixel box of a cell rectangle, clipped to the visible window.
    pub fn rect_pixels(&self, rect: &CellRect) -> Option<PixelRect> {
        let r0 = rect.start_row.max(self.visible_rows.start);
        let r1 = rect.end_row.min(self.visible_rows.end.checked_sub(1)?);
        let c0 = rect.start_col.max(self.visible_cols.start);
        let c1 = rect.end_col.min(self.visible_cols.end.checked_sub(1)?);
        if r0 > r1 || c0 > c1 {
            return None;
        }
        let x = self.grid.x + (c0 - self.visible_cols.start) as u32 * self.cell_w;
        let y = self.grid.y + (r0 - self.visible_rows.start) as u32 * self.cell_h;
        Some(PixelRect::new(
            x,
            y,
            (c1 - c0 + 1) as u32 * self.cell_w,
            (r1 - r0 + 1) as u32 * self.cell_h,
        ))
    }

    /// Vertical centers of the visible rows, handed to the tree overlay.
    pub fn row_centers(&self) -> Vec<(usize, u32)> {
        self.visible_rows
            .clone()
            .enumerate()
            .map(|(i, row)| (row, self.grid.y + i as u32 * self.cell_h + self.cell_h / 2))
            .collect()
    }
}

/// Shortens `text` to `max_chars`, putting `...` after `ellipsis_pos`
/// leading characters and keeping as much of the tail as fits.
pub fn truncate_label(text: &str, max_chars: usize, ellipsis_pos: Option<usize>) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return chars[..max_chars].iter().collect();
    }
    let keep = max_chars - 3;
    let head = ellipsis_pos.unwrap_or(keep).min(keep);
    let tail = keep - head;
    let mut out: String = chars[..head].iter().collect();
    out.push_str("...");
    out.extend(&chars[chars.len() - tail..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::AxisLabel;

    fn view(rows: usize, cols: usize) -> ViewState {
        ViewState::new(
            (0..rows).map(|r| AxisLabel::text(format!("r{r}"))).collect(),
            (0..cols).map(|c| AxisLabel::text(format!("c{c}"))).collect(),
            vec![vec![0.0; cols]; rows],
        )
    }

    fn plain_options() -> LayoutOptions {
        LayoutOptions {
            width: 400,
            height: 300,
            show_legend: false,
            ..LayoutOptions::default()
        }
    }

    #[test]
    fn cells_fill_the_available_area() {
        let layout = GridLayout::compute(
            &view(10, 20),
            &Metadata::default(),
            &plain_options(),
            Viewport::default(),
            false,
        );
        assert!(layout.cell_w >= 1 && layout.cell_h >= 1);
        assert_eq!(layout.visible_rows, 0..10);
        assert_eq!(layout.visible_cols, 0..20);
        assert!(layout.grid.right() <= 400);
        assert!(layout.grid.bottom() <= 300);
        assert!(layout.row_font_px <= 14);
        assert!(layout.tree_gutter.is_none());
    }

    #[test]
    fn hit_test_maps_pixels_to_cells() {
        let layout = GridLayout::compute(
            &view(4, 5),
            &Metadata::default(),
            &plain_options(),
            Viewport::default(),
            false,
        );
        let g = layout.grid;
        let x = f64::from(g.x + 2 * layout.cell_w + 1);
        let y = f64::from(g.y + 3 * layout.cell_h + 1);
        assert_eq!(layout.hit_test(x, y), Some(CellCoord::new(3, 2)));
        assert_eq!(layout.hit_test(f64::from(g.right()) + 1.0, y), None);
        assert_eq!(
            layout.clamp_to_grid(f64::from(g.right()) + 50.0, -10.0),
            Some(CellCoord::new(0, 4))
        );
    }

    #[test]
    fn zoom_and_pan_shift_the_visible_window() {
        let data = view(10, 500);
        let mut viewport = Viewport::default();
        viewport.zoom_by(8.0);
        viewport.pan_by(0, 100);
        let layout =
            GridLayout::compute(&data, &Metadata::default(), &plain_options(), viewport, false);
        assert!(layout.visible_cols.len() < 500);
        assert_eq!(layout.visible_cols.start, 100);
        let g = layout.grid;
        let hit = layout.hit_test(f64::from(g.x), f64::from(g.y)).unwrap();
        assert_eq!(hit, CellCoord::new(layout.visible_rows.start, 100));

        viewport.pan_by(0, 10_000);
        let clamped =
            GridLayout::compute(&data, &Metadata::default(), &plain_options(), viewport, false);
        assert_eq!(clamped.visible_cols.end, 500);
    }

    #[test]
    fn tiny_cells_drop_their_label_strip() {
        let layout = GridLayout::compute(
            &view(200, 3),
            &Metadata::default(),
            &plain_options(),
            Viewport::default(),
            false,
        );
        assert!(layout.cell_h < 8);
        assert!(layout.row_labels.is_none());
        assert_eq!(layout.row_font_px, 0);
        assert!(layout.col_labels.is_some());
    }

    #[test]
    fn tree_gutter_and_col_meta_are_reserved_on_demand() {
        let data = view(5, 5);
        let meta = Metadata {
            row_meta: Vec::new(),
            col_meta: vec![vec![Some("a".into())]; 5],
        };
        let layout = GridLayout::compute(&data, &meta, &plain_options(), Viewport::default(), true);
        let gutter = layout.tree_gutter.unwrap();
        assert!(gutter.right() <= layout.grid.x);
        assert!(layout.col_meta.is_some());

        let hidden = LayoutOptions {
            hide_col_meta: true,
            ..plain_options()
        };
        let layout = GridLayout::compute(&data, &meta, &hidden, Viewport::default(), false);
        assert!(layout.col_meta.is_none());
        assert!(layout.tree_gutter.is_none());
    }

    #[test]
    fn truncation_places_the_ellipsis() {
        assert_eq!(truncate_label("short", 10, None), "short");
        assert_eq!(truncate_label("abcdefghij", 8, None), "abcde...");
        assert_eq!(truncate_label("abcdefghij", 8, Some(1)), "a...ghij");
        assert_eq!(truncate_label("abcdefghij", 8, Some(0)), "...fghij");
        assert_eq!(truncate_label("abcdefghij", 3, Some(1)), "abc");
    }

    #[test]
    fn rect_pixels_clip_to_visible_window() {
        let layout = GridLayout::compute(
            &view(4, 4),
            &Metadata::default(),
            &plain_options(),
            Viewport::default(),
            false,
        );
        let rect = CellRect {
            start_row: 1,
            end_row: 2,
            start_col: 0,
            end_col: 3,
        };
        let px = layout.rect_pixels(&rect).unwrap();
        assert_eq!(px.x, layout.grid.x);
        assert_eq!(px.w, 4 * layout.cell_w);
        assert_eq!(px.h, 2 * layout.cell_h);
    }
}
