//! Draws a `GridLayout` onto an owned RGBA surface. Rendering can run in one
//! go or as a `RenderPass` stepped a few rows at a time so large matrices
//! do not block the host for a whole frame.

use image::{Rgba, RgbaImage};
use tracing::trace;

use crate::color::{Color, ColorSpec};
use crate::dataset::{CellCoord, CellRect, Metadata, ViewState};
use crate::draw::{
    draw_rect_outline, draw_text, draw_text_outlined, draw_text_vertical, fill_rect,
    fill_rect_alpha, glyph_scale, text_width, GLYPH_PX,
};
use crate::error::Result;
use crate::interaction::DragPreview;
use crate::labels::Label;
use crate::layout::{truncate_label, GridLayout, LayoutOptions, PixelRect, COL_META_BAND_PX};
use crate::tree::TreeAnnotation;

const BACKGROUND: Color = Color::WHITE;
const TEXT: Color = Color([40, 40, 40, 255]);
const LABEL_COLOR: Color = Color([255, 140, 0, 255]);
const SELECT_COLOR: Color = Color([0, 120, 255, 255]);
const MISSING_META: Color = Color([225, 225, 225, 255]);
const META_PALETTE: [Color; 10] = [
    Color([31, 119, 180, 255]),
    Color([255, 127, 14, 255]),
    Color([44, 160, 44, 255]),
    Color([214, 39, 40, 255]),
    Color([148, 103, 189, 255]),
    Color([140, 86, 75, 255]),
    Color([227, 119, 194, 255]),
    Color([127, 127, 127, 255]),
    Color([188, 189, 34, 255]),
    Color([23, 190, 207, 255]),
];

/// Stable categorical color for a metadata value.
pub fn meta_color(value: Option<&str>) -> Color {
    let Some(value) = value else {
        return MISSING_META;
    };
    // FNV-1a
    let hash = value
        .bytes()
        .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    META_PALETTE[hash as usize % META_PALETTE.len()]
}

/// Transient state drawn on top of the cells.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overlays<'a> {
    pub labels: &'a [Label],
    pub highlight: Option<CellRect>,
    pub preview: Option<DragPreview>,
    pub hovered: Option<CellCoord>,
    pub tooltip: Option<&'a str>,
}

/// Everything one frame needs, borrowed from the engine.
#[derive(Clone, Copy)]
pub struct RenderScene<'a> {
    pub view: &'a ViewState,
    pub meta: &'a Metadata,
    pub colors: &'a ColorSpec,
    pub layout: &'a GridLayout,
    pub options: &'a LayoutOptions,
    pub tree: Option<&'a TreeAnnotation>,
    pub overlays: Overlays<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Chrome,
    Cells { next: usize },
    Overlays,
    Done,
}

/// Position of a progressive render. Holds no borrows, so the owner can
/// handle input between steps and resume with a fresh scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderCursor {
    stage: Stage,
    rows_per_step: usize,
}

impl RenderCursor {
    pub fn new(rows_per_step: usize) -> Self {
        Self {
            stage: Stage::Chrome,
            rows_per_step: rows_per_step.max(1),
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Start over; needed when the layout changed under a pass.
    pub fn restart(&mut self) {
        self.stage = Stage::Chrome;
    }

    /// Fraction of visible rows already drawn.
    pub fn progress(&self, layout: &GridLayout) -> f64 {
        let total = layout.visible_rows.len();
        match self.stage {
            Stage::Chrome => 0.0,
            Stage::Cells { next } if total > 0 => {
                (next - layout.visible_rows.start) as f64 / total as f64
            }
            Stage::Cells { .. } | Stage::Overlays | Stage::Done => 1.0,
        }
    }
}

/// Owns the drawing surface.
#[derive(Debug, Clone)]
pub struct GridRenderer {
    surface: RgbaImage,
}

impl GridRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: RgbaImage::from_pixel(width.max(1), height.max(1), BACKGROUND.to_rgba()),
        }
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    /// Does one unit of work for `cursor`: chrome, at most `rows_per_step`
    /// rows of cells, or the overlays. Returns `true` while more remains.
    pub fn step(&mut self, scene: RenderScene<'_>, cursor: &mut RenderCursor) -> Result<bool> {
        let layout = scene.layout;
        let mut painter = Painter {
            surface: &mut self.surface,
            scene,
        };
        match cursor.stage {
            Stage::Chrome => {
                painter.draw_chrome();
                cursor.stage = Stage::Cells {
                    next: layout.visible_rows.start,
                };
            }
            Stage::Cells { next } => {
                let end = next
                    .saturating_add(cursor.rows_per_step)
                    .min(layout.visible_rows.end);
                painter.draw_cells(next..end)?;
                trace!(from = next, to = end, "rendered cell rows");
                cursor.stage = if end >= layout.visible_rows.end {
                    Stage::Overlays
                } else {
                    Stage::Cells { next: end }
                };
            }
            Stage::Overlays => {
                painter.draw_overlays();
                cursor.stage = Stage::Done;
            }
            Stage::Done => {}
        }
        Ok(!cursor.is_done())
    }

    /// Starts a progressive render against a fixed scene.
    pub fn begin<'s>(&'s mut self, scene: RenderScene<'s>, rows_per_step: usize) -> RenderPass<'s> {
        RenderPass {
            renderer: self,
            scene,
            cursor: RenderCursor::new(rows_per_step),
        }
    }

    pub fn render_all(&mut self, scene: RenderScene<'_>) -> Result<()> {
        let mut cursor = RenderCursor::new(usize::MAX);
        while self.step(scene, &mut cursor)? {}
        Ok(())
    }
}

/// A progressive render bound to one scene.
pub struct RenderPass<'s> {
    renderer: &'s mut GridRenderer,
    scene: RenderScene<'s>,
    cursor: RenderCursor,
}

impl RenderPass<'_> {
    pub fn is_done(&self) -> bool {
        self.cursor.is_done()
    }

    pub fn progress(&self) -> f64 {
        self.cursor.progress(self.scene.layout)
    }

    pub fn step(&mut self) -> Result<bool> {
        self.renderer.step(self.scene, &mut self.cursor)
    }

    pub fn finish(mut self) -> Result<()> {
        while self.step()? {}
        Ok(())
    }
}

struct Painter<'s> {
    surface: &'s mut RgbaImage,
    scene: RenderScene<'s>,
}

impl Painter<'_> {
    fn draw_chrome(&mut self) {
        let scene = self.scene;
        let layout = scene.layout;
        if self.surface.dimensions() != (layout.width, layout.height) {
            *self.surface = RgbaImage::new(layout.width, layout.height);
        }
        let bg: Rgba<u8> = BACKGROUND.to_rgba();
        for px in self.surface.pixels_mut() {
            *px = bg;
        }

        let options = scene.options;
        if let (Some(rect), Some(title)) = (layout.rows_title, options.rows_label.as_deref()) {
            let w = text_width(title, 1).min(rect.h) as i32;
            let y = rect.y as i32 + rect.h as i32 / 2 + w / 2;
            draw_text_vertical(self.surface, rect.x as i32 + 2, y, title, TEXT, 1);
        }
        if let (Some(rect), Some(title)) = (layout.cols_title, options.cols_label.as_deref()) {
            let w = text_width(title, 1) as i32;
            let x = layout.grid.x as i32 + layout.grid.w as i32 / 2 - w / 2;
            draw_text(self.surface, x.max(rect.x as i32), rect.y as i32 + 2, title, TEXT, 1);
        }

        self.draw_row_labels();
        self.draw_col_labels();
        self.draw_col_meta();

        if let (Some(tree), Some(gutter)) = (scene.tree, layout.tree_gutter) {
            tree.draw(self.surface, gutter, &layout.row_centers());
        }
        if let Some(legend) = layout.legend {
            self.draw_legend(legend);
        }
    }

    fn draw_row_labels(&mut self) {
        let scene = self.scene;
        let layout = scene.layout;
        let Some(strip) = layout.row_labels else {
            return;
        };
        let scale = glyph_scale(layout.row_font_px);
        let glyph_h = GLYPH_PX * scale;
        for (row, center) in layout.row_centers() {
            let Some(label) = scene.view.rows.get(row) else {
                continue;
            };
            let text = truncate_label(
                &label.to_string(),
                layout.row_label_chars,
                scene.options.row_label_ellipsis_pos,
            );
            let y = center as i32 - glyph_h as i32 / 2;
            draw_text(self.surface, strip.x as i32, y, &text, TEXT, scale);
        }
    }

    fn draw_col_labels(&mut self) {
        let scene = self.scene;
        let layout = scene.layout;
        let Some(strip) = layout.col_labels else {
            return;
        };
        let scale = glyph_scale(layout.col_font_px);
        let glyph_w = (GLYPH_PX * scale) as i32;
        for (i, col) in layout.visible_cols.clone().enumerate() {
            let Some(label) = scene.view.cols.get(col) else {
                continue;
            };
            let text = truncate_label(&label.to_string(), layout.col_label_chars, None);
            let x = (layout.grid.x + i as u32 * layout.cell_w) as i32
                + (layout.cell_w as i32 - glyph_w) / 2;
            let y = strip.bottom() as i32 - 2;
            draw_text_vertical(self.surface, x, y, &text, TEXT, scale);
        }
    }

    fn draw_col_meta(&mut self) {
        let scene = self.scene;
        let layout = scene.layout;
        let Some(band) = layout.col_meta else {
            return;
        };
        for (i, col) in layout.visible_cols.clone().enumerate() {
            let x = layout.grid.x + i as u32 * layout.cell_w;
            for (k, value) in scene.meta.col(col).iter().enumerate() {
                let y = band.y + k as u32 * COL_META_BAND_PX;
                let color = meta_color(value.as_deref());
                fill_rect(self.surface, x, y, layout.cell_w, COL_META_BAND_PX - 1, color);
            }
        }
    }

    fn draw_legend(&mut self, legend: PixelRect) {
        let scene = self.scene;
        let swatch = GLYPH_PX;
        let text_y = legend.y as i32 + (legend.h as i32 - GLYPH_PX as i32) / 2;
        let mut x = legend.x;
        for (text, color) in scene.colors.legend_entries() {
            let needed = swatch + 4 + text_width(&text, 1) + 12;
            if x + needed > legend.right() {
                break;
            }
            fill_rect(self.surface, x, text_y as u32, swatch, swatch, color);
            draw_rect_outline(self.surface, x, text_y as u32, swatch, swatch, TEXT, 1);
            draw_text(self.surface, (x + swatch + 4) as i32, text_y, &text, TEXT, 1);
            x += needed;
        }
        if scene.options.show_version {
            let version = format!("hotmap v{}", env!("CARGO_PKG_VERSION"));
            let w = text_width(&version, 1);
            if legend.right() >= w && legend.right() - w > x {
                draw_text(self.surface, (legend.right() - w) as i32, text_y, &version, TEXT, 1);
            }
        }
    }

    fn draw_cells(&mut self, rows: std::ops::Range<usize>) -> Result<()> {
        let scene = self.scene;
        let layout = scene.layout;
        for row in rows {
            let Some(values) = scene.view.matrix.get(row) else {
                continue;
            };
            let y = layout.grid.y + (row - layout.visible_rows.start) as u32 * layout.cell_h;
            for (i, col) in layout.visible_cols.clone().enumerate() {
                let Some(&value) = values.get(col) else {
                    continue;
                };
                let color = scene.colors.color_for(value)?;
                let x = layout.grid.x + i as u32 * layout.cell_w;
                fill_rect(self.surface, x, y, layout.cell_w, layout.cell_h, color);
            }
        }
        Ok(())
    }

    fn draw_overlays(&mut self) {
        let scene = self.scene;
        let layout = scene.layout;
        let overlays = scene.overlays;

        for label in overlays.labels {
            let Some(px) = layout.rect_pixels(&label.bounds()) else {
                continue;
            };
            fill_box(self.surface, px, LABEL_COLOR.with_alpha(40));
            draw_rect_outline(self.surface, px.x, px.y, px.w, px.h, LABEL_COLOR, 2);
            if !label.annotation.is_empty() && px.h > GLYPH_PX + 2 {
                let max_chars = (px.w.saturating_sub(4) / GLYPH_PX) as usize;
                let text = truncate_label(&label.annotation, max_chars, None);
                draw_text_outlined(self.surface, px.x as i32 + 2, px.y as i32 + 2, &text, TEXT, 1);
            }
        }

        if let Some(px) = overlays.highlight.and_then(|r| layout.rect_pixels(&r)) {
            draw_rect_outline(self.surface, px.x, px.y, px.w, px.h, Color::BLACK, 2);
        }

        if let Some(preview) = overlays.preview {
            if let Some(px) = layout.rect_pixels(&preview.rect) {
                let color = if preview.labeling { LABEL_COLOR } else { SELECT_COLOR };
                fill_box(self.surface, px, color.with_alpha(60));
                draw_rect_outline(self.surface, px.x, px.y, px.w, px.h, color, 1);
            }
        }

        let hovered = overlays
            .hovered
            .and_then(|cell| layout.rect_pixels(&CellRect::single(cell)));
        if let Some(px) = hovered {
            draw_rect_outline(self.surface, px.x, px.y, px.w, px.h, TEXT, 1);
            if let Some(tooltip) = overlays.tooltip.filter(|t| !t.trim().is_empty()) {
                draw_tooltip(self.surface, px, tooltip);
            }
        }
    }
}

fn fill_box(img: &mut RgbaImage, px: PixelRect, color: Color) {
    fill_rect_alpha(
        img,
        px.x as i32,
        px.y as i32,
        px.right() as i32 - 1,
        px.bottom() as i32 - 1,
        color,
    );
}

fn draw_tooltip(img: &mut RgbaImage, anchor: PixelRect, text: &str) {
    let lines: Vec<&str> = text.lines().collect();
    let line_h = GLYPH_PX + 2;
    let w = lines.iter().map(|l| text_width(l, 1)).max().unwrap_or(0) + 6;
    let h = lines.len() as u32 * line_h + 4;
    let (img_w, img_h) = img.dimensions();

    let mut x = anchor.right() + 4;
    if x + w > img_w {
        x = anchor.x.saturating_sub(w + 4);
    }
    let y = (anchor.bottom() + 4).min(img_h.saturating_sub(h));

    let box_rect = PixelRect::new(x, y, w, h);
    fill_box(img, box_rect, Color([255, 255, 240, 235]));
    draw_rect_outline(img, x, y, w, h, TEXT, 1);
    for (i, line) in lines.iter().enumerate() {
        draw_text(img, x as i32 + 3, (y + 2 + i as u32 * line_h) as i32, line, TEXT, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorConfig;
    use crate::dataset::AxisLabel;
    use crate::layout::Viewport;
    use serde_json::json;

    fn fixture() -> (ViewState, ColorSpec, LayoutOptions) {
        let view = ViewState::new(
            (0..12).map(|r| AxisLabel::text(format!("row{r}"))).collect(),
            (0..9).map(|c| AxisLabel::text(format!("c{c}"))).collect(),
            (0..12)
                .map(|r| (0..9).map(|c| f64::from((r + c) % 5)).collect())
                .collect(),
        );
        let colors = ColorSpec::from_config(&ColorConfig {
            bins: vec!["=0".into(), "=1".into(), "=2".into(), "=3".into(), ">=4".into()],
            colors: vec![
                json!("#ffffff"),
                json!("#ffcccc"),
                json!("#ff8888"),
                json!("#ff4444"),
                json!("#cc0000"),
            ],
            default: None,
        })
        .unwrap();
        let options = LayoutOptions {
            width: 360,
            height: 260,
            ..LayoutOptions::default()
        };
        (view, colors, options)
    }

    fn scene<'a>(
        view: &'a ViewState,
        meta: &'a Metadata,
        colors: &'a ColorSpec,
        layout: &'a GridLayout,
        options: &'a LayoutOptions,
        overlays: Overlays<'a>,
    ) -> RenderScene<'a> {
        RenderScene {
            view,
            meta,
            colors,
            layout,
            options,
            tree: None,
            overlays,
        }
    }

    #[test]
    fn cells_take_their_bin_color() {
        let (view, colors, options) = fixture();
        let meta = Metadata::default();
        let layout = GridLayout::compute(&view, &meta, &options, Viewport::default(), false);
        let mut renderer = GridRenderer::new(1, 1);
        renderer
            .render_all(scene(&view, &meta, &colors, &layout, &options, Overlays::default()))
            .unwrap();
        let img = renderer.surface();
        assert_eq!(img.dimensions(), (360, 260));

        // Cell (1, 3) holds 4 -> ">=4".
        let x = layout.grid.x + 3 * layout.cell_w + layout.cell_w / 2;
        let y = layout.grid.y + layout.cell_h + layout.cell_h / 2;
        assert_eq!(img.get_pixel(x, y).0, [0xcc, 0, 0, 255]);
    }

    #[test]
    fn progressive_render_matches_full_render() {
        let (view, colors, options) = fixture();
        let meta = Metadata::default();
        let layout = GridLayout::compute(&view, &meta, &options, Viewport::default(), false);
        let labels = vec![Label::new(
            "label-1",
            CellRect {
                start_row: 2,
                end_row: 5,
                start_col: 1,
                end_col: 4,
            },
            "burst",
        )];
        let overlays = Overlays {
            labels: &labels,
            ..Overlays::default()
        };

        let mut full = GridRenderer::new(360, 260);
        full.render_all(scene(&view, &meta, &colors, &layout, &options, overlays))
            .unwrap();

        let mut stepped = GridRenderer::new(360, 260);
        let mut pass = stepped.begin(scene(&view, &meta, &colors, &layout, &options, overlays), 2);
        let mut steps = 0;
        while pass.step().unwrap() {
            steps += 1;
        }
        assert!(pass.is_done());
        assert!(steps > 3);
        assert_eq!(full.surface(), stepped.surface());
    }

    #[test]
    fn labels_and_highlight_draw_outlines() {
        let (view, colors, options) = fixture();
        let meta = Metadata::default();
        let layout = GridLayout::compute(&view, &meta, &options, Viewport::default(), false);
        let rect = CellRect {
            start_row: 0,
            end_row: 1,
            start_col: 0,
            end_col: 1,
        };
        let labels = vec![Label::new("label-1", rect, "")];
        let mut renderer = GridRenderer::new(360, 260);
        renderer
            .render_all(scene(
                &view,
                &meta,
                &colors,
                &layout,
                &options,
                Overlays {
                    labels: &labels,
                    ..Overlays::default()
                },
            ))
            .unwrap();
        let px = layout.rect_pixels(&rect).unwrap();
        assert_eq!(renderer.surface().get_pixel(px.x, px.y).0, LABEL_COLOR.0);

        renderer
            .render_all(scene(
                &view,
                &meta,
                &colors,
                &layout,
                &options,
                Overlays {
                    highlight: Some(rect),
                    ..Overlays::default()
                },
            ))
            .unwrap();
        assert_eq!(renderer.surface().get_pixel(px.x, px.y).0, [0, 0, 0, 255]);
    }

    #[test]
    fn meta_colors_are_stable() {
        assert_eq!(meta_color(Some("tumor")), meta_color(Some("tumor")));
        assert_eq!(meta_color(None), MISSING_META);
    }
}
