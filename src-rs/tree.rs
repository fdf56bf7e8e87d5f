//! Optional row-aligned tree overlay. The newick text is opaque here; an
//! injected collaborator draws into the gutter the layout reserves.

use image::RgbaImage;

use crate::color::Color;
use crate::draw::fill_rect;
use crate::layout::PixelRect;

/// Draws a tree into the gutter. `rows` holds `(row index, center y)` for
/// every visible row, top to bottom.
pub trait TreeOverlay {
    fn draw(&self, newick: &str, surface: &mut RgbaImage, gutter: PixelRect, rows: &[(usize, u32)]);
}

/// Fallback drawer used when no tree collaborator is injected: a spine with
/// one tick per row so the gutter still lines up with the grid.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowTicks;

impl TreeOverlay for RowTicks {
    fn draw(
        &self,
        _newick: &str,
        surface: &mut RgbaImage,
        gutter: PixelRect,
        rows: &[(usize, u32)],
    ) {
        if gutter.w < 4 || rows.is_empty() {
            return;
        }
        let color = Color::rgb(120, 120, 120);
        let spine_x = gutter.right().saturating_sub(gutter.w / 4);
        let first = rows[0].1;
        let last = rows[rows.len() - 1].1;
        fill_rect(surface, spine_x, first, 1, last.saturating_sub(first) + 1, color);
        for (_, y) in rows {
            fill_rect(surface, spine_x, *y, gutter.right() - spine_x, 1, color);
        }
    }
}

/// Newick text plus the collaborator that knows how to draw it.
pub struct TreeAnnotation {
    newick: String,
    drawer: Box<dyn TreeOverlay>,
}

impl TreeAnnotation {
    pub fn new(newick: impl Into<String>) -> Self {
        Self::with_drawer(newick, Box::new(RowTicks))
    }

    pub fn with_drawer(newick: impl Into<String>, drawer: Box<dyn TreeOverlay>) -> Self {
        Self {
            newick: newick.into(),
            drawer,
        }
    }

    pub fn newick(&self) -> &str {
        &self.newick
    }

    pub fn draw(&self, surface: &mut RgbaImage, gutter: PixelRect, rows: &[(usize, u32)]) {
        self.drawer.draw(&self.newick, surface, gutter, rows);
    }
}

impl std::fmt::Debug for TreeAnnotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeAnnotation")
            .field("newick_len", &self.newick.len())
            .finish()
    }
}
