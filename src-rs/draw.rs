//! Pixel primitives on an RGBA surface: alpha blending, rectangles and
//! 8x8 bitmap text.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};

use crate::color::Color;

/// Glyph edge in pixels at scale 1.
pub const GLYPH_PX: u32 = 8;

pub fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

pub fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix =
        |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) + f64::from(src[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

fn blend_at(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && x < img.width() as i32 && y < img.height() as i32 {
        let dst = *img.get_pixel(x as u32, y as u32);
        img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
    }
}

/// Opaque fill of the half-open pixel box `[x, x + w) x [y, y + h)`, clipped.
pub fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Color) {
    let x1 = x.saturating_add(w).min(img.width());
    let y1 = y.saturating_add(h).min(img.height());
    let px = color.to_rgba();
    for yy in y.min(y1)..y1 {
        for xx in x.min(x1)..x1 {
            img.put_pixel(xx, yy, px);
        }
    }
}

/// Blended fill of the inclusive box spanned by two corners.
pub fn fill_rect_alpha(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Color) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let min_x = clamp_i32(x0.min(x1), 0, img.width() as i32 - 1);
    let max_x = clamp_i32(x0.max(x1), 0, img.width() as i32 - 1);
    let min_y = clamp_i32(y0.min(y1), 0, img.height() as i32 - 1);
    let max_y = clamp_i32(y0.max(y1), 0, img.height() as i32 - 1);
    let px = color.to_rgba();
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dst = *img.get_pixel(x as u32, y as u32);
            img.put_pixel(x as u32, y as u32, blend_pixel(dst, px));
        }
    }
}

/// Outline of a `w x h` box, growing outward by `thickness - 1` pixels.
pub fn draw_rect_outline(
    img: &mut RgbaImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    color: Color,
    thickness: u32,
) {
    if w == 0 || h == 0 || img.width() == 0 || img.height() == 0 {
        return;
    }
    let img_w = img.width();
    let img_h = img.height();

    let x0 = x.min(img_w - 1);
    let y0 = y.min(img_h - 1);
    let x1 = (x + w.saturating_sub(1)).min(img_w - 1);
    let y1 = (y + h.saturating_sub(1)).min(img_h - 1);
    let px = color.to_rgba();

    for t in 0..thickness.max(1) {
        let tx0 = x0.saturating_sub(t);
        let ty0 = y0.saturating_sub(t);
        let tx1 = (x1 + t).min(img_w - 1);
        let ty1 = (y1 + t).min(img_h - 1);

        for xx in tx0..=tx1 {
            img.put_pixel(xx, ty0, blend_pixel(*img.get_pixel(xx, ty0), px));
            img.put_pixel(xx, ty1, blend_pixel(*img.get_pixel(xx, ty1), px));
        }
        for yy in ty0..=ty1 {
            img.put_pixel(tx0, yy, blend_pixel(*img.get_pixel(tx0, yy), px));
            img.put_pixel(tx1, yy, blend_pixel(*img.get_pixel(tx1, yy), px));
        }
    }
}

/// Integer glyph scale for a target font height in pixels.
pub fn glyph_scale(font_px: u32) -> u32 {
    (font_px / GLYPH_PX).max(1)
}

/// Width in pixels of a single line at the given glyph scale.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_PX * scale.max(1)
}

fn glyph_for(ch: char) -> Option<[u8; 8]> {
    BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'))
}

/// Horizontal text with its top-left corner at `(x, y)`.
pub fn draw_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Color, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let px = color.to_rgba();
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = glyph_for(ch) else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, &row_bits) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (row_bits >> col_idx) & 1 == 0 {
                    continue;
                }
                let gx = cursor_x + col_idx * scale_i;
                let gy = y + row_idx as i32 * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        blend_at(img, gx + sx, gy + sy, px);
                    }
                }
            }
        }
        cursor_x += 8 * scale_i;
    }
}

/// Text rotated a quarter turn counter-clockwise, reading bottom to top.
/// `(x, y)` is the bottom-left corner of the first glyph.
pub fn draw_text_vertical(
    img: &mut RgbaImage,
    x: i32,
    y: i32,
    text: &str,
    color: Color,
    scale: u32,
) {
    let scale_i = scale.max(1) as i32;
    let px = color.to_rgba();
    for (ch_idx, ch) in text.chars().enumerate() {
        let Some(glyph) = glyph_for(ch) else {
            continue;
        };
        let base = ch_idx as i32 * 8;
        for (row_idx, &row_bits) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (row_bits >> col_idx) & 1 == 0 {
                    continue;
                }
                let gx = x + row_idx as i32 * scale_i;
                let gy = y - (base + col_idx + 1) * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        blend_at(img, gx + sx, gy + sy, px);
                    }
                }
            }
        }
    }
}

/// Text with a one-pixel contrasting halo so it reads on any cell color.
pub fn draw_text_outlined(
    img: &mut RgbaImage,
    x: i32,
    y: i32,
    text: &str,
    color: Color,
    scale: u32,
) {
    let halo = color.contrasting();
    for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
        draw_text(img, x + dx, y + dy, text, halo, scale);
    }
    draw_text(img, x, y, text, color, scale);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_clips_to_surface() {
        let mut img = RgbaImage::new(4, 4);
        fill_rect(&mut img, 2, 2, 10, 10, Color::rgb(255, 0, 0));
        assert_eq!(img.get_pixel(3, 3).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn outline_leaves_interior_untouched() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        draw_rect_outline(&mut img, 2, 2, 5, 5, Color::BLACK, 1);
        assert_eq!(img.get_pixel(2, 2).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(6, 6).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(4, 4).0, [255, 255, 255, 255]);
    }

    #[test]
    fn text_marks_pixels_inside_its_box() {
        let mut img = RgbaImage::from_pixel(40, 12, Rgba([255, 255, 255, 255]));
        draw_text(&mut img, 0, 0, "AB", Color::BLACK, 1);
        let dark = img.pixels().filter(|p| p.0[0] < 128).count();
        assert!(dark > 0);
        assert_eq!(text_width("AB", 1), 16);
        assert_eq!(text_width("AB", 2), 32);
        assert!(!img
            .enumerate_pixels()
            .any(|(x, _, p)| x >= 16 && p.0[0] < 128));
    }

    #[test]
    fn vertical_text_grows_upward() {
        let mut img = RgbaImage::from_pixel(12, 40, Rgba([255, 255, 255, 255]));
        draw_text_vertical(&mut img, 0, 39, "AB", Color::BLACK, 1);
        let below = img
            .enumerate_pixels()
            .filter(|(_, y, p)| *y >= 39 - 16 && p.0[0] < 128)
            .count();
        let above = img
            .enumerate_pixels()
            .filter(|(_, y, p)| *y < 39 - 16 && p.0[0] < 128)
            .count();
        assert!(below > 0);
        assert_eq!(above, 0);
        assert_eq!(glyph_scale(14), 1);
        assert_eq!(glyph_scale(16), 2);
    }
}
