#![allow(clippy::too_many_arguments)]

use ab_glyph::{Font, FontArc, FontVec, PxScale, ScaleFont, point};
use anyhow::{Result, anyhow};
use fontdb::{Database, Family, Query};
use image::RgbImage;
use tracing::{debug, info};

/// Load a system font, preferring `family` and then common sans-serif faces.
pub fn load_font(family: &str) -> Result<FontArc> {
    let mut db = Database::new();
    db.load_system_fonts();

    let preferred_families = [
        Family::Name(family),
        Family::Name("Arial"),
        Family::Name("Liberation Sans"),
        Family::Name("DejaVu Sans"),
        Family::SansSerif,
    ];

    for family in preferred_families {
        if let Some(id) = db.query(&Query {
            families: &[family],
            ..Default::default()
        }) && let Some(font) = load_face(&db, id)
        {
            return Ok(font);
        }
    }

    for face in db.faces() {
        if let Some(font) = load_face(&db, face.id) {
            return Ok(font);
        }
    }

    Err(anyhow!("no usable system font found for overlays"))
}

fn load_face(db: &Database, id: fontdb::ID) -> Option<FontArc> {
    let font = db.with_face_data(id, |data, index| {
        FontVec::try_from_vec_and_index(data.to_vec(), index)
    })?;
    match font {
        Ok(font) => {
            if let Some(face) = db.face(id) {
                info!(family = ?face.families.first().map(|(name, _)| name), "loaded overlay font");
            }
            Some(FontArc::new(font))
        }
        Err(err) => {
            debug!(error = %err, "skipping undecodable font face");
            None
        }
    }
}

/// Horizontal advance and ink extents of a string. Ink is measured relative
/// to the ascent line, the point text is positioned by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub width: f32,
    pub ink_top: f32,
    pub ink_bottom: f32,
}

impl TextMetrics {
    pub fn ink_height(&self) -> f32 {
        (self.ink_bottom - self.ink_top).max(0.0)
    }
}

pub fn measure_text(text: &str, font: &FontArc, size: f32) -> TextMetrics {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);
    let baseline = scaled.ascent();
    let mut width = 0.0f32;
    let mut ink: Option<(f32, f32)> = None;
    let mut previous = None;
    for ch in text.chars() {
        if ch.is_control() {
            continue;
        }
        let glyph_id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            width += scaled.kern(prev, glyph_id);
        }
        let glyph = glyph_id.with_scale_and_position(scale, point(width, baseline));
        if let Some(outline) = font.outline_glyph(glyph) {
            let bounds = outline.px_bounds();
            ink = Some(match ink {
                Some((top, bottom)) => (top.min(bounds.min.y), bottom.max(bounds.max.y)),
                None => (bounds.min.y, bounds.max.y),
            });
        }
        width += scaled.h_advance(glyph_id);
        previous = Some(glyph_id);
    }
    let (ink_top, ink_bottom) = ink.unwrap_or((0.0, 0.0));
    TextMetrics {
        width: width.max(0.0),
        ink_top,
        ink_bottom,
    }
}

/// Draw `text` with its ascent line at `top`.
pub fn draw_text(
    img: &mut RgbImage,
    font: &FontArc,
    text: &str,
    size: f32,
    left: f32,
    top: f32,
    color: Color,
) {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);
    let baseline = top + scaled.ascent();
    let mut cursor_x = left;
    let mut previous = None;
    for ch in text.chars() {
        if ch.is_control() {
            continue;
        }
        let glyph_id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            cursor_x += scaled.kern(prev, glyph_id);
        }
        let glyph = glyph_id.with_scale_and_position(scale, point(cursor_x, baseline));
        if let Some(outline) = font.outline_glyph(glyph) {
            let bounds = outline.px_bounds();
            outline.draw(|x, y, coverage| {
                blend_pixel(
                    img,
                    bounds.min.x + x as f32,
                    bounds.min.y + y as f32,
                    color,
                    coverage,
                );
            });
        }
        cursor_x += scaled.h_advance(glyph_id);
        previous = Some(glyph_id);
    }
}

pub fn fill_rect(img: &mut RgbImage, left: f32, top: f32, right: f32, bottom: f32, color: Color) {
    let (width, height) = img.dimensions();
    let x0 = left.max(0.0).floor() as i64;
    let y0 = top.max(0.0).floor() as i64;
    let x1 = right.min(width as f32).ceil() as i64;
    let y1 = bottom.min(height as f32).ceil() as i64;
    for y in y0.max(0)..y1.min(height as i64) {
        for x in x0.max(0)..x1.min(width as i64) {
            blend_pixel(img, x as f32, y as f32, color, 1.0);
        }
    }
}

fn blend_pixel(img: &mut RgbImage, x: f32, y: f32, color: Color, coverage: f32) {
    if coverage <= 0.0 {
        return;
    }
    let xi = x.floor() as i64;
    let yi = y.floor() as i64;
    if xi < 0 || yi < 0 || xi >= img.width() as i64 || yi >= img.height() as i64 {
        return;
    }
    let alpha = (color.a * coverage).clamp(0.0, 1.0);
    let px = img.get_pixel_mut(xi as u32, yi as u32);
    for (channel, src) in px.0.iter_mut().zip(color.rgb()) {
        let dst = *channel as f32 / 255.0;
        let out = src * alpha + dst * (1.0 - alpha);
        *channel = (out.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    fn rgb(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn fill_rect_blends_over_existing_pixels() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        fill_rect(&mut img, 0.0, 0.0, 4.0, 2.0, Color::from_rgba8(0, 0, 0, 120));
        // 200 * (1 - 120/255) = 105.9
        assert_eq!(img.get_pixel(1, 1), &Rgb([106, 106, 106]));
        assert_eq!(img.get_pixel(1, 2), &Rgb([200, 200, 200]));
    }

    #[test]
    fn fill_rect_clips_to_image() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([10, 10, 10]));
        fill_rect(&mut img, -5.0, -5.0, 50.0, 50.0, Color::from_rgba8(255, 255, 255, 255));
        assert!(img.pixels().all(|px| px.0 == [255, 255, 255]));
    }

    #[test]
    fn measures_when_a_font_is_installed() {
        let Ok(font) = load_font("Arial") else {
            return;
        };
        let short = measure_text("1", &font, 48.0);
        let long = measure_text("12:34", &font, 48.0);
        assert!(long.width > short.width);
        assert!(long.ink_height() > 0.0);
        assert!(long.ink_top >= 0.0, "digits start below the ascent line");
        assert_eq!(measure_text("", &font, 48.0).ink_height(), 0.0);
    }
}
