//! Text layer rasterization.
//!
//! A text layer is rendered to an intermediate tile: a single kerned line
//! measured at the layer's font size, padded by [`TEXT_PAD`] on every side,
//! on an opaque white backing (the backing makes overlapping layers strictly
//! last-wins, the same as the original label rendering).  The compositor
//! then places the tile like any other bitmap.
//!
//! Fonts are plain `ab_glyph` handles supplied by the caller;
//! [`locate_sans_font`] probes well-known system locations for demos and
//! tests that just need *a* sans-serif face.

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use image::RgbaImage;

use crate::{assets::AssetLoadError, state::Rgb8};

/// Padding added on every side of a text tile, in surface pixels.
pub const TEXT_PAD: u32 = 8;

/// Load a TTF/OTF font file into an [`FontArc`].
pub fn load_font_file(path: impl AsRef<Path>) -> Result<FontArc, AssetLoadError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| AssetLoadError::Fetch {
        url: path.display().to_string(),
        reason: e.to_string(),
    })?;
    FontArc::try_from_vec(bytes).map_err(|e| AssetLoadError::Decode {
        reason: format!("invalid font data in {}: {e}", path.display()),
    })
}

/// Probe well-known system font locations for a usable sans-serif face.
///
/// Returns the first match; `None` on systems with no font files in the
/// probed locations.  Applications that care which face is used should load
/// their own with [`load_font_file`].
pub fn locate_sans_font() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];
    for candidate in CANDIDATES {
        let path = Path::new(candidate);
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }
    scan_for_font(Path::new("/usr/share/fonts"), 3)
}

/// Depth-limited scan for the first `.ttf`/`.otf` file, in sorted order so
/// repeated runs pick the same face.
fn scan_for_font(dir: &Path, depth: u32) -> Option<PathBuf> {
    if depth == 0 {
        return None;
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for path in &entries {
        if path.is_file() {
            match path.extension().and_then(|e| e.to_str()) {
                Some("ttf") | Some("otf") => return Some(path.clone()),
                _ => {}
            }
        }
    }
    for path in &entries {
        if path.is_dir() {
            if let Some(found) = scan_for_font(path, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

/// Measured extent of a laid-out line: kerned glyph positions plus the line
/// metrics needed to size the tile.
struct LineLayout {
    /// `(glyph id, x offset from line start)` pairs.
    glyphs: Vec<(ab_glyph::GlyphId, f32)>,
    width: f32,
    ascent: f32,
    height: f32,
}

/// Lay out `content` as a single kerned line at `font_size_px`.
fn layout_line(font: &FontArc, content: &str, font_size_px: f32) -> LineLayout {
    let scaled = font.as_scaled(PxScale::from(font_size_px));
    let ascent = scaled.ascent();
    let height = scaled.height();

    let mut glyphs = Vec::with_capacity(content.chars().count());
    let mut cursor = 0.0f32;
    let mut prev = None;
    for ch in content.chars() {
        let id = font.glyph_id(ch);
        if let Some(p) = prev {
            cursor += scaled.kern(p, id);
        }
        glyphs.push((id, cursor));
        cursor += scaled.h_advance(id);
        prev = Some(id);
    }

    LineLayout {
        glyphs,
        width: cursor,
        ascent,
        height,
    }
}

/// Rasterize a text layer's content into its padded, white-backed tile.
///
/// Returns `None` for content that draws nothing (empty or whitespace-only),
/// in which case the layer is skipped entirely.
pub fn rasterize_label(
    font: &FontArc,
    content: &str,
    font_size_px: f32,
    color: Rgb8,
) -> Option<RgbaImage> {
    if content.trim().is_empty() {
        return None;
    }

    let layout = layout_line(font, content, font_size_px);
    let tile_w = layout.width.ceil() as u32 + TEXT_PAD * 2;
    let tile_h = layout.height.ceil() as u32 + TEXT_PAD * 2;
    if layout.width <= 0.0 || layout.height <= 0.0 {
        return None;
    }

    let mut tile = RgbaImage::from_pixel(tile_w, tile_h, image::Rgba([255, 255, 255, 255]));

    let scale = PxScale::from(font_size_px);
    let baseline = TEXT_PAD as f32 + layout.ascent;
    for &(id, x) in &layout.glyphs {
        let glyph = id.with_scale_and_position(scale, point(TEXT_PAD as f32 + x, baseline));
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let px = bounds.min.x + gx as f32;
            let py = bounds.min.y + gy as f32;
            if px < 0.0 || py < 0.0 {
                return;
            }
            let (px, py) = (px as u32, py as u32);
            if px >= tile_w || py >= tile_h {
                return;
            }
            let dst = tile.get_pixel_mut(px, py);
            let cov = coverage.clamp(0.0, 1.0);
            // Glyph colour over the white backing, by coverage.
            for (c, fg) in [color.r, color.g, color.b].into_iter().enumerate() {
                let bg = dst.0[c] as f32;
                dst.0[c] = (fg as f32 * cov + bg * (1.0 - cov)).round() as u8;
            }
        });
    }

    Some(tile)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests needing real glyph outlines use whatever sans face the host
    /// provides, and pass vacuously on fontless machines.
    fn test_font() -> Option<FontArc> {
        load_font_file(locate_sans_font()?).ok()
    }

    #[test]
    fn blank_content_yields_no_tile() {
        let Some(font) = test_font() else { return };
        assert!(rasterize_label(&font, "", 40.0, Rgb8::BLACK).is_none());
        assert!(rasterize_label(&font, "   ", 40.0, Rgb8::BLACK).is_none());
    }

    #[test]
    fn tile_grows_with_content_and_font_size() {
        let Some(font) = test_font() else { return };
        let short = rasterize_label(&font, "HI", 40.0, Rgb8::BLACK).unwrap();
        let long = rasterize_label(&font, "HIHIHI", 40.0, Rgb8::BLACK).unwrap();
        assert!(long.width() > short.width());

        let big = rasterize_label(&font, "HI", 80.0, Rgb8::BLACK).unwrap();
        assert!(big.width() > short.width());
        assert!(big.height() > short.height());
    }

    #[test]
    fn tile_is_white_backed_with_coloured_glyphs() {
        let Some(font) = test_font() else { return };
        let tile = rasterize_label(&font, "HI", 40.0, Rgb8::new(200, 0, 0)).unwrap();

        // Padding corner stays pure white and opaque.
        assert_eq!(tile.get_pixel(0, 0).0, [255, 255, 255, 255]);

        // Some pixel picked up glyph ink.
        let has_ink = tile.pixels().any(|p| p.0[0] != 255 || p.0[1] != 255 || p.0[2] != 255);
        assert!(has_ink, "no glyph coverage was drawn");
        // Ink is the requested colour: red channel dominates wherever green
        // dropped below white.
        let tinted = tile
            .pixels()
            .filter(|p| p.0[1] < 200)
            .all(|p| p.0[0] > p.0[1]);
        assert!(tinted, "glyph ink is not the requested colour");
    }

    #[test]
    fn rasterization_is_deterministic() {
        let Some(font) = test_font() else { return };
        let a = rasterize_label(&font, "Garment", 32.0, Rgb8::BLACK).unwrap();
        let b = rasterize_label(&font, "Garment", 32.0, Rgb8::BLACK).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }
}
