//! The layer compositor: bakes one [`GarmentState`] into a single surface
//! texture.
//!
//! Painting happens in a strict z-order — base fill, pattern tile fill, text
//! layers in list order, graphic layers in list order — so later layers win
//! at overlapping pixels and graphics always cover text.  Asset loads for a
//! cycle are issued concurrently up front; painting itself is sequential on
//! the calling thread, which is what keeps the z-order exact even though the
//! loads race each other.
//!
//! Failure policy: a single layer whose asset fails to resolve is logged and
//! skipped, and a failed pattern silently degrades to the plain base fill.
//! Only allocation of the surface itself can fail a cycle.
//!
//! `compose` is a pure function of its input: identical state plus identical
//! resolved bitmaps produce byte-identical pixels.

use std::{collections::HashMap, sync::Arc};

use ab_glyph::FontArc;
use bevy::log::warn;
use image::{RgbaImage, imageops};
use rayon::prelude::*;

use crate::{
    assets::{AssetFetcher, AssetLoadError, AssetLoader, AssetRef},
    region::map_placement,
    state::GarmentState,
    surface::{AllocationError, PATTERN_TILES, SURFACE_SIZE, Surface},
    text::rasterize_label,
};

/// A composition cycle failed outright.  Per-layer problems never surface
/// here; they degrade locally instead.
#[derive(Debug)]
pub enum ComposeError {
    /// The raster surface could not be allocated.
    Allocation(AllocationError),
}

impl std::fmt::Display for ComposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComposeError::Allocation(e) => write!(f, "composition cycle failed: {e}"),
        }
    }
}

impl std::error::Error for ComposeError {}

impl From<AllocationError> for ComposeError {
    fn from(e: AllocationError) -> Self {
        ComposeError::Allocation(e)
    }
}

/// The finished output of one composition cycle: a square, fully-initialized
/// RGBA8 buffer.  Superseded wholesale by the next cycle, never mutated.
pub struct CompositedTexture {
    pub pixels: Vec<u8>,
    pub size: u32,
}

impl CompositedTexture {
    /// Read one pixel; assertion helper for tests and callers that inspect
    /// the baked result.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        assert!(x < self.size && y < self.size, "pixel out of bounds");
        let i = ((y * self.size + x) * 4) as usize;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

/// Bakes garment states into composited textures.
///
/// Holds the asset fetch seam and the label font; both are shared handles so
/// the compositor can be cloned into background workers cheaply.
#[derive(Clone)]
pub struct Compositor {
    fetcher: Arc<dyn AssetFetcher>,
    font: Option<FontArc>,
}

impl Compositor {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            font: None,
        }
    }

    /// Set the font used for text layers.  Without one, text layers are
    /// skipped with a warning — the same per-layer degradation as a failed
    /// bitmap.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Resolve every asset the state references, concurrently.
    ///
    /// Each load is independent: one hung or failed fetch affects only the
    /// layer(s) that reference it.
    fn prefetch(
        &self,
        state: &GarmentState,
    ) -> HashMap<AssetRef, Result<RgbaImage, AssetLoadError>> {
        let mut refs: Vec<AssetRef> = Vec::new();
        if let Some(pattern) = &state.pattern {
            refs.push(pattern.0.clone());
        }
        for layer in &state.graphic_layers {
            refs.push(layer.source.clone());
        }
        refs.sort_by(|a, b| a.describe().cmp(&b.describe()));
        refs.dedup();

        refs.into_par_iter()
            .map(|asset| {
                let result = AssetLoader::new(self.fetcher.as_ref()).load_bitmap(&asset);
                (asset, result)
            })
            .collect()
    }

    /// Bake `state` into a [`CompositedTexture`] at the canonical resolution.
    pub fn compose(&self, state: &GarmentState) -> Result<CompositedTexture, ComposeError> {
        let bitmaps = self.prefetch(state);
        let mut surface = Surface::new(SURFACE_SIZE)?;

        // 1. Neutral opaque backdrop.  The garment's base colour is applied
        //    later as the material tint, not baked into the texture.
        surface.fill(crate::state::Rgb8::WHITE);

        // 2. Tiled pattern, replacing the backdrop where it resolves.
        if let Some(pattern) = &state.pattern {
            match &bitmaps[&pattern.0] {
                Ok(bitmap) => {
                    let tile = scale_pattern_tile(bitmap, surface.size());
                    surface.tile_over(&tile);
                }
                Err(e) => {
                    warn!("pattern {}: {e}; using base fill", pattern.0.describe());
                }
            }
        }

        // 3. Text layers, list order.
        for layer in &state.text_layers {
            let Some(font) = &self.font else {
                warn!("text layer {:?}: no font configured; skipping", layer.id.0);
                continue;
            };
            let Some(tile) = rasterize_label(font, &layer.content, layer.font_size_px, layer.color)
            else {
                continue;
            };
            paint_panel_tile(
                &mut surface,
                &tile,
                layer.placement,
                layer.offset.dx,
                layer.offset.dy,
            );
        }

        // 4. Graphic layers, list order, always above every text layer.
        for layer in &state.graphic_layers {
            let bitmap = match &bitmaps[&layer.source] {
                Ok(bitmap) => bitmap,
                Err(e) => {
                    warn!(
                        "graphic layer {:?} ({}): {e}; skipping",
                        layer.id.0,
                        layer.source.describe()
                    );
                    continue;
                }
            };
            let w = layer.width_px.round().max(1.0) as u32;
            let h = layer.height_px.round().max(1.0) as u32;
            let resized = imageops::resize(bitmap, w, h, imageops::FilterType::Triangle);
            paint_panel_tile(
                &mut surface,
                &resized,
                layer.placement,
                layer.offset.dx,
                layer.offset.dy,
            );
        }

        Ok(CompositedTexture {
            size: surface.size(),
            pixels: surface.into_pixels(),
        })
    }
}

/// Paint a tile centred in its panel region, shifted by the layer offset.
///
/// The tile is flipped vertically first: mesh UV-v grows upward while raster
/// rows grow downward, and layer tiles are authored top-side-up.
fn paint_panel_tile(
    surface: &mut Surface,
    tile: &RgbaImage,
    placement: crate::region::Placement,
    dx: f32,
    dy: f32,
) {
    let region = map_placement(placement).to_pixel_rect(surface.size());
    let dest = region.place_centered(tile.width() as f32, tile.height() as f32, dx, dy);
    let flipped = imageops::flip_vertical(tile);
    surface.blit_over(&flipped, dest.x.round() as i64, dest.y.round() as i64);
}

/// Scale a pattern bitmap to its tile size: [`PATTERN_TILES`] tiles across
/// the surface, aspect ratio preserved.
fn scale_pattern_tile(bitmap: &RgbaImage, surface_size: u32) -> RgbaImage {
    let tile_w = (surface_size as f32 / PATTERN_TILES as f32).round().max(1.0);
    let tile_h = (tile_w * bitmap.height() as f32 / bitmap.width() as f32)
        .round()
        .max(1.0);
    imageops::resize(
        bitmap,
        tile_w as u32,
        tile_h as u32,
        imageops::FilterType::Triangle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::MemoryFetcher,
        region::{PixelRect, Placement},
        state::{GarmentState, GraphicLayer, LayerId, Offset, PatternRef, Rgb8, TextLayer},
        text::{load_font_file, locate_sans_font},
    };

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const WHITE: [u8; 4] = [255, 255, 255, 255];

    fn png_bytes(rgba: [u8; 4], w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, image::Rgba(rgba));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn graphic(id: &str, url: &str, placement: Placement, offset: Offset) -> GraphicLayer {
        GraphicLayer::new(
            LayerId::new(id),
            AssetRef::Url(url.into()),
            40.0,
            40.0,
            placement,
            offset,
        )
        .unwrap()
    }

    fn fetcher_with_solids() -> Arc<MemoryFetcher> {
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("mem://red.png", png_bytes(RED, 8, 8), Some("image/png"));
        fetcher.insert("mem://blue.png", png_bytes(BLUE, 8, 8), Some("image/png"));
        Arc::new(fetcher)
    }

    /// Destination rect of a 40×40 tile in a panel, mirroring the painter's
    /// own placement rule.
    fn dest_rect(placement: Placement, offset: Offset) -> PixelRect {
        map_placement(placement)
            .to_pixel_rect(SURFACE_SIZE)
            .place_centered(40.0, 40.0, offset.dx, offset.dy)
    }

    fn center_px(rect: &PixelRect) -> (u32, u32) {
        let (cx, cy) = rect.center();
        (cx.round() as u32, cy.round() as u32)
    }

    #[test]
    fn compose_is_idempotent() {
        let compositor = Compositor::new(fetcher_with_solids());
        let state = GarmentState::default().with_graphic_added(graphic(
            "g",
            "mem://red.png",
            Placement::Front,
            Offset::ZERO,
        ));
        let a = compositor.compose(&state).unwrap();
        let b = compositor.compose(&state).unwrap();
        assert_eq!(a.pixels, b.pixels);
    }

    #[test]
    fn graphic_paints_centered_in_its_panel() {
        let compositor = Compositor::new(fetcher_with_solids());
        let state = GarmentState::default().with_graphic_added(graphic(
            "g",
            "mem://red.png",
            Placement::Front,
            Offset::ZERO,
        ));
        let texture = compositor.compose(&state).unwrap();

        let (cx, cy) = center_px(&dest_rect(Placement::Front, Offset::ZERO));
        assert_eq!(texture.pixel(cx, cy), RED);

        // The back panel's centre stays untouched.
        let (bx, by) = center_px(&dest_rect(Placement::Back, Offset::ZERO));
        assert_eq!(texture.pixel(bx, by), WHITE);
    }

    /// Two same-size graphics on the back, offsets (0,0) and (10,10).  The
    /// later one owns the overlap; a sliver of the first stays visible at
    /// the non-overlapping edge.
    #[test]
    fn later_graphic_wins_overlap() {
        let compositor = Compositor::new(fetcher_with_solids());
        let state = GarmentState::default()
            .with_graphic_added(graphic("g1", "mem://red.png", Placement::Back, Offset::ZERO))
            .with_graphic_added(graphic(
                "g2",
                "mem://blue.png",
                Placement::Back,
                Offset::new(10.0, 10.0),
            ));
        let texture = compositor.compose(&state).unwrap();

        let first = dest_rect(Placement::Back, Offset::ZERO);
        let second = dest_rect(Placement::Back, Offset::new(10.0, 10.0));

        // Centre of the second rect is inside both: the later layer wins.
        let (cx, cy) = center_px(&second);
        assert_eq!(texture.pixel(cx, cy), BLUE);

        // Top-left corner of the first rect is outside the second: the
        // earlier layer's sliver survives.
        let (sx, sy) = (first.x.round() as u32 + 2, first.y.round() as u32 + 2);
        assert_eq!(texture.pixel(sx, sy), RED);
    }

    #[test]
    fn failed_pattern_degrades_to_base_fill() {
        let compositor = Compositor::new(fetcher_with_solids());
        let state = GarmentState::default().with_pattern(Some(PatternRef(AssetRef::Url(
            "mem://missing.svg".into(),
        ))));
        let texture = compositor.compose(&state).unwrap();
        assert_eq!(texture.pixel(0, 0), WHITE);
        assert_eq!(texture.pixel(512, 512), WHITE);
        assert_eq!(texture.pixel(1023, 1023), WHITE);
    }

    #[test]
    fn failed_graphic_is_skipped_not_fatal() {
        let compositor = Compositor::new(fetcher_with_solids());
        let state = GarmentState::default()
            .with_graphic_added(graphic("bad", "mem://missing.png", Placement::Front, Offset::ZERO))
            .with_graphic_added(graphic("ok", "mem://red.png", Placement::Back, Offset::ZERO));
        let texture = compositor.compose(&state).unwrap();

        let (fx, fy) = center_px(&dest_rect(Placement::Front, Offset::ZERO));
        assert_eq!(texture.pixel(fx, fy), WHITE, "failed layer must paint nothing");
        let (bx, by) = center_px(&dest_rect(Placement::Back, Offset::ZERO));
        assert_eq!(texture.pixel(bx, by), RED, "healthy layer must still paint");
    }

    #[test]
    fn svg_pattern_tiles_the_whole_surface() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="8"><rect width="8" height="8" fill="#00ff00"/></svg>"##;
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert(
            "mem://dots.svg",
            svg.as_bytes().to_vec(),
            Some("image/svg+xml"),
        );
        let compositor = Compositor::new(Arc::new(fetcher));
        let state = GarmentState::default()
            .with_pattern(Some(PatternRef(AssetRef::Url("mem://dots.svg".into()))));
        let texture = compositor.compose(&state).unwrap();

        for (x, y) in [(0, 0), (500, 500), (1023, 1023)] {
            assert_eq!(texture.pixel(x, y), [0, 255, 0, 255], "not tiled at {x},{y}");
        }
    }

    /// "HI" at the front, offset zero, on a plain white garment.  Ink must
    /// land inside the front region; the back region stays blank.  Needs a
    /// host font.
    #[test]
    fn text_paints_inside_its_panel() {
        let Some(path) = locate_sans_font() else { return };
        let font = load_font_file(path).unwrap();

        let compositor = Compositor::new(fetcher_with_solids()).with_font(font);
        let state = GarmentState::default().with_text_added(
            TextLayer::new(
                LayerId::new("t"),
                "HI",
                40.0,
                Rgb8::BLACK,
                Placement::Front,
                Offset::ZERO,
            )
            .unwrap(),
        );
        let texture = compositor.compose(&state).unwrap();

        let front = map_placement(Placement::Front).to_pixel_rect(SURFACE_SIZE);
        let mut ink = 0usize;
        for y in front.y as u32..(front.y + front.h) as u32 {
            for x in front.x as u32..(front.x + front.w) as u32 {
                if texture.pixel(x, y) != WHITE {
                    ink += 1;
                }
            }
        }
        assert!(ink > 0, "no text ink inside the front region");

        let back = map_placement(Placement::Back).to_pixel_rect(SURFACE_SIZE);
        for y in back.y as u32..(back.y + back.h) as u32 {
            for x in back.x as u32..(back.x + back.w) as u32 {
                assert_eq!(texture.pixel(x, y), WHITE, "text leaked into the back region");
            }
        }
    }

    /// Graphics always draw above text, regardless of interleaving.
    #[test]
    fn graphics_paint_over_text() {
        let Some(path) = locate_sans_font() else { return };
        let font = load_font_file(path).unwrap();

        let compositor = Compositor::new(fetcher_with_solids()).with_font(font);
        let big_graphic = GraphicLayer::new(
            LayerId::new("g"),
            AssetRef::Url("mem://blue.png".into()),
            260.0,
            130.0,
            Placement::Front,
            Offset::ZERO,
        )
        .unwrap();
        let state = GarmentState::default()
            .with_text_added(
                TextLayer::new(
                    LayerId::new("t"),
                    "HI",
                    40.0,
                    Rgb8::BLACK,
                    Placement::Front,
                    Offset::ZERO,
                )
                .unwrap(),
            )
            .with_graphic_added(big_graphic);
        let texture = compositor.compose(&state).unwrap();

        // The graphic covers the whole panel centre, burying the text.
        let (cx, cy) = center_px(
            &map_placement(Placement::Front)
                .to_pixel_rect(SURFACE_SIZE)
                .place_centered(260.0, 130.0, 0.0, 0.0),
        );
        assert_eq!(texture.pixel(cx, cy), BLUE);
    }
}
