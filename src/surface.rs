//! The square RGBA raster surface a composition cycle paints into.
//!
//! All drawing is CPU-side and deterministic: an opaque fill, a repeating
//! tile fill, and a source-over alpha blit with signed coordinates and
//! out-of-bounds clipping.  The surface is always fully initialized before
//! any layer touches it, so identical inputs produce byte-identical pixels.

use image::RgbaImage;

use crate::state::Rgb8;

/// Edge length of the canonical composition surface, in texels.
///
/// Fixed by the garment mesh's UV unwrap — not user-configurable.
pub const SURFACE_SIZE: u32 = 1024;

/// Number of pattern tiles across one edge of the surface.  Derived from the
/// original layout so consecutive tiles meet without a visible seam.
pub const PATTERN_TILES: u32 = 25;

/// The raster surface itself could not be allocated.  This is the only error
/// that is fatal to a composition cycle.
#[derive(Debug)]
pub enum AllocationError {
    /// The allocator refused the pixel buffer.
    Exhausted { bytes: usize },
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationError::Exhausted { bytes } => {
                write!(f, "cannot allocate {bytes}-byte composition surface")
            }
        }
    }
}

impl std::error::Error for AllocationError {}

/// A square, row-major RGBA8 pixel buffer.
pub struct Surface {
    pixels: Vec<u8>,
    size: u32,
}

impl Surface {
    /// Allocate a zeroed `size × size` surface.
    ///
    /// Allocation is explicit and fallible so resource exhaustion surfaces as
    /// [`AllocationError`] instead of aborting the process.
    pub fn new(size: u32) -> Result<Self, AllocationError> {
        let bytes = size as usize * size as usize * 4;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes)
            .map_err(|_| AllocationError::Exhausted { bytes })?;
        pixels.resize(bytes, 0);
        Ok(Self { pixels, size })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Read one pixel.  Panics outside the surface; test/assert helper.
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

    /// Fill the whole surface with an opaque colour.
    pub fn fill(&mut self, color: Rgb8) {
        for px in self.pixels.chunks_exact_mut(4) {
            px[0] = color.r;
            px[1] = color.g;
            px[2] = color.b;
            px[3] = 255;
        }
    }

    /// Source-over blit of a straight-alpha bitmap at a signed position.
    ///
    /// Pixels falling outside the surface are clipped; there is no wrap.
    /// Fully opaque source pixels replace the destination outright, which is
    /// what gives overlapping layers their last-wins behaviour.
    pub fn blit_over(&mut self, src: &RgbaImage, x: i64, y: i64) {
        let size = self.size as i64;
        let (src_w, src_h) = src.dimensions();

        for sy in 0..src_h as i64 {
            let dy = y + sy;
            if dy < 0 || dy >= size {
                continue;
            }
            for sx in 0..src_w as i64 {
                let dx = x + sx;
                if dx < 0 || dx >= size {
                    continue;
                }
                let sp = src.get_pixel(sx as u32, sy as u32).0;
                let di = ((dy * size + dx) * 4) as usize;
                blend_over(&mut self.pixels[di..di + 4], sp);
            }
        }
    }

    /// Cover the entire surface with a repeating tile, anchored at the
    /// top-left corner.  The tile is painted at its given pixel size; scale
    /// it before calling.
    pub fn tile_over(&mut self, tile: &RgbaImage) {
        let (tw, th) = tile.dimensions();
        if tw == 0 || th == 0 {
            return;
        }
        let mut y = 0i64;
        while y < self.size as i64 {
            let mut x = 0i64;
            while x < self.size as i64 {
                self.blit_over(tile, x, y);
                x += tw as i64;
            }
            y += th as i64;
        }
    }

    /// Consume the surface, returning the raw RGBA buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// Source-over for one straight-alpha pixel, integer math with rounding.
#[inline]
fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    let a = src[3] as u32;
    if a == 255 {
        dst[0] = src[0];
        dst[1] = src[1];
        dst[2] = src[2];
        dst[3] = 255;
        return;
    }
    if a == 0 {
        return;
    }
    let inv = 255 - a;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * a + dst[c] as u32 * inv + 127) / 255) as u8;
    }
    dst[3] = ((a * 255 + dst[3] as u32 * inv + 127) / 255) as u8;
}
