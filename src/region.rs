//! Placement-to-region mapping for the garment's UV unwrap.
//!
//! The garment mesh is a fixed UV-mapped surface; its front and back torso
//! panels occupy two known rectangles of the flattened texture space.  This
//! module is the single source of truth for those rectangles: every layer
//! tagged `Front` shares the front rectangle, every layer tagged `Back`
//! shares the back one, and individual layers are positioned by an offset
//! relative to the rectangle's centre.
//!
//! ## Coordinate convention
//! UV coordinates are normalized to `[0, 1]` with `v` growing upward, while
//! raster rows grow downward.  [`SurfaceRegion::to_pixel_rect`] performs the
//! flip (`y = (1 - v_max) · size`), so pixel-space callers never deal with
//! the inversion themselves.

use serde::{Deserialize, Serialize};

/// Which torso panel of the garment a layer is drawn on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placement {
    Front,
    Back,
}

/// Normalized UV rectangle of a torso panel on the flattened surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceRegion {
    pub u_min: f32,
    pub u_max: f32,
    pub v_min: f32,
    pub v_max: f32,
}

/// Front torso panel bounds in the garment's UV unwrap.
const FRONT_REGION: SurfaceRegion = SurfaceRegion {
    u_min: 0.414,
    u_max: 0.661,
    v_min: 0.161,
    v_max: 0.280,
};

/// Back torso panel bounds in the garment's UV unwrap.
const BACK_REGION: SurfaceRegion = SurfaceRegion {
    u_min: 0.073,
    u_max: 0.271,
    v_min: 0.675,
    v_max: 0.836,
};

/// Map a placement to its panel rectangle.
///
/// Pure and total — the table is fixed by the mesh's UV unwrap and is not
/// user-configurable.
pub fn map_placement(placement: Placement) -> SurfaceRegion {
    match placement {
        Placement::Front => FRONT_REGION,
        Placement::Back => BACK_REGION,
    }
}

/// A rectangle in raster pixel space.  Coordinates are signed so that layer
/// offsets may legally push a destination outside the panel (or the surface).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl PixelRect {
    /// Centre point of the rectangle.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w * 0.5, self.y + self.h * 0.5)
    }

    /// Top-left corner that centres a `w × h` child in this rectangle, then
    /// shifts it by `(dx, dy)`.  This is the destination rule shared by text
    /// and graphic layers: `region centre + offset`, with no clamping.
    pub fn place_centered(&self, w: f32, h: f32, dx: f32, dy: f32) -> PixelRect {
        PixelRect {
            x: self.x + (self.w - w) * 0.5 + dx,
            y: self.y + (self.h - h) * 0.5 + dy,
            w,
            h,
        }
    }
}

impl SurfaceRegion {
    /// Convert the normalized region to pixel space on a square surface of
    /// `size × size` texels, flipping the v axis into raster row order.
    pub fn to_pixel_rect(&self, size: u32) -> PixelRect {
        let size = size as f32;
        PixelRect {
            x: self.u_min * size,
            y: (1.0 - self.v_max) * size,
            w: (self.u_max - self.u_min) * size,
            h: (self.v_max - self.v_min) * size,
        }
    }

    /// True when `self` and `other` share no UV area.
    pub fn is_disjoint(&self, other: &SurfaceRegion) -> bool {
        self.u_max <= other.u_min
            || other.u_max <= self.u_min
            || self.v_max <= other.v_min
            || other.v_max <= self.v_min
    }
}
