//! Texture publishing: installs a finished [`CompositedTexture`] as the live
//! surface texture of every garment mesh.
//!
//! The single shared slot is [`PublishedTexture`].  It is replaced, never
//! mutated in place: [`PublishedTexture::install`] swaps the whole image
//! handle under a sequence-number guard, so the renderer observes either the
//! fully-previous or fully-new texture and a stale cycle can never clobber a
//! fresher one.  [`apply_garment_material`] pushes the handle (and the
//! session's base colour as the material tint) onto every
//! [`GarmentMesh`]-marked material, which marks the material changed and
//! schedules a re-render.

use std::sync::OnceLock;

use bevy::{
    asset::{Assets, Handle, RenderAssetUsages},
    color::Color,
    ecs::{
        change_detection::DetectChanges,
        component::Component,
        query::{Changed, With},
        resource::Resource,
        system::{Query, Res, ResMut},
    },
    image::{Image, ImageAddressMode, ImageSampler, ImageSamplerDescriptor},
    pbr::{MeshMaterial3d, StandardMaterial},
    render::render_resource::{Extent3d, TextureDimension, TextureFormat},
};

use crate::{async_compose::GarmentSession, compose::CompositedTexture, state::Rgb8};

/// Marker for mesh entities whose material shows the published texture.
#[derive(Component)]
pub struct GarmentMesh;

/// The single live-texture slot shared by all garment meshes.
///
/// `seq` is the sequence number of the cycle that produced the current
/// handle; `0` means nothing has been published yet.
#[derive(Resource, Default)]
pub struct PublishedTexture {
    seq: u64,
    handle: Option<Handle<Image>>,
}

impl PublishedTexture {
    /// Sequence number of the currently published cycle.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Handle of the currently published image, if any cycle has published.
    pub fn handle(&self) -> Option<&Handle<Image>> {
        self.handle.as_ref()
    }

    /// True when a cycle with number `seq` would be accepted for publishing.
    pub fn is_newer(&self, seq: u64) -> bool {
        seq > self.seq
    }

    /// Atomically replace the published texture, enforcing latest-wins.
    ///
    /// Returns `false` (leaving the slot untouched) when `seq` is not newer
    /// than the published cycle.  The superseded handle is dropped here,
    /// which releases the previous image once the renderer stops using it.
    pub fn install(&mut self, seq: u64, handle: Handle<Image>) -> bool {
        if !self.is_newer(seq) {
            return false;
        }
        self.seq = seq;
        self.handle = Some(handle);
        true
    }
}

/// Wrap a composited texture in a Bevy [`Image`] ready for the garment
/// material: sRGB format, clamp-to-edge sampling (the surface must not
/// tile across the UV seam), and sRGB-aware mipmaps.
///
/// Takes the texture by value to move the pixel buffer straight into the
/// image asset.
pub fn texture_to_image(texture: CompositedTexture) -> Image {
    let size = texture.size;
    let mut image = Image::new(
        Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        texture.pixels,
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::default(),
    );
    // Image::new always sets data; length equals width * height * 4.
    let base_data = image.data.take().unwrap();
    let (mip_data, mip_level_count) = generate_mipmaps(base_data, size, size);
    image.texture_descriptor.mip_level_count = mip_level_count;
    image.data = Some(mip_data);
    image.sampler = ImageSampler::Descriptor(ImageSamplerDescriptor {
        address_mode_u: ImageAddressMode::ClampToEdge,
        address_mode_v: ImageAddressMode::ClampToEdge,
        // wgpu requires all filter modes to be Linear when anisotropy_clamp > 1.
        mag_filter: bevy::image::ImageFilterMode::Linear,
        min_filter: bevy::image::ImageFilterMode::Linear,
        mipmap_filter: bevy::image::ImageFilterMode::Linear,
        anisotropy_clamp: 16,
        ..Default::default()
    });
    image
}

/// Bevy system — applies the published texture and the session's base colour
/// to every garment material.
///
/// The base colour rides on the material as a tint rather than being baked
/// into the texture, matching how the compositor always paints on a neutral
/// white backdrop.
pub fn apply_garment_material(
    published: Res<PublishedTexture>,
    sessions: Query<&GarmentSession>,
    replaced_sessions: Query<(), Changed<GarmentSession>>,
    garments: Query<&MeshMaterial3d<StandardMaterial>, With<GarmentMesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    if !published.is_changed() && replaced_sessions.is_empty() {
        return;
    }
    let tint = sessions
        .iter()
        .next()
        .map(|s| s.state().base_color)
        .unwrap_or(Rgb8::WHITE);

    for material_handle in &garments {
        if let Some(material) = materials.get_mut(&material_handle.0) {
            material.base_color_texture = published.handle().cloned();
            material.base_color = Color::srgb_u8(tint.r, tint.g, tint.b);
        }
    }
}

// --- mipmap generation ------------------------------------------------------

/// Decode an sRGB u8 value to linear-light f32.
fn srgb_to_linear(v: u8) -> f32 {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        std::array::from_fn(|i| {
            let c = i as f32 / 255.0;
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        })
    })[v as usize]
}

/// Convert a linear-light `f32` in `[0, 1]` to an sRGB-encoded `u8`.
///
/// A 4096-entry table keeps the quantisation error below one u8 count; a
/// 256-entry table would leave the steep low end of the sRGB curve with
/// unreachable output values.
fn linear_to_srgb(linear: f32) -> u8 {
    const N: usize = 4096;
    static LUT: OnceLock<[u8; N]> = OnceLock::new();
    let lut = LUT.get_or_init(|| {
        std::array::from_fn(|i| {
            let c = i as f32 / (N - 1) as f32;
            let encoded = if c <= 0.003_130_8 {
                c * 12.92
            } else {
                1.055 * c.powf(1.0 / 2.4) - 0.055
            };
            (encoded * 255.0).round() as u8
        })
    });
    lut[(linear.clamp(0.0, 1.0) * (N - 1) as f32).round() as usize]
}

/// Average a block of sRGB RGBA8 pixels in linear light.
///
/// Averaging in non-linear space makes mipmaps artificially dark; alpha is
/// already linear and averages directly.
fn average_block(pixels: &[[u8; 4]]) -> [u8; 4] {
    let n = pixels.len() as f32;
    let mut r = 0.0f32;
    let mut g = 0.0f32;
    let mut b = 0.0f32;
    let mut a = 0u32;
    for p in pixels {
        r += srgb_to_linear(p[0]);
        g += srgb_to_linear(p[1]);
        b += srgb_to_linear(p[2]);
        a += p[3] as u32;
    }
    [
        linear_to_srgb(r / n),
        linear_to_srgb(g / n),
        linear_to_srgb(b / n),
        (a / pixels.len() as u32) as u8,
    ]
}

/// Recursively downsamples a base RGBA8 image to generate all mipmap levels.
///
/// Appends each successive level (half width, half height) onto `data` using
/// a 2×2 box filter in linear light.  Non-power-of-two dimensions are
/// handled by clamping the source block to the image boundary.  Returns the
/// expanded buffer and the total level count (including level 0).
fn generate_mipmaps(mut data: Vec<u8>, base_width: u32, base_height: u32) -> (Vec<u8>, u32) {
    let mut mip_level_count = 1u32;
    let mut current_width = base_width as usize;
    let mut current_height = base_height as usize;
    let mut prev_offset = 0usize;

    while current_width > 1 || current_height > 1 {
        let next_width = current_width.max(2) / 2;
        let next_height = current_height.max(2) / 2;
        let next_offset = data.len();

        data.resize(next_offset + next_width * next_height * 4, 0);

        for y in 0..next_height {
            for x in 0..next_width {
                let dst_idx = next_offset + (y * next_width + x) * 4;
                let sx = x * 2;
                let sy = y * 2;

                let mut pixels = [[0u8; 4]; 4];
                let mut count = 0usize;

                for dy in 0..2usize {
                    if sy + dy >= current_height {
                        continue;
                    }
                    for dx in 0..2usize {
                        if sx + dx >= current_width {
                            continue;
                        }
                        let src_idx = prev_offset + ((sy + dy) * current_width + (sx + dx)) * 4;
                        pixels[count] = [
                            data[src_idx],
                            data[src_idx + 1],
                            data[src_idx + 2],
                            data[src_idx + 3],
                        ];
                        count += 1;
                    }
                }

                let avg = average_block(&pixels[..count]);
                data[dst_idx..dst_idx + 4].copy_from_slice(&avg);
            }
        }

        prev_offset = next_offset;
        current_width = next_width;
        current_height = next_height;
        mip_level_count += 1;
    }

    (data, mip_level_count)
}
