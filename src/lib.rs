//! `bevy_garment_texture` — garment surface texture compositing for Bevy.
//!
//! # Architecture
//! An editing session owns a [`GarmentState`](state::GarmentState): base
//! colour, optional tileable pattern, and ordered text/graphic layer lists.
//! Every state replacement starts one background composition cycle that
//! bakes the layers into a single 1024×1024 surface texture
//! ([`Compositor`](compose::Compositor)), which is then published atomically
//! onto the garment mesh's material ([`publish`]) and can be captured as a
//! reproducible PNG still from a canonical camera pose ([`capture`]).
//!
//! Cycles are sequence-numbered and publishing is latest-wins, so a slow
//! stale bake can never overwrite a fresher texture.

pub mod assets;
pub mod async_compose;
pub mod capture;
pub mod compose;
pub mod publish;
pub mod region;
pub mod state;
pub mod surface;
pub mod text;

#[cfg(feature = "network")]
pub use assets::HttpFetcher;
pub use assets::{AssetFetcher, AssetLoadError, AssetRef, MemoryFetcher};
pub use async_compose::{GarmentCompositor, GarmentSession, PendingComposition};
pub use capture::{
    CaptureError, GarmentCamera, Snapshot, SnapshotFailed, SnapshotReady, SnapshotRequest,
};
pub use compose::{CompositedTexture, ComposeError, Compositor};
pub use publish::{GarmentMesh, PublishedTexture};
pub use region::{Placement, SurfaceRegion, map_placement};
pub use state::{GarmentState, GraphicLayer, LayerId, Offset, PatternRef, Rgb8, TextLayer};

use bevy::prelude::*;

/// Bevy plugin — registers the composition, publishing, and capture systems.
///
/// The application must insert a [`GarmentCompositor`] resource (it carries
/// the asset fetcher and label font) before spawning any
/// [`GarmentSession`].
pub struct GarmentTexturePlugin;

impl Plugin for GarmentTexturePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<publish::PublishedTexture>().add_systems(
            Update,
            (
                async_compose::watch_garment_sessions,
                async_compose::poll_composition_tasks,
                publish::apply_garment_material,
                capture::process_snapshot_requests,
            )
                .chain(),
        );
    }
}
