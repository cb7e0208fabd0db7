//! Snapshot capture: a reproducible still image of the rendered garment.
//!
//! A capture is requested by spawning a [`SnapshotRequest`] component; when
//! the capture finishes, the same entity receives [`SnapshotReady`] (or
//! [`SnapshotFailed`]).  This is an explicit handle — no capture callback is
//! threaded through the scene.
//!
//! Ordering: a request records the publish sequence it must observe and only
//! proceeds once [`PublishedTexture`] has reached it, so the still image
//! always reflects the most recently published texture.  The driving system
//! then forces the canonical camera pose, lets one full frame render with
//! that pose and the swapped material, and only then reads the pixels back.
//! Given identical garment state and assets, two consecutive captures
//! produce identical PNG bytes.
//!
//! If the awaited cycle fails outright (allocation), the request keeps
//! waiting for the next successful publish; there are no timeouts in this
//! core.

use std::io::Cursor;

use bevy::{
    ecs::{
        component::Component,
        entity::Entity,
        observer::On,
        query::With,
        system::{Commands, Query, Res},
    },
    image::Image,
    log::error,
    math::Vec3,
    render::view::screenshot::{Screenshot, ScreenshotCaptured},
    transform::components::Transform,
};

use crate::{async_compose::GarmentCompositor, publish::PublishedTexture};

/// The render pass or pixel readback failed; no snapshot is produced.
/// Surfaced once to the requester, never retried automatically.
#[derive(Debug)]
pub enum CaptureError {
    /// The rendered pixels could not be read back into CPU memory.
    Readback { reason: String },
    /// The pixels were read back but could not be encoded as PNG.
    Encode { reason: String },
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Readback { reason } => {
                write!(f, "snapshot readback failed: {reason}")
            }
            CaptureError::Encode { reason } => {
                write!(f, "snapshot PNG encoding failed: {reason}")
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// A point-in-time still image of the rendered garment, as PNG bytes.
/// Immutable; handed to the caller and has no further lifecycle.
pub struct Snapshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Marker for the camera the capturer repositions.
#[derive(Component)]
pub struct GarmentCamera;

/// The fixed viewpoint used for every snapshot, independent of the user's
/// live orbit angle.
pub fn canonical_camera_pose() -> Transform {
    Transform::from_translation(Vec3::new(0.0, 0.0, 2.0)).looking_at(Vec3::ZERO, Vec3::Y)
}

enum RequestPhase {
    /// Waiting for the publish slot to reach the requested sequence.
    WaitingForPublish,
    /// Canonical pose applied; one frame must render before readback.
    PoseApplied,
    /// Screenshot spawned; the observer will finish the request.
    Capturing,
}

/// Spawn this component to request a snapshot.  The entity later receives
/// [`SnapshotReady`] or [`SnapshotFailed`].
#[derive(Component)]
pub struct SnapshotRequest {
    min_seq: u64,
    phase: RequestPhase,
}

impl SnapshotRequest {
    /// Capture once every composition cycle started so far has been
    /// published (or superseded by a newer published cycle).
    pub fn after_latest(compositor: &GarmentCompositor) -> Self {
        Self::after(compositor.latest_seq())
    }

    /// Capture once the publish slot reaches sequence `min_seq`.
    pub fn after(min_seq: u64) -> Self {
        Self {
            min_seq,
            phase: RequestPhase::WaitingForPublish,
        }
    }
}

/// Added to the request entity when its snapshot is ready.
#[derive(Component)]
pub struct SnapshotReady(pub Snapshot);

/// Added to the request entity when the capture failed.
#[derive(Component)]
pub struct SnapshotFailed(pub CaptureError);

/// Bevy system — drives pending snapshot requests through their phases.
///
/// Each request spends at least one frame in `PoseApplied` so a render pass
/// consumes the canonical pose and the latest material swap before pixels
/// are read back.
pub fn process_snapshot_requests(
    mut commands: Commands,
    published: Res<PublishedTexture>,
    mut requests: Query<(Entity, &mut SnapshotRequest)>,
    mut cameras: Query<&mut Transform, With<GarmentCamera>>,
) {
    for (entity, mut request) in &mut requests {
        match request.phase {
            RequestPhase::WaitingForPublish => {
                if published.seq() >= request.min_seq {
                    for mut transform in &mut cameras {
                        *transform = canonical_camera_pose();
                    }
                    request.phase = RequestPhase::PoseApplied;
                }
            }
            RequestPhase::PoseApplied => {
                let target = entity;
                commands.spawn(Screenshot::primary_window()).observe(
                    move |captured: On<ScreenshotCaptured>, mut commands: Commands| {
                        // The requester may have despawned while the GPU
                        // readback was in flight; drop the result then.
                        let Ok(mut requester) = commands.get_entity(target) else {
                            return;
                        };
                        match encode_snapshot(&captured.event().image) {
                            Ok(snapshot) => {
                                requester.insert(SnapshotReady(snapshot));
                            }
                            Err(e) => {
                                error!("snapshot capture failed: {e}");
                                requester.insert(SnapshotFailed(e));
                            }
                        }
                        requester.remove::<SnapshotRequest>();
                    },
                );
                request.phase = RequestPhase::Capturing;
            }
            RequestPhase::Capturing => {}
        }
    }
}

/// Encode a read-back frame as PNG bytes.
fn encode_snapshot(frame: &Image) -> Result<Snapshot, CaptureError> {
    let dynamic = frame
        .clone()
        .try_into_dynamic()
        .map_err(|e| CaptureError::Readback {
            reason: e.to_string(),
        })?;
    let rgba = dynamic.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut out = Cursor::new(Vec::new());
    rgba.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| CaptureError::Encode {
            reason: e.to_string(),
        })?;
    Ok(Snapshot {
        png: out.into_inner(),
        width,
        height,
    })
}
