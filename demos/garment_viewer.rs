//! `garment_viewer` — composites a sample customization onto a 3D garment
//! stand-in and saves a snapshot when `S` is pressed.
//!
//! Run with:
//!   cargo run --example garment_viewer

use std::sync::Arc;

use bevy::prelude::*;
use bevy_garment_texture::{
    AssetRef, Compositor, GarmentCamera, GarmentCompositor, GarmentMesh, GarmentSession,
    GarmentState, GarmentTexturePlugin, GraphicLayer, LayerId, MemoryFetcher, Offset, PatternRef,
    Placement, Rgb8, SnapshotReady, SnapshotRequest, TextLayer,
    capture::canonical_camera_pose,
    text::{load_font_file, locate_sans_font},
};

const DOTS_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16"><circle cx="8" cy="8" r="5" fill="#88aacc"/></svg>"##;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "bevy_garment_texture — viewer".into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(GarmentTexturePlugin)
        .insert_resource(demo_compositor())
        .add_systems(Startup, setup_scene)
        .add_systems(Update, (request_snapshot_on_key, save_ready_snapshots))
        .run();
}

/// In-memory assets so the demo runs without a network; a real application
/// would pass an `HttpFetcher` pointed at its asset store instead.
fn demo_compositor() -> GarmentCompositor {
    let mut fetcher = MemoryFetcher::new();
    fetcher.insert(
        "mem://pattern.svg",
        DOTS_SVG.as_bytes().to_vec(),
        Some("image/svg+xml"),
    );
    let logo = image::RgbaImage::from_pixel(64, 64, image::Rgba([200, 40, 40, 255]));
    let mut png = std::io::Cursor::new(Vec::new());
    logo.write_to(&mut png, image::ImageFormat::Png)
        .expect("encode demo png");
    fetcher.insert("mem://logo.png", png.into_inner(), Some("image/png"));

    let mut compositor = Compositor::new(Arc::new(fetcher));
    match locate_sans_font().map(load_font_file) {
        Some(Ok(font)) => compositor = compositor.with_font(font),
        _ => warn!("no system font found; text layers will be skipped"),
    }
    GarmentCompositor::new(compositor)
}

fn sample_state() -> GarmentState {
    let mut state = GarmentState::default()
        .with_base_color(Rgb8::new(235, 235, 245))
        .with_pattern(Some(PatternRef(AssetRef::Url("mem://pattern.svg".into()))));
    if let Ok(text) = TextLayer::new(
        LayerId::new("demo-text"),
        "HI",
        40.0,
        Rgb8::BLACK,
        Placement::Front,
        Offset::ZERO,
    ) {
        state = state.with_text_added(text);
    }
    if let Ok(graphic) = GraphicLayer::new(
        LayerId::new("demo-logo"),
        AssetRef::Url("mem://logo.png".into()),
        80.0,
        80.0,
        Placement::Back,
        Offset::new(10.0, 10.0),
    ) {
        state = state.with_graphic_added(graphic);
    }
    state
}

fn setup_scene(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((Camera3d::default(), canonical_camera_pose(), GarmentCamera));
    commands.spawn((
        DirectionalLight::default(),
        Transform::from_xyz(5.0, 5.0, 5.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    // Stand-in for the garment mesh; a real application loads its UV-mapped
    // shirt asset here.
    commands.spawn((
        Mesh3d(meshes.add(Cuboid::new(1.0, 1.2, 0.3))),
        MeshMaterial3d(materials.add(StandardMaterial::default())),
        GarmentMesh,
    ));

    commands.spawn(GarmentSession::new(sample_state()));
}

fn request_snapshot_on_key(
    mut commands: Commands,
    keys: Res<ButtonInput<KeyCode>>,
    compositor: Res<GarmentCompositor>,
) {
    if keys.just_pressed(KeyCode::KeyS) {
        commands.spawn(SnapshotRequest::after_latest(&compositor));
    }
}

fn save_ready_snapshots(mut commands: Commands, ready: Query<(Entity, &SnapshotReady)>) {
    for (entity, ready) in &ready {
        let path = "garment_snapshot.png";
        match std::fs::write(path, &ready.0.png) {
            Ok(()) => info!("saved {path} ({}×{})", ready.0.width, ready.0.height),
            Err(e) => error!("could not save {path}: {e}"),
        }
        commands.entity(entity).despawn();
    }
}
