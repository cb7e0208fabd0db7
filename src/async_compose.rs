//! Asynchronous composition cycles.
//!
//! Baking a garment state does blocking asset fetches plus CPU pixel work,
//! so cycles run on a private, bounded [`rayon`] thread pool instead of the
//! main thread.  The pool is limited to [`MAX_COMPOSE_THREADS`] concurrent
//! cycles; excess requests queue inside the pool rather than spawning
//! unbounded OS threads.  [`poll_composition_tasks`] checks for completion
//! each frame with [`mpsc::Receiver::try_recv`] and publishes the result.
//!
//! Every cycle carries a sequence number minted when it *starts*.  Publishing
//! is latest-wins: a cycle that finishes after a newer cycle has already
//! published is discarded, never published, so an in-flight stale bake can
//! never overwrite a fresher texture.  Superseded cycles are not hard-
//! cancelled; ones that have not started yet observe a drop-triggered
//! cancellation flag and exit without doing any work.
//!
//! # Usage
//! ```rust,ignore
//! app.insert_resource(GarmentCompositor::new(
//!     Compositor::new(Arc::new(HttpFetcher::new())).with_font(font),
//! ));
//! // Spawn one session; replace its state to trigger a cycle.
//! commands.spawn(GarmentSession::new(GarmentState::default()));
//! ```

/// Maximum number of composition cycles that run concurrently.
const MAX_COMPOSE_THREADS: usize = 4;

/// Returns the library-private rayon thread pool used for composition.
///
/// Isolated from the application's global rayon pool so texture bakes (and
/// the blocking asset fetches inside them) do not starve unrelated parallel
/// workloads.
fn compose_pool() -> &'static rayon::ThreadPool {
    static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(MAX_COMPOSE_THREADS)
            .thread_name(|i| format!("garment-compose-{i}"))
            .build()
            .expect("failed to build composition thread pool")
    })
}

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc,
};

use bevy::{
    asset::Assets,
    ecs::{
        component::Component,
        entity::Entity,
        query::Changed,
        resource::Resource,
        system::{Commands, Query, Res, ResMut},
    },
    image::Image,
    log::{debug, error},
};

use crate::{
    compose::{CompositedTexture, ComposeError, Compositor},
    publish::{PublishedTexture, texture_to_image},
    state::GarmentState,
};

/// Resource wrapping the [`Compositor`] plus the cycle sequence counter.
///
/// Insert one before spawning any [`GarmentSession`]; the
/// [`GarmentTexturePlugin`](crate::GarmentTexturePlugin) systems require it
/// and every session shares it.
#[derive(Resource)]
pub struct GarmentCompositor {
    compositor: Compositor,
    next_seq: AtomicU64,
}

impl GarmentCompositor {
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Sequence number of the most recently started cycle.  Snapshot
    /// requests use this as the publish bound they must observe.
    pub fn latest_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }

    /// Start a background bake of `state` and return the pending handle.
    pub fn begin_cycle(&self, state: &GarmentState) -> PendingComposition {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let compositor = self.compositor.clone();
        let state = state.clone();

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let (tx, rx) = mpsc::sync_channel(1);
        compose_pool().spawn(move || {
            // Skip the whole bake if a newer state already replaced this one.
            if !flag.load(Ordering::Relaxed) {
                tx.send(compositor.compose(&state)).ok();
            }
        });

        PendingComposition {
            rx: std::sync::Mutex::new(rx),
            cancelled,
            seq,
        }
    }
}

/// One editing session's garment state, owned by a single entity.
///
/// The state is replaced wholesale through [`GarmentSession::replace_state`];
/// change detection on the component is what starts a composition cycle, so
/// one replacement equals one cycle.
#[derive(Component)]
pub struct GarmentSession {
    state: GarmentState,
}

impl GarmentSession {
    pub fn new(state: GarmentState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &GarmentState {
        &self.state
    }

    /// Atomically replace the whole state snapshot.
    pub fn replace_state(&mut self, state: GarmentState) {
        self.state = state;
    }
}

/// In-flight composition cycle attached to its session entity.
///
/// Dropping it (the session despawned, or a newer cycle replaced it) sets the
/// cancellation flag so not-yet-started bakes exit early.
#[derive(Component)]
pub struct PendingComposition {
    // Wrapped in Mutex so the struct is Sync, which Bevy's Component bound requires.
    rx: std::sync::Mutex<mpsc::Receiver<Result<CompositedTexture, ComposeError>>>,
    /// Set to `true` on drop; the background bake checks this before starting.
    cancelled: Arc<AtomicBool>,
    /// Cycle sequence number, minted at start time.
    seq: u64,
}

impl PendingComposition {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for PendingComposition {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Bevy system — starts a cycle for every session whose state was replaced.
///
/// Inserting the new [`PendingComposition`] drops any previous one on the
/// entity, which cancels a not-yet-started stale bake in the same motion.
pub fn watch_garment_sessions(
    mut commands: Commands,
    compositor: Res<GarmentCompositor>,
    sessions: Query<(Entity, &GarmentSession), Changed<GarmentSession>>,
) {
    for (entity, session) in &sessions {
        let pending = compositor.begin_cycle(session.state());
        debug!("starting composition cycle {}", pending.seq());
        commands.entity(entity).insert(pending);
    }
}

/// Bevy system — polls pending cycles and publishes finished textures.
///
/// The latest-wins guard lives in [`PublishedTexture::install`]: a finished
/// cycle older than the currently published one is dropped before its pixels
/// are even uploaded.  A failed or panicked cycle is logged once and the
/// previously published texture stays live.
pub fn poll_composition_tasks(
    mut commands: Commands,
    tasks: Query<(Entity, &PendingComposition)>,
    mut images: ResMut<Assets<Image>>,
    mut published: ResMut<PublishedTexture>,
) {
    for (entity, pending) in &tasks {
        let poll = pending
            .rx
            .lock()
            .expect("composition worker poisoned")
            .try_recv();
        match poll {
            Ok(Ok(texture)) => {
                if published.is_newer(pending.seq) {
                    let handle = images.add(texture_to_image(texture));
                    published.install(pending.seq, handle);
                    debug!("published composition cycle {}", pending.seq);
                } else {
                    debug!(
                        "discarding stale composition cycle {} (published: {})",
                        pending.seq,
                        published.seq()
                    );
                }
                commands.entity(entity).remove::<PendingComposition>();
            }
            Ok(Err(e)) => {
                error!("composition cycle {} failed: {e}", pending.seq);
                commands.entity(entity).remove::<PendingComposition>();
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                error!("composition cycle {} worker panicked", pending.seq);
                commands.entity(entity).remove::<PendingComposition>();
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }
    }
}
