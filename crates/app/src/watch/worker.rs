//! Render worker: folds snapshots into trajectories and writes frames.

use std::{io, path::Path, thread, time::Instant};

use crossbeam_channel::Receiver;
use relay::{Snapshot, telemetry};
use tracing::{debug, error};
use viz::{RenderStyle, Renderer, SurfaceError, TrajectoryStore};

use super::config::WatchConfig;

/// Spawn the thread that owns the trajectory store and renderer.
///
/// The worker exits once every sender for `snapshots` is dropped.
pub fn spawn_render_worker(
    config: &WatchConfig,
    snapshots: Receiver<Snapshot>,
) -> io::Result<thread::JoinHandle<()>> {
    let follow = config.follow.clone();
    let output = config.output.clone();
    let mut store = TrajectoryStore::new(config.trajectory_limit);
    let mut renderer = Renderer::new(config.initial_view(), 1.0, RenderStyle::default());
    renderer.resize(config.width, config.height, config.dpr);

    telemetry::spawn_thread("watch-render", move || {
        let worker_span = tracing::info_span!("render.worker", output = %output.display());
        let _worker_guard = worker_span.enter();

        while let Ok(first) = snapshots.recv() {
            let ingested = drain_into(&mut store, first, &snapshots);
            debug!(snapshots = ingested, entities = store.len(), "Snapshots ingested");

            let started = Instant::now();
            match render_frame(&mut renderer, &store, follow.as_deref(), &output) {
                Ok(()) => {
                    metrics::counter!("tracklive_frames_total").increment(1);
                    metrics::histogram!("tracklive_render_seconds")
                        .record(started.elapsed().as_secs_f64());
                }
                Err(err) => {
                    error!("Frame write failed: {err:?}");
                    metrics::counter!("tracklive_render_errors_total").increment(1);
                }
            }
        }
        debug!("Snapshot channel closed; render worker exiting");
    })
}

/// Ingest `first` and everything already queued behind it, in arrival order.
/// Every snapshot is folded in so no trajectory point is skipped.
fn drain_into(store: &mut TrajectoryStore, first: Snapshot, snapshots: &Receiver<Snapshot>) -> usize {
    store.ingest(&first);
    let mut ingested = 1;
    while let Ok(next) = snapshots.try_recv() {
        store.ingest(&next);
        ingested += 1;
    }
    ingested
}

fn render_frame(
    renderer: &mut Renderer,
    store: &TrajectoryStore,
    follow: Option<&str>,
    output: &Path,
) -> Result<(), SurfaceError> {
    tracing::info_span!("render.frame").in_scope(|| {
        renderer.draw(store, follow);
        renderer.surface().save_png(output)
    })
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use chrono::{DateTime, Duration};
    use relay::{ConnectionId, Entity};

    use super::*;

    fn snapshot(id: &str, lat: f64, lng: f64, secs: i64) -> Snapshot {
        let id = ConnectionId::from(id);
        let entity = Entity {
            id: id.clone(),
            lat,
            lng,
            name: "User".into(),
            last_update: DateTime::from_timestamp(1_700_000_000, 0).unwrap()
                + Duration::seconds(secs),
        };
        Snapshot::from([(id, entity)])
    }

    fn config(output: PathBuf) -> WatchConfig {
        WatchConfig {
            server_url: "ws://127.0.0.1:3000/ws".into(),
            follow: Some("a".into()),
            width: 64.0,
            height: 48.0,
            dpr: 2.0,
            scale: 100_000.0,
            trajectory_limit: 200,
            output,
        }
    }

    #[test]
    fn queued_snapshots_are_all_ingested() {
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 1..4 {
            tx.send(snapshot("a", 40.0 + i as f64 * 1e-4, -74.0, i)).unwrap();
        }
        let mut store = TrajectoryStore::default();
        let ingested = drain_into(&mut store, snapshot("a", 40.0, -74.0, 0), &rx);

        assert_eq!(ingested, 4);
        assert_eq!(store.get("a").unwrap().trajectory.len(), 4);
    }

    #[test]
    fn worker_writes_frame_and_stops_when_senders_drop() {
        let dir = std::env::temp_dir().join(format!("tracklive-worker-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let output = dir.join("frame.png");

        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_render_worker(&config(output.clone()), rx).unwrap();
        tx.send(snapshot("a", 40.0, -74.0, 0)).unwrap();
        drop(tx);
        handle.join().unwrap();

        let frame = image::open(&output).unwrap().to_rgba8();
        assert_eq!(frame.dimensions(), (128, 96));
        // Followed entity sits at the centre.
        assert_eq!(frame.get_pixel(64, 48)[3], 255);
        fs::remove_dir_all(&dir).unwrap();
    }
}
