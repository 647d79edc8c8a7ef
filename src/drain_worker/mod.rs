//! DrainWorker - Engine output fan-out
//!
//! ## Responsibilities
//!
//! - Poll the shared engine for completed frames on a blocking thread
//! - Route each frame to its session's output queue by `session_id`
//! - Pair completions with dispatch timestamps (SLO latency)
//! - Hand full metric windows to the async runtime for persistence
//!
//! Polling never touches the event loop: the output queues are lock
//! protected and wake their async readers through `Notify`.

use crate::inference_engine::EngineHandle;
use crate::models::Frame;
use crate::session_registry::SessionRegistry;
use crate::slo_metrics::SloMetricsCollector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct DrainWorker {
    engine: EngineHandle,
    registry: Arc<SessionRegistry>,
    metrics: Arc<SloMetricsCollector>,
    /// Sleep after an empty poll
    poll_interval: Duration,
    /// Runtime that runs metric persistence
    runtime: Handle,
}

impl DrainWorker {
    pub fn new(
        engine: EngineHandle,
        registry: Arc<SessionRegistry>,
        metrics: Arc<SloMetricsCollector>,
        poll_interval: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            registry,
            metrics,
            poll_interval,
            runtime,
        }
    }

    /// Start polling on the blocking pool until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run(&cancel))
    }

    fn run(&self, cancel: &CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Drain worker started"
        );

        let mut routed: u64 = 0;
        while !cancel.is_cancelled() {
            let n = self.drain_once();
            if n == 0 {
                std::thread::sleep(self.poll_interval);
            }
            routed += n as u64;
        }

        tracing::info!(frames_routed = routed, "Drain worker stopped");
    }

    /// One poll: route everything the engine has ready
    ///
    /// Returns the number of frames polled.
    pub fn drain_once(&self) -> usize {
        let frames = match self.engine.produce_completed() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "Engine poll failed");
                return 0;
            }
        };
        if frames.is_empty() {
            return 0;
        }

        let total = frames.len();
        let completed_at = Instant::now();
        for (session_id, frames) in group_by_session(frames) {
            self.route(session_id, frames, completed_at);
        }
        total
    }

    fn route(&self, session_id: Uuid, frames: Vec<Frame>, completed_at: Instant) {
        let Some(session) = self.registry.get(&session_id) else {
            tracing::debug!(
                session_id = %session_id,
                frames = frames.len(),
                "Dropping frames for departed session"
            );
            return;
        };
        if session.output().is_closed() {
            return;
        }

        if let Some(report) = self
            .metrics
            .record_completions(&session, frames.len(), completed_at)
        {
            let metrics = self.metrics.clone();
            self.runtime.spawn(async move {
                if let Err(e) = metrics.persist(&report).await {
                    tracing::error!(
                        session_id = %report.session_id,
                        error = %e,
                        "Failed to persist SLO window"
                    );
                }
            });
        }

        let mut evicted = 0;
        for frame in frames {
            if session.output().push(frame).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::trace!(
                session_id = %session_id,
                evicted,
                queue_len = session.output().len(),
                "Output queue full, dropped oldest frames"
            );
        }
    }
}

/// Split a poll into per-session runs, keeping first-seen session order and
/// per-session frame order
fn group_by_session(frames: Vec<Frame>) -> Vec<(Uuid, Vec<Frame>)> {
    let mut groups: Vec<(Uuid, Vec<Frame>)> = Vec::new();
    for frame in frames {
        match groups.iter_mut().find(|(id, _)| *id == frame.session_id) {
            Some((_, group)) => group.push(frame),
            None => groups.push((frame.session_id, vec![frame])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference_engine::EchoEngine;
    use crate::models::{InputMode, ParamSet};
    use crate::session_registry::{ClientHandle, RegistryConfig, Session};
    use crate::slo_metrics::MetricsConfig;
    use axum::body::Bytes;

    struct Harness {
        registry: Arc<SessionRegistry>,
        engine: EngineHandle,
        metrics: Arc<SloMetricsCollector>,
        worker: DrainWorker,
    }

    fn harness(metrics: MetricsConfig, output_capacity: usize) -> Harness {
        let registry = Arc::new(SessionRegistry::new(
            RegistryConfig {
                output_capacity,
                ..RegistryConfig::default()
            },
            CancellationToken::new(),
        ));
        let engine = EngineHandle::new(EchoEngine::new(InputMode::Image));
        let metrics = Arc::new(SloMetricsCollector::new(metrics));
        let worker = DrainWorker::new(
            engine.clone(),
            registry.clone(),
            metrics.clone(),
            Duration::from_millis(1),
            Handle::current(),
        );
        Harness {
            registry,
            engine,
            metrics,
            worker,
        }
    }

    async fn connect(h: &Harness) -> Arc<Session> {
        let (client, _rx) = ClientHandle::channel();
        h.registry.connect(Uuid::new_v4(), client).await.unwrap()
    }

    fn submit(h: &Harness, session: &Session, image: &'static [u8]) {
        h.metrics.record_dispatch(session, Instant::now());
        let params = ParamSet {
            image: Some(Bytes::from_static(image)),
            ..ParamSet::default()
        };
        h.engine.accept(session.id(), params).unwrap();
    }

    fn enabled() -> MetricsConfig {
        MetricsConfig {
            enabled: true,
            ..MetricsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_routes_frames_to_owning_session() {
        let h = harness(MetricsConfig::default(), 8);
        let a = connect(&h).await;
        let b = connect(&h).await;

        submit(&h, &a, b"a0");
        submit(&h, &b, b"b0");
        submit(&h, &a, b"a1");
        assert_eq!(h.worker.drain_once(), 3);

        assert_eq!(a.output().try_pop().unwrap().data, Bytes::from_static(b"a0"));
        assert_eq!(a.output().try_pop().unwrap().data, Bytes::from_static(b"a1"));
        assert_eq!(b.output().try_pop().unwrap().data, Bytes::from_static(b"b0"));
        assert!(a.output().is_empty());
    }

    #[tokio::test]
    async fn test_frames_for_unknown_session_are_dropped() {
        let h = harness(MetricsConfig::default(), 8);
        let a = connect(&h).await;
        h.engine
            .accept(
                Uuid::new_v4(),
                ParamSet {
                    image: Some(Bytes::from_static(b"orphan")),
                    ..ParamSet::default()
                },
            )
            .unwrap();
        submit(&h, &a, b"mine");

        assert_eq!(h.worker.drain_once(), 2);
        assert_eq!(a.output().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_pairs_with_oldest_dispatch() {
        let h = harness(enabled(), 8);
        let a = connect(&h).await;
        let t0 = Instant::now();
        for i in 0..3u64 {
            h.metrics
                .record_dispatch(&a, t0 + Duration::from_millis(10 * i));
        }
        for image in [&b"x"[..], b"y"] {
            h.engine
                .accept(
                    a.id(),
                    ParamSet {
                        image: Some(Bytes::from_static(image)),
                        ..ParamSet::default()
                    },
                )
                .unwrap();
        }

        h.worker.drain_once();

        let state = a.metrics().lock();
        assert_eq!(state.history().len(), 2);
        assert!(state.history()[0] >= state.history()[1]);
        assert_eq!(state.pending_len(), 1);
        assert_eq!(state.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_reader_loses_oldest_frames() {
        let h = harness(MetricsConfig::default(), 2);
        let a = connect(&h).await;
        for image in [&b"0"[..], b"1", b"2", b"3"] {
            submit(&h, &a, image);
        }
        h.worker.drain_once();

        assert_eq!(a.output().len(), 2);
        assert_eq!(a.output().try_pop().unwrap().data, Bytes::from_static(b"2"));
        assert_eq!(a.output().dropped_count(), 2);
    }

    #[tokio::test]
    async fn test_flush_threshold_persists_window() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            MetricsConfig {
                enabled: true,
                flush_batches: 1,
                output_dir: dir.path().to_path_buf(),
                ..MetricsConfig::default()
            },
            8,
        );
        let a = connect(&h).await;
        submit(&h, &a, b"frame");
        h.worker.drain_once();

        let deadline = Instant::now() + Duration::from_secs(2);
        let expected = format!("statistics_{}.json", a.id());
        let mut found = false;
        while !found && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
            found = walk(dir.path()).iter().any(|name| name == &expected);
        }
        assert!(found);
        assert_eq!(a.metrics().lock().batch_count(), 0);
    }

    fn walk(root: &std::path::Path) -> Vec<String> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root).into_iter().flatten().flatten() {
            let path = entry.path();
            if path.is_dir() {
                names.extend(walk(&path));
            } else if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        }
        names
    }

    #[tokio::test]
    async fn test_spawned_worker_stops_on_cancel() {
        let h = harness(MetricsConfig::default(), 8);
        let a = connect(&h).await;
        let worker = DrainWorker::new(
            h.engine.clone(),
            h.registry.clone(),
            h.metrics.clone(),
            Duration::from_millis(1),
            Handle::current(),
        );
        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());

        submit(&h, &a, b"live");
        let frame = tokio::time::timeout(Duration::from_secs(2), a.output().pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.data, Bytes::from_static(b"live"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
