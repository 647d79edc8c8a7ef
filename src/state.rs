//! Application state
//!
//! Holds the configuration and all shared components

use crate::control_plane::ControlPlaneConfig;
use crate::dispatch_loop::DispatchConfig;
use crate::inference_engine::EngineHandle;
use crate::lifecycle::{LifecycleConfig, LifecycleController};
use crate::session_registry::{RegistryConfig, SessionRegistry};
use crate::slo_metrics::{MetricsConfig, SloMetricsCollector};
use crate::stream_pacer::PacerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Maximum concurrent sessions (0 = unbounded)
    pub max_queue_size: usize,
    /// Control-plane idle timeout in seconds (0 = disabled)
    pub session_timeout_sec: u64,
    /// Ingest rate limit and upload replay rate
    pub ingest_fps: f64,
    /// Output pacing band
    pub output_min_fps: f64,
    pub output_max_fps: f64,
    /// Per-session output buffer
    pub output_queue_capacity: usize,
    /// DrainWorker sleep after an empty poll
    pub drain_poll_interval_ms: u64,
    /// SLO metrics collection
    pub enable_metrics: bool,
    pub target_latency_sec: f64,
    pub metrics_flush_batches: u64,
    pub metrics_dir: PathBuf,
    /// Run-directory tags
    pub pipeline_step: u32,
    pub gpu_ids: String,
    /// Frontend assets served at `/`
    pub static_dir: Option<PathBuf>,
    /// Join deadline for tasks and the DrainWorker on teardown
    pub shutdown_timeout_ms: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 7860),
            max_queue_size: env_or("MAX_QUEUE_SIZE", 0),
            session_timeout_sec: env_or("SESSION_TIMEOUT_SEC", 0),
            ingest_fps: env_or("INGEST_FPS", 16.0),
            output_min_fps: env_or("OUTPUT_MIN_FPS", 5.0),
            output_max_fps: env_or("OUTPUT_MAX_FPS", 30.0),
            output_queue_capacity: env_or("OUTPUT_QUEUE_CAPACITY", 64),
            drain_poll_interval_ms: env_or("DRAIN_POLL_INTERVAL_MS", 8),
            enable_metrics: env_or("ENABLE_METRICS", false),
            target_latency_sec: env_or("TARGET_LATENCY_SEC", 0.3),
            metrics_flush_batches: env_or("METRICS_FLUSH_BATCHES", 1000),
            metrics_dir: std::env::var("METRICS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./slo_metrics")),
            pipeline_step: env_or("PIPELINE_STEP", 1),
            gpu_ids: std::env::var("GPU_IDS").unwrap_or_else(|_| "0".to_string()),
            static_dir: std::env::var("STATIC_DIR").ok().map(PathBuf::from),
            shutdown_timeout_ms: env_or("SHUTDOWN_TIMEOUT_MS", 5000),
        }
    }
}

impl AppConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.session_timeout_sec > 0).then(|| Duration::from_secs(self.session_timeout_sec))
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_sessions: self.max_queue_size,
            output_capacity: self.output_queue_capacity,
            join_timeout: self.shutdown_timeout(),
        }
    }

    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.enable_metrics,
            target_latency: self.target_latency_sec,
            flush_batches: self.metrics_flush_batches,
            output_dir: self.metrics_dir.clone(),
            step: self.pipeline_step,
            gpu_ids: self.gpu_ids.clone(),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            poll_interval: Duration::from_millis(self.drain_poll_interval_ms.max(1)),
            join_timeout: self.shutdown_timeout(),
        }
    }

    pub fn pacer_config(&self) -> PacerConfig {
        PacerConfig {
            min_fps: self.output_min_fps,
            max_fps: self.output_max_fps,
            ..PacerConfig::default()
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            ingest_fps: self.ingest_fps,
            ..DispatchConfig::default()
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// SessionRegistry (connected clients)
    pub registry: Arc<SessionRegistry>,
    /// Shared inference engine
    pub engine: EngineHandle,
    /// SloMetricsCollector
    pub metrics: Arc<SloMetricsCollector>,
    /// LifecycleController (DrainWorker + shutdown)
    pub lifecycle: Arc<LifecycleController>,
}

impl AppState {
    /// Wire every component under the root `cancel` token
    ///
    /// The DrainWorker is not started; call `lifecycle.start()`.
    pub fn new(config: AppConfig, engine: EngineHandle, cancel: CancellationToken) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            config.registry_config(),
            cancel.child_token(),
        ));
        let metrics = Arc::new(SloMetricsCollector::new(config.metrics_config()));
        let lifecycle = Arc::new(LifecycleController::new(
            registry.clone(),
            engine.clone(),
            metrics.clone(),
            config.lifecycle_config(),
            cancel,
        ));

        Self {
            config,
            registry,
            engine,
            metrics,
            lifecycle,
        }
    }

    pub fn control_config(&self) -> ControlPlaneConfig {
        ControlPlaneConfig {
            idle_timeout: self.config.idle_timeout(),
            ingest_fps: self.config.ingest_fps,
            input_mode: self.engine.input_mode(),
        }
    }
}
