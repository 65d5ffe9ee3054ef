//! # visit-throttle
//!
//! Sliding-window admission control for client-side activity, with a
//! persisted block timer and visit-based suspicion diagnostics.
//!
//! An [`AdmissionController`] admits at most a configured number of
//! activity units per rolling minute and per rolling hour. Once a limit is
//! reached it denies everything for a fixed block duration, then reopens.
//! State lives in an injected [`Store`], so a block survives restarts and is
//! shared by every handle on the same profile.
//!
//! ## Quick Start
//!
//! ```rust
//! use visit_throttle::{AdmissionController, MemoryStore};
//! use std::time::Duration;
//!
//! // Defaults: 50 per minute, 300 per hour, 2 minute block
//! let controller = AdmissionController::builder()
//!     .with_max_requests_per_minute(50)
//!     .with_max_requests_per_hour(300)
//!     .with_block_duration(Duration::from_secs(120))
//!     .build(MemoryStore::new())
//!     .unwrap();
//!
//! for t in 0..50 {
//!     assert!(controller.check_admission(t * 1_000).allowed);
//! }
//!
//! let denied = controller.check_admission(50_000);
//! assert!(!denied.allowed);
//! assert_eq!(denied.blocked_until, Some(170_000));
//! assert_eq!(denied.remaining_seconds, 120);
//! ```
//!
//! ## Recording Visits
//!
//! A [`VisitObserver`] keeps the last 100 page visits and asks the
//! controller for a verdict on each one. Its suspicion snapshot is purely
//! diagnostic:
//!
//! ```rust
//! use visit_throttle::{AdmissionController, MemoryStore, VisitKind, VisitObserver, VisitRecord};
//!
//! let store = MemoryStore::new();
//! let controller = AdmissionController::builder().build(store.clone()).unwrap();
//! let observer = VisitObserver::builder().build(store, controller).unwrap();
//!
//! let kind = VisitKind::from_navigation_type(Some("reload"));
//! let verdict = observer.record_visit(VisitRecord::new("/feed", kind, 1_000));
//! assert!(verdict.allowed);
//!
//! let snapshot = observer.visit_stats(1_000);
//! assert_eq!(snapshot.refresh_count, 1);
//! ```
//!
//! ## Countdown
//!
//! With the `async` feature (on by default), a [`CountdownTicker`] re-checks
//! admission once per second while blocked and hands each verdict to a
//! callback, which is enough to drive a `m:ss` countdown:
//!
//! ```rust,no_run
//! # use visit_throttle::{AdmissionController, CountdownTicker, MemoryStore, TickerConfig};
//! # async fn example() {
//! let controller = AdmissionController::builder().build(MemoryStore::new()).unwrap();
//! let handle = CountdownTicker::new(controller.clone(), TickerConfig::default())
//!     .start(|result| println!("{}", result.formatted_remaining()));
//!
//! // On teardown
//! handle.shutdown().await.expect("shutdown failed");
//! # }
//! ```
//!
//! ## Fail-Safe Operation
//!
//! No operation returns an error to its caller. Unreadable or corrupt
//! persisted state is replaced by the default (Open) state, and a failed
//! write switches the controller to memory-only persistence for the rest of
//! its lifetime. Both are logged with `tracing` and counted in [`Metrics`]:
//!
//! ```rust
//! # use visit_throttle::{AdmissionController, MemoryStore, PersistenceMode};
//! # let controller = AdmissionController::builder().build(MemoryStore::new()).unwrap();
//! let snapshot = controller.metrics().snapshot();
//! println!("Denial rate: {:.2}%", snapshot.denial_rate() * 100.0);
//! println!("Store failures: {}", snapshot.store_failures);
//! assert_eq!(controller.persistence_mode(), PersistenceMode::Durable);
//! ```
//!
//! ## Multiple Writers
//!
//! Every check re-reads the store, evaluates and writes back without a
//! transaction. Two controllers over one store (two tabs, or two processes
//! sharing a `RedisStore`) therefore see each other's blocks, but
//! interleaved checks can lose an update: last write wins.
//!
//! ## Stores
//!
//! | Store | Feature | Shared by |
//! |-------|---------|-----------|
//! | [`MemoryStore`] | always | clones in one process |
//! | [`FileStore`] | always | processes on one machine |
//! | `RedisStore` | `redis-storage` | processes on any machine |

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    countdown::{block_progress, format_countdown},
    policy::{AdmissionPolicy, PolicyError},
    state::{AdmissionResult, AdmissionStats, RateLimiterState, StateError, Transition},
    visit::{SuspicionRules, SuspicionSnapshot, VisitKind, VisitLog, VisitRecord},
    Timestamp,
};

pub use application::{
    controller::{AdmissionController, AdmissionControllerBuilder, BuildError, DEFAULT_STATE_KEY},
    metrics::{Metrics, MetricsSnapshot},
    observer::{
        ObserverConfig, ObserverConfigError, VisitObserver, VisitObserverBuilder,
        DEFAULT_RAPID_REFRESH_KEY, DEFAULT_VISITS_KEY,
    },
    persistence::PersistenceMode,
    ports::{Clock, StorageError, Store},
};

#[cfg(feature = "async")]
pub use application::ticker::{
    CountdownTicker, ShutdownError, TickerConfig, TickerConfigError, TickerHandle,
};

pub use infrastructure::{clock::SystemClock, file_store::FileStore, memory_store::MemoryStore};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
