//! chartsource
//!
//! Reconciles Flux `HelmChart` objects into chart artifacts: resolves the
//! referenced source, builds and packages the chart, publishes it to artifact
//! storage and advertises it on the object's status. The library is used by
//! the binary and by the integration tests.

pub mod accessor;
pub mod builder;
pub mod cli;
pub mod config;
pub mod controller;
pub mod events;
pub mod kube;
pub mod models;
pub mod queue;
pub mod reconciler;
pub mod status;
pub mod storage;
pub mod watcher;

// Re-export commonly used types for convenience
pub use accessor::{Accessor, AccessorError, ListFilter, PatchOptions};
pub use controller::{Controller, ControllerOptions};
pub use models::{HelmChart, ObjectKey, Source, SourceKind};
pub use queue::{RetryPolicy, WorkQueue};
pub use reconciler::{Action, HelmChartReconciler, ReconcileError};
pub use storage::{LocalStorage, Store};
pub use watcher::{DependencyIndex, Propagator};
