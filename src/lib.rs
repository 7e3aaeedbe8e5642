//! # Registry Mirror
//!
//! Mirrors the membership of services in a service registry into a stream
//! of change records for a host pipeline.
//!
//! ## Core Concepts
//!
//! - **Reconciler**: periodically lists every service in a group and
//!   subscribes to the ones not yet watched, exactly once per service
//! - **Ledger**: the set of services already under watch
//! - **Translator**: turns each membership notification into a
//!   [`ChangeRecord`] and hands it to a [`Sink`]
//! - **Mirror**: blocking start / stop / await-termination control
//!
//! ## Example
//!
//! ```ignore
//! use registry_mirror::{ChannelSink, InMemoryRegistry, Mirror, Settings};
//!
//! let registry = InMemoryRegistry::new();
//! let mirror = Arc::new(Mirror::new("mirror-1", Settings::new(), Arc::new(registry)));
//!
//! let (sink, records) = ChannelSink::bounded(256);
//! let runner = Arc::clone(&mirror);
//! std::thread::spawn(move || runner.start(Arc::new(sink)));
//!
//! while let Ok(record) = records.recv() {
//!     println!("{} -> {}", record.service, record.instances);
//! }
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod translate;
pub mod types;

// Re-exports
pub use config::{ConfigSpec, MirrorConfig, Settings, CONFIG_SCHEMA};
pub use error::{MirrorError, Result};
pub use ledger::SubscriptionLedger;
pub use lifecycle::{LifecycleState, Mirror};
pub use reconcile::{Reconciler, TickReport};
pub use registry::{
    EventListener, InMemoryClient, InMemoryRegistry, RegistryClient, RegistryConnector,
};
pub use scheduler::FixedRateScheduler;
pub use sink::{ChannelSink, RecordReceiver, Sink};
pub use translate::{encode_instances, EventTranslator};
pub use types::*;
