//! Registry client adapter.
//!
//! The mirror talks to a service registry through two traits:
//! - [`RegistryConnector`] opens a session for a server address and namespace
//! - [`RegistryClient`] lists services, reports held subscriptions and
//!   subscribes listeners to membership changes
//!
//! Notifications reach the mirror through [`EventListener`], invoked on the
//! client's own dispatch thread(s).
//!
//! [`InMemoryRegistry`] is a self-contained implementation with a real
//! dispatch thread, used by the tests and for running the mirror without a
//! remote registry.
//!
//! # Example
//!
//! ```ignore
//! let registry = InMemoryRegistry::new();
//! registry.register_instance("public", "DEFAULT_GROUP", "orders", Instance::new("10.0.0.1", 8080));
//!
//! let client = registry.connect("127.0.0.1:8848", "public")?;
//! let page = client.list_services("DEFAULT_GROUP", 1, 100)?;
//! assert_eq!(page.services, vec!["orders".to_string()]);
//! ```

mod client;
mod memory;

pub use client::{EventListener, RegistryClient, RegistryConnector};
pub use memory::{InMemoryClient, InMemoryRegistry};
