//! Traits at the registry boundary.

use crate::error::Result;
use crate::types::{RegistryEvent, ServicePage, SubscribedService};
use std::sync::Arc;

/// Receives registry notifications.
///
/// Called from the client's dispatch thread, possibly concurrently for
/// different services. Implementations must not panic back into the
/// dispatcher; handle failures locally.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &RegistryEvent);
}

impl<F> EventListener for F
where
    F: Fn(&RegistryEvent) + Send + Sync,
{
    fn on_event(&self, event: &RegistryEvent) {
        self(event)
    }
}

/// An open session to a registry, scoped to one namespace.
///
/// Call timeouts and reconnection are the client's responsibility.
pub trait RegistryClient: Send + Sync {
    /// List one page of service names in `group`. Pages are numbered from 1.
    fn list_services(&self, group: &str, page_no: usize, page_size: usize) -> Result<ServicePage>;

    /// Services this client already holds a subscription for.
    fn subscribed_services(&self) -> Result<Vec<SubscribedService>>;

    /// Watch membership of `service` in `group`, invoking `listener` on change.
    fn subscribe(&self, service: &str, group: &str, listener: Arc<dyn EventListener>)
        -> Result<()>;

    /// Release the session. Further calls fail with `ClientShutdown`.
    fn shutdown(&self) -> Result<()>;
}

/// Opens registry sessions.
pub trait RegistryConnector: Send + Sync {
    fn connect(&self, server_addr: &str, namespace: &str) -> Result<Arc<dyn RegistryClient>>;
}
