//! In-process registry with real asynchronous notification dispatch.

use super::client::{EventListener, RegistryClient, RegistryConnector};
use crate::config::validate_server_addr;
use crate::error::{MirrorError, Result};
use crate::types::{Instance, RegistryEvent, ServiceKey, ServicePage, SubscribedService};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Default capacity of each client's notification queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

type ClientId = u64;

/// A notification waiting for its client's dispatch thread.
struct Dispatch {
    listener: Arc<dyn EventListener>,
    event: RegistryEvent,
}

/// Per-client state held by the catalog.
struct ClientSlot {
    namespace: String,
    subscriptions: HashMap<ServiceKey, Vec<Arc<dyn EventListener>>>,
    queue: Sender<Dispatch>,
}

struct Catalog {
    /// Instances per (namespace, service key). Sorted so listings are stable.
    services: RwLock<BTreeMap<(String, ServiceKey), Vec<Instance>>>,
    /// Connected clients by ID.
    clients: RwLock<HashMap<ClientId, ClientSlot>>,
    next_id: AtomicU64,
    subscribe_calls: AtomicU64,
    available: AtomicBool,
    queue_capacity: usize,
}

impl Catalog {
    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MirrorError::Registry("registry unavailable".to_string()))
        }
    }

    /// Queue `event` for every listener on (namespace, key).
    ///
    /// Queues are filled after the client lock is released, so a full queue
    /// blocks only the caller.
    fn broadcast(&self, namespace: &str, key: &ServiceKey, event: RegistryEvent) {
        let targets: Vec<(Sender<Dispatch>, Arc<dyn EventListener>)> = {
            let clients = self.clients.read();
            clients
                .values()
                .filter(|slot| slot.namespace == namespace)
                .filter_map(|slot| {
                    slot.subscriptions
                        .get(key)
                        .map(|listeners| (slot.queue.clone(), listeners.clone()))
                })
                .flat_map(|(queue, listeners)| {
                    listeners.into_iter().map(move |l| (queue.clone(), l))
                })
                .collect()
        };

        for (queue, listener) in targets {
            let dispatch = Dispatch {
                listener,
                event: event.clone(),
            };
            if queue.send(dispatch).is_err() {
                tracing::debug!(service = %key, "Client closed before notification was queued");
            }
        }
    }

    fn notify_instances(&self, namespace: &str, key: &ServiceKey, instances: Vec<Instance>) {
        let event = RegistryEvent::instances_changed(key.service.clone(), key.group.clone(), instances);
        self.broadcast(namespace, key, event);
    }
}

/// A registry living in this process.
///
/// Cloning shares the same catalog. Each connected client owns a dispatch
/// thread that invokes listeners in notification order.
#[derive(Clone)]
pub struct InMemoryRegistry {
    catalog: Arc<Catalog>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a registry whose clients buffer at most `capacity` pending
    /// notifications before mutators block.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            catalog: Arc::new(Catalog {
                services: RwLock::new(BTreeMap::new()),
                clients: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                subscribe_calls: AtomicU64::new(0),
                available: AtomicBool::new(true),
                queue_capacity: capacity.max(1),
            }),
        }
    }

    /// Make the registry refuse (or accept again) connections and listings.
    pub fn set_available(&self, available: bool) {
        self.catalog.available.store(available, Ordering::SeqCst);
    }

    /// Declare a service with no instances. No notification is sent.
    pub fn create_service(&self, namespace: &str, group: &str, service: &str) {
        self.catalog
            .services
            .write()
            .entry((namespace.to_string(), ServiceKey::new(service, group)))
            .or_default();
    }

    /// Add an instance, replacing one with the same cluster and address.
    pub fn register_instance(&self, namespace: &str, group: &str, service: &str, instance: Instance) {
        let key = ServiceKey::new(service, group);
        let snapshot = {
            let mut services = self.catalog.services.write();
            let instances = services
                .entry((namespace.to_string(), key.clone()))
                .or_default();
            match instances.iter_mut().find(|existing| {
                existing.cluster_name == instance.cluster_name
                    && existing.ip == instance.ip
                    && existing.port == instance.port
            }) {
                Some(existing) => *existing = instance,
                None => instances.push(instance),
            }
            instances.clone()
        };
        self.catalog.notify_instances(namespace, &key, snapshot);
    }

    /// Remove an instance by address. Returns whether anything was removed.
    pub fn deregister_instance(
        &self,
        namespace: &str,
        group: &str,
        service: &str,
        ip: &str,
        port: u16,
    ) -> bool {
        let key = ServiceKey::new(service, group);
        let snapshot = {
            let mut services = self.catalog.services.write();
            let Some(instances) = services.get_mut(&(namespace.to_string(), key.clone())) else {
                return false;
            };
            let before = instances.len();
            instances.retain(|i| !(i.ip == ip && i.port == port));
            if instances.len() == before {
                return false;
            }
            instances.clone()
        };
        self.catalog.notify_instances(namespace, &key, snapshot);
        true
    }

    /// Replace the whole instance list of a service.
    pub fn set_instances(&self, namespace: &str, group: &str, service: &str, instances: Vec<Instance>) {
        let key = ServiceKey::new(service, group);
        self.catalog
            .services
            .write()
            .insert((namespace.to_string(), key.clone()), instances.clone());
        self.catalog.notify_instances(namespace, &key, instances);
    }

    /// Deliver an arbitrary event to the listeners of a service.
    pub fn emit(&self, namespace: &str, group: &str, service: &str, event: RegistryEvent) {
        self.catalog
            .broadcast(namespace, &ServiceKey::new(service, group), event);
    }

    /// Current instances of a service.
    pub fn instances(&self, namespace: &str, group: &str, service: &str) -> Vec<Instance> {
        self.catalog
            .services
            .read()
            .get(&(namespace.to_string(), ServiceKey::new(service, group)))
            .cloned()
            .unwrap_or_default()
    }

    /// Listeners registered for a service across all open clients.
    pub fn listener_count(&self, namespace: &str, group: &str, service: &str) -> usize {
        let key = ServiceKey::new(service, group);
        self.catalog
            .clients
            .read()
            .values()
            .filter(|slot| slot.namespace == namespace)
            .filter_map(|slot| slot.subscriptions.get(&key))
            .map(Vec::len)
            .sum()
    }

    /// Total successful subscribe calls since creation.
    pub fn subscribe_calls(&self) -> u64 {
        self.catalog.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of clients that have not been shut down.
    pub fn client_count(&self) -> usize {
        self.catalog.clients.read().len()
    }

    /// Open a client without going through the connector trait.
    pub fn client(&self, namespace: &str) -> Result<InMemoryClient> {
        self.catalog.check_available()?;

        let id = self.catalog.next_id.fetch_add(1, Ordering::SeqCst);
        let (queue, receiver) = bounded(self.catalog.queue_capacity);

        thread::Builder::new()
            .name(format!("registry-notify-{id}"))
            .spawn(move || dispatch_loop(receiver))?;

        self.catalog.clients.write().insert(
            id,
            ClientSlot {
                namespace: namespace.to_string(),
                subscriptions: HashMap::new(),
                queue,
            },
        );

        tracing::debug!(client = id, namespace = %namespace, "Registry client connected");

        Ok(InMemoryClient {
            id,
            namespace: namespace.to_string(),
            catalog: Arc::clone(&self.catalog),
        })
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConnector for InMemoryRegistry {
    fn connect(&self, server_addr: &str, namespace: &str) -> Result<Arc<dyn RegistryClient>> {
        validate_server_addr(server_addr)?;
        let client = self.client(namespace).map_err(|e| MirrorError::Connect {
            addr: server_addr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(client))
    }
}

/// Runs on a client's dispatch thread until the client is shut down and
/// its queue drained.
fn dispatch_loop(receiver: Receiver<Dispatch>) {
    for Dispatch { listener, event } in receiver.iter() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
        if outcome.is_err() {
            tracing::error!("Registry listener panicked, notification dropped");
        }
    }
}

/// Session opened on an [`InMemoryRegistry`], scoped to one namespace.
pub struct InMemoryClient {
    id: ClientId,
    namespace: String,
    catalog: Arc<Catalog>,
}

impl InMemoryClient {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn ensure_open(&self) -> Result<()> {
        if self.catalog.clients.read().contains_key(&self.id) {
            Ok(())
        } else {
            Err(MirrorError::ClientShutdown)
        }
    }
}

impl RegistryClient for InMemoryClient {
    fn list_services(&self, group: &str, page_no: usize, page_size: usize) -> Result<ServicePage> {
        self.ensure_open()?;
        self.catalog.check_available()?;
        if page_no == 0 || page_size == 0 {
            return Err(MirrorError::Registry(format!(
                "invalid page request: page_no={page_no}, page_size={page_size}"
            )));
        }

        let services = self.catalog.services.read();
        let names: Vec<&str> = services
            .keys()
            .filter(|(ns, key)| *ns == self.namespace && key.group == group)
            .map(|(_, key)| key.service.as_str())
            .collect();

        Ok(ServicePage {
            count: names.len(),
            services: names
                .into_iter()
                .skip((page_no - 1).saturating_mul(page_size))
                .take(page_size)
                .map(str::to_string)
                .collect(),
        })
    }

    fn subscribed_services(&self) -> Result<Vec<SubscribedService>> {
        let clients = self.catalog.clients.read();
        let slot = clients.get(&self.id).ok_or(MirrorError::ClientShutdown)?;
        Ok(slot
            .subscriptions
            .keys()
            .map(|key| SubscribedService {
                name: key.service.clone(),
                group: key.group.clone(),
            })
            .collect())
    }

    fn subscribe(
        &self,
        service: &str,
        group: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<()> {
        self.catalog.check_available()?;
        let key = ServiceKey::new(service, group);

        {
            let mut clients = self.catalog.clients.write();
            let slot = clients.get_mut(&self.id).ok_or(MirrorError::ClientShutdown)?;
            slot.subscriptions
                .entry(key.clone())
                .or_default()
                .push(Arc::clone(&listener));

            // A new subscriber gets the current membership once, if there is
            // any. Queued under the client lock so a concurrent broadcast,
            // which collects its targets under the same lock, lands after it.
            let current = self
                .catalog
                .services
                .read()
                .get(&(self.namespace.clone(), key.clone()))
                .filter(|instances| !instances.is_empty())
                .cloned();
            if let Some(instances) = current {
                let event = RegistryEvent::instances_changed(service, group, instances);
                let _ = slot.queue.send(Dispatch { listener, event });
            }
        }
        self.catalog.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(client = self.id, service = %key, "Subscribed");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        // Dropping the slot drops the queue sender; the dispatch thread exits
        // once it has drained what was already queued.
        if self.catalog.clients.write().remove(&self.id).is_some() {
            tracing::debug!(client = self.id, "Registry client shut down");
        }
        Ok(())
    }
}

impl Drop for InMemoryClient {
    fn drop(&mut self) {
        self.catalog.clients.write().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    const NS: &str = "public";
    const GROUP: &str = "DEFAULT_GROUP";

    struct PanickingListener;

    impl EventListener for PanickingListener {
        fn on_event(&self, _event: &RegistryEvent) {
            panic!("listener failure");
        }
    }

    fn collecting_listener() -> (Arc<dyn EventListener>, crossbeam_channel::Receiver<RegistryEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let listener: Arc<dyn EventListener> = Arc::new(move |event: &RegistryEvent| {
            let _ = tx.send(event.clone());
        });
        (listener, rx)
    }

    #[test]
    fn test_listing_is_paged_and_scoped() {
        let registry = InMemoryRegistry::new();
        for name in ["a", "b", "c"] {
            registry.create_service(NS, GROUP, name);
        }
        registry.create_service(NS, "OTHER", "d");
        registry.create_service("staging", GROUP, "e");

        let client = registry.client(NS).unwrap();
        let first = client.list_services(GROUP, 1, 2).unwrap();
        assert_eq!(first.count, 3);
        assert_eq!(first.services, vec!["a", "b"]);

        let second = client.list_services(GROUP, 2, 2).unwrap();
        assert_eq!(second.services, vec!["c"]);

        let third = client.list_services(GROUP, 3, 2).unwrap();
        assert!(third.services.is_empty());
    }

    #[test]
    fn test_change_reaches_listener() {
        let registry = InMemoryRegistry::new();
        registry.create_service(NS, GROUP, "orders");

        let client = registry.client(NS).unwrap();
        let (listener, events) = collecting_listener();
        client.subscribe("orders", GROUP, listener).unwrap();

        registry.register_instance(NS, GROUP, "orders", Instance::new("10.0.0.1", 8080));

        match events.recv_timeout(Duration::from_secs(1)).unwrap() {
            RegistryEvent::InstancesChanged { service, instances, .. } => {
                assert_eq!(service, "orders");
                assert_eq!(instances, vec![Instance::new("10.0.0.1", 8080)]);
            }
            other => panic!("Expected InstancesChanged, got {:?}", other),
        }
        assert_eq!(
            client.subscribed_services().unwrap(),
            vec![SubscribedService {
                name: "orders".to_string(),
                group: GROUP.to_string()
            }]
        );
    }

    #[test]
    fn test_subscribe_delivers_current_snapshot() {
        let registry = InMemoryRegistry::new();
        registry.register_instance(NS, GROUP, "orders", Instance::new("10.0.0.1", 8080));

        let client = registry.client(NS).unwrap();
        let (listener, events) = collecting_listener();
        client.subscribe("orders", GROUP, listener).unwrap();

        assert!(events.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_other_namespace_not_notified() {
        let registry = InMemoryRegistry::new();
        let client = registry.client("staging").unwrap();
        let (listener, events) = collecting_listener();
        client.subscribe("orders", GROUP, listener).unwrap();

        registry.register_instance(NS, GROUP, "orders", Instance::new("10.0.0.1", 8080));
        assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_shutdown_rejects_calls() {
        let registry = InMemoryRegistry::new();
        let client = registry.client(NS).unwrap();
        assert_eq!(registry.client_count(), 1);

        client.shutdown().unwrap();
        assert_eq!(registry.client_count(), 0);
        assert!(matches!(
            client.list_services(GROUP, 1, 10),
            Err(MirrorError::ClientShutdown)
        ));
        let (listener, _events) = collecting_listener();
        assert!(matches!(
            client.subscribe("orders", GROUP, listener),
            Err(MirrorError::ClientShutdown)
        ));
        // Second shutdown is harmless.
        client.shutdown().unwrap();
    }

    #[test]
    fn test_unavailable_registry() {
        let registry = InMemoryRegistry::new();
        registry.set_available(false);
        assert!(matches!(
            registry.connect("127.0.0.1:8848", NS),
            Err(MirrorError::Connect { .. })
        ));

        registry.set_available(true);
        let client = registry.client(NS).unwrap();
        registry.set_available(false);
        assert!(matches!(
            client.list_services(GROUP, 1, 10),
            Err(MirrorError::Registry(_))
        ));
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let registry = InMemoryRegistry::new();
        let client = registry.client(NS).unwrap();

        client.subscribe("flaky", GROUP, Arc::new(PanickingListener)).unwrap();
        let (listener, events) = collecting_listener();
        client.subscribe("orders", GROUP, listener).unwrap();

        registry.register_instance(NS, GROUP, "flaky", Instance::new("10.0.0.9", 1));
        registry.register_instance(NS, GROUP, "orders", Instance::new("10.0.0.1", 8080));

        assert!(events.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_deregister() {
        let registry = InMemoryRegistry::new();
        registry.register_instance(NS, GROUP, "orders", Instance::new("10.0.0.1", 8080));
        registry.register_instance(NS, GROUP, "orders", Instance::new("10.0.0.2", 8080));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = registry.client(NS).unwrap();
        let sink = Arc::clone(&seen);
        let listener = move |event: &RegistryEvent| {
            if let RegistryEvent::InstancesChanged { instances, .. } = event {
                sink.lock().push(instances.len());
            }
        };
        client.subscribe("orders", GROUP, Arc::new(listener)).unwrap();

        assert!(registry.deregister_instance(NS, GROUP, "orders", "10.0.0.1", 8080));
        assert!(!registry.deregister_instance(NS, GROUP, "orders", "10.0.0.1", 8080));

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while seen.lock().len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock(), vec![2, 1]);
        assert_eq!(registry.instances(NS, GROUP, "orders").len(), 1);
    }

    #[test]
    fn test_snapshot_never_follows_newer_change() {
        for round in 0..200u16 {
            let registry = InMemoryRegistry::new();
            registry.register_instance(NS, GROUP, "orders", Instance::new("10.0.0.1", 1));
            let client = registry.client(NS).unwrap();
            let (listener, events) = collecting_listener();

            let writer = {
                let registry = registry.clone();
                thread::spawn(move || {
                    registry.set_instances(NS, GROUP, "orders", vec![Instance::new("10.0.0.2", round)]);
                })
            };
            client.subscribe("orders", GROUP, listener).unwrap();
            writer.join().unwrap();

            let mut last = None;
            while let Ok(event) = events.recv_timeout(Duration::from_millis(50)) {
                last = Some(event);
            }
            match last {
                Some(RegistryEvent::InstancesChanged { instances, .. }) => {
                    assert_eq!(instances, vec![Instance::new("10.0.0.2", round)]);
                }
                other => panic!("Expected final membership, got {:?}", other),
            }
        }
    }
}
