//! Periodic reconciliation of registry listings against the ledger.

use crate::error::Result;
use crate::ledger::SubscriptionLedger;
use crate::registry::{EventListener, RegistryClient};
use crate::types::ServiceKey;
use std::sync::Arc;

/// Outcome of one successful tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Services returned by the listing.
    pub listed: usize,
    /// Client-held subscriptions newly recorded in the ledger.
    pub absorbed: usize,
    /// Subscribe calls issued.
    pub subscribed: usize,
}

/// Brings the ledger up to date and subscribes every newly listed service.
///
/// Not shared between threads: the scheduler owns it and runs one tick at a
/// time, which makes check-subscribe-mark a single step.
pub struct Reconciler {
    client: Arc<dyn RegistryClient>,
    listener: Arc<dyn EventListener>,
    group: String,
    page_size: usize,
    ledger: SubscriptionLedger,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn RegistryClient>,
        listener: Arc<dyn EventListener>,
        group: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            client,
            listener,
            group: group.into(),
            page_size: page_size.max(1),
            ledger: SubscriptionLedger::new(),
        }
    }

    pub fn ledger(&self) -> &SubscriptionLedger {
        &self.ledger
    }

    /// Run one reconciliation pass.
    ///
    /// Stops at the first registry error. Keys marked before the error stay
    /// marked, so the next tick only retries what is left.
    pub fn tick(&mut self) -> Result<TickReport> {
        let services = self.list_all_services()?;
        let held = self.client.subscribed_services()?;

        let mut report = TickReport {
            listed: services.len(),
            ..Default::default()
        };

        for subscription in held {
            if self.ledger.mark(subscription.key()) {
                report.absorbed += 1;
            }
        }

        for service in services {
            let key = ServiceKey::new(service, self.group.clone());
            if self.ledger.contains(&key) {
                continue;
            }
            self.client
                .subscribe(&key.service, &key.group, Arc::clone(&self.listener))?;
            tracing::info!(service = %key, "Subscribed to service");
            self.ledger.mark(key);
            report.subscribed += 1;
        }

        Ok(report)
    }

    /// Page through the listing until the registry's reported total is
    /// reached or a page comes back short.
    fn list_all_services(&self) -> Result<Vec<String>> {
        let mut services = Vec::new();
        let mut page_no = 1;

        loop {
            let page = self
                .client
                .list_services(&self.group, page_no, self.page_size)?;
            let received = page.services.len();
            services.extend(page.services);

            if received < self.page_size || services.len() >= page.count {
                break;
            }
            page_no += 1;
        }

        tracing::debug!(group = %self.group, count = services.len(), "Listed services");
        Ok(services)
    }
}
