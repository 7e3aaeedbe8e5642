//! Translation of registry notifications into change records.

use crate::error::{MirrorError, Result};
use crate::registry::EventListener;
use crate::sink::Sink;
use crate::types::{ChangeRecord, Instance, RegistryEvent};
use std::sync::Arc;

/// Listener that turns membership changes into [`ChangeRecord`]s for a sink.
///
/// Runs on the registry client's dispatch threads. A record that cannot be
/// built is logged and dropped; nothing is raised back into the dispatcher.
pub struct EventTranslator {
    namespace: String,
    sink: Arc<dyn Sink>,
}

impl EventTranslator {
    pub fn new(namespace: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        Self {
            namespace: namespace.into(),
            sink,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the record for an event. `None` for events that carry no
    /// membership change.
    pub fn translate(&self, event: &RegistryEvent) -> Result<Option<ChangeRecord>> {
        let RegistryEvent::InstancesChanged {
            service, instances, ..
        } = event
        else {
            return Ok(None);
        };

        Ok(Some(ChangeRecord {
            namespace: self.namespace.clone(),
            service: service.clone(),
            instances: encode_instances(instances)?,
        }))
    }
}

impl EventListener for EventTranslator {
    fn on_event(&self, event: &RegistryEvent) {
        match self.translate(event) {
            Ok(Some(record)) => {
                tracing::trace!(service = %record.service, "Emitting change record");
                self.sink.accept(record);
            }
            Ok(None) => {
                tracing::trace!(?event, "Ignoring non-membership event");
            }
            Err(e) => {
                tracing::error!(error = %e, ?event, "Failed to translate registry event, record dropped");
            }
        }
    }
}

/// Encode instances as a JSON array, preserving order.
///
/// A non-finite weight has no JSON form and would be silently rewritten as
/// `null`, so it is rejected.
pub fn encode_instances(instances: &[Instance]) -> Result<String> {
    if let Some(bad) = instances.iter().find(|i| !i.weight.is_finite()) {
        return Err(MirrorError::MalformedInstance(format!(
            "{} has non-finite weight {}",
            bad.address(),
            bad.weight
        )));
    }
    Ok(serde_json::to_string(instances)?)
}
