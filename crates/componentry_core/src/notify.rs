//! Export change notifications.
//!
//! # Responsibility
//! - Keep per-capability and broadcast subscribers.
//! - Deliver the set of contract keys touched by one transaction.
//!
//! # Invariants
//! - Callbacks run without any notifier lock held, so they may subscribe,
//!   unsubscribe or read the registry.
//! - A capability subscriber is called once per transaction that touched its
//!   capability and sees only that capability's keys.
//! - Broadcast subscribers see the full changed-key set.

use crate::model::{CapabilityId, ContractKey};
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Contract keys changed by one load, unload or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportsChanged {
    keys: BTreeSet<ContractKey>,
}

impl ExportsChanged {
    pub fn keys(&self) -> impl Iterator<Item = &ContractKey> {
        self.keys.iter()
    }

    pub fn contains(&self, key: &ContractKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn for_capability(&self, capability: &CapabilityId) -> Self {
        Self {
            keys: self
                .keys
                .iter()
                .filter(|key| key.capability() == capability)
                .cloned()
                .collect(),
        }
    }
}

/// Handle returned by `subscribe`; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Callback = Arc<dyn Fn(&ExportsChanged) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    capability: Option<CapabilityId>,
    callback: Callback,
}

#[derive(Default)]
pub(crate) struct ChangeNotifier {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl ChangeNotifier {
    pub(crate) fn subscribe<F>(&self, capability: Option<CapabilityId>, callback: F) -> SubscriptionId
    where
        F: Fn(&ExportsChanged) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscribers.write().push(Subscriber {
            id,
            capability,
            callback: Arc::new(callback),
        });
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    pub(crate) fn publish(&self, keys: BTreeSet<ContractKey>) {
        if keys.is_empty() {
            return;
        }
        let event = ExportsChanged { keys };

        let deliveries: Vec<(Callback, ExportsChanged)> = self
            .subscribers
            .read()
            .iter()
            .filter_map(|subscriber| match &subscriber.capability {
                None => Some((Arc::clone(&subscriber.callback), event.clone())),
                Some(capability) => {
                    let scoped = event.for_capability(capability);
                    (!scoped.is_empty()).then(|| (Arc::clone(&subscriber.callback), scoped))
                }
            })
            .collect();

        debug!(
            "event=exports_changed module=notify status=ok keys={} deliveries={}",
            event.len(),
            deliveries.len()
        );
        for (callback, scoped) in deliveries {
            callback(&scoped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeNotifier, ExportsChanged};
    use crate::model::{CapabilityId, ContractKey};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn keys(values: &[(&str, Option<&str>)]) -> BTreeSet<ContractKey> {
        values
            .iter()
            .map(|(capability, name)| ContractKey::parse(capability, *name).expect("key"))
            .collect()
    }

    fn recorder() -> (Arc<Mutex<Vec<ExportsChanged>>>, impl Fn(&ExportsChanged) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &ExportsChanged| sink.lock().push(event.clone()))
    }

    #[test]
    fn capability_subscriber_sees_only_its_keys() {
        let notifier = ChangeNotifier::default();
        let (seen, callback) = recorder();
        notifier.subscribe(Some(CapabilityId::new("Shape").expect("cap")), callback);

        notifier.publish(keys(&[("Shape", None), ("Shape", Some("round")), ("Color", None)]));
        notifier.publish(keys(&[("Color", None)]));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 2);
        assert!(seen[0].keys().all(|key| key.capability().as_str() == "Shape"));
    }

    #[test]
    fn broadcast_subscriber_sees_everything() {
        let notifier = ChangeNotifier::default();
        let (seen, callback) = recorder();
        notifier.subscribe(None, callback);

        notifier.publish(keys(&[("Shape", None), ("Color", None)]));
        assert_eq!(seen.lock()[0].len(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::default();
        let (seen, callback) = recorder();
        let id = notifier.subscribe(None, callback);

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.publish(keys(&[("Shape", None)]));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn empty_change_set_is_not_published() {
        let notifier = ChangeNotifier::default();
        let (seen, callback) = recorder();
        notifier.subscribe(None, callback);
        notifier.publish(BTreeSet::new());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn callbacks_may_unsubscribe_themselves() {
        let notifier = Arc::new(ChangeNotifier::default());
        let slot = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&notifier);
        let inner_slot = Arc::clone(&slot);
        let id = notifier.subscribe(None, move |_| {
            if let Some(id) = inner_slot.lock().take() {
                inner.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        notifier.publish(keys(&[("Shape", None)]));
        assert!(!notifier.unsubscribe(id));
    }
}
