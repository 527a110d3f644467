//! Flag change observation.
//!
//! Observers are tied to an owner through a weak reference. When the owner is
//! dropped the observer is pruned on the next dispatch without ever being
//! called again. Dispatch iterates over a snapshot of the registry, so handlers
//! may register or remove observers while being called.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use crate::core::flag_store::FlagStore;
use crate::types::FlagRecord;

/// Owner handle accepted by the notifier. Any `Arc` can act as an owner.
pub type ObserverOwner = dyn Any + Send + Sync;

/// Called with the changes relevant to the observer, sorted by key.
pub type ChangeHandler = Arc<dyn Fn(&[FlagChange]) + Send + Sync>;

/// Called when a sync finished without changing any flag.
pub type UnchangedHandler = Arc<dyn Fn() + Send + Sync>;

/// One flag's transition between two snapshots. `None` means absent.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagChange {
    pub key: String,
    pub old: Option<FlagRecord>,
    pub new: Option<FlagRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedKeys {
    All,
    Keys(BTreeSet<String>),
}

impl ObservedKeys {
    pub fn single(key: impl Into<String>) -> Self {
        ObservedKeys::Keys(BTreeSet::from([key.into()]))
    }

    pub fn of<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ObservedKeys::Keys(keys.into_iter().map(Into::into).collect())
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            ObservedKeys::All => true,
            ObservedKeys::Keys(keys) => keys.contains(key),
        }
    }
}

fn owner_id<O: Any + Send + Sync>(owner: &Arc<O>) -> usize {
    Arc::as_ptr(owner) as *const () as usize
}

#[derive(Clone)]
pub struct FlagChangeObserver {
    keys: ObservedKeys,
    owner: Weak<ObserverOwner>,
    owner_id: usize,
    handler: ChangeHandler,
}

impl FlagChangeObserver {
    pub fn new<O: Any + Send + Sync>(keys: ObservedKeys, owner: &Arc<O>, handler: ChangeHandler) -> Self {
        let weak: Weak<O> = Arc::downgrade(owner);
        let weak: Weak<ObserverOwner> = weak;
        Self {
            keys,
            owner: weak,
            owner_id: owner_id(owner),
            handler,
        }
    }

    pub fn keys(&self) -> &ObservedKeys {
        &self.keys
    }

    pub fn is_owner_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

/// Observers are equal when they watch the same keys for the same owner.
impl PartialEq for FlagChangeObserver {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys && self.owner_id == other.owner_id
    }
}

impl std::fmt::Debug for FlagChangeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagChangeObserver")
            .field("keys", &self.keys)
            .field("owner_id", &self.owner_id)
            .field("owner_alive", &self.is_owner_alive())
            .finish()
    }
}

#[derive(Clone)]
struct UnchangedObserver {
    owner: Weak<ObserverOwner>,
    owner_id: usize,
    handler: UnchangedHandler,
}

#[derive(Default)]
pub struct FlagChangeNotifier {
    observers: parking_lot::Mutex<Vec<FlagChangeObserver>>,
    unchanged_observers: parking_lot::Mutex<Vec<UnchangedObserver>>,
}

impl FlagChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: FlagChangeObserver) {
        self.observers.lock().push(observer);
    }

    pub fn add_unchanged_observer<O: Any + Send + Sync>(&self, owner: &Arc<O>, handler: UnchangedHandler) {
        let weak: Weak<O> = Arc::downgrade(owner);
        let weak: Weak<ObserverOwner> = weak;
        self.unchanged_observers.lock().push(UnchangedObserver {
            owner: weak,
            owner_id: owner_id(owner),
            handler,
        });
    }

    /// Removes every observer of either kind registered for `owner`.
    pub fn remove_observers<O: Any + Send + Sync>(&self, owner: &Arc<O>) {
        let id = owner_id(owner);
        self.observers.lock().retain(|o| o.owner_id != id);
        self.unchanged_observers.lock().retain(|o| o.owner_id != id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn unchanged_observer_count(&self) -> usize {
        self.unchanged_observers.lock().len()
    }

    /// Diffs `old` against `new` and dispatches to interested observers.
    ///
    /// Each live observer is called at most once, with only the changes for the
    /// keys it watches. Observers with a dropped owner are removed first and
    /// are never called.
    pub fn notify(&self, old: &FlagStore, new: &FlagStore) {
        let changed = old.changed_keys(new);
        let snapshot = self.live_observers();

        if changed.is_empty() {
            self.notify_unchanged();
            return;
        }

        let changes: Vec<FlagChange> = changed
            .into_iter()
            .map(|key| FlagChange {
                old: old.get(&key).cloned(),
                new: new.get(&key).cloned(),
                key,
            })
            .collect();

        tracing::debug!(
            "Dispatching {} flag changes to {} observers",
            changes.len(),
            snapshot.len()
        );

        for observer in snapshot {
            let relevant: Vec<FlagChange> = changes
                .iter()
                .filter(|change| observer.keys.matches(&change.key))
                .cloned()
                .collect();
            if relevant.is_empty() {
                continue;
            }
            // Holding the owner keeps it alive for the duration of the call.
            if let Some(_owner) = observer.owner.upgrade() {
                (observer.handler)(&relevant);
            }
        }
    }

    /// Prunes observers with dropped owners and returns the rest.
    fn live_observers(&self) -> Vec<FlagChangeObserver> {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(FlagChangeObserver::is_owner_alive);
        let pruned = before - observers.len();
        if pruned > 0 {
            tracing::debug!("Pruned {} observers with dropped owners", pruned);
        }
        observers.clone()
    }

    fn notify_unchanged(&self) {
        let snapshot: Vec<UnchangedObserver> = {
            let mut observers = self.unchanged_observers.lock();
            observers.retain(|o| o.owner.strong_count() > 0);
            observers.clone()
        };

        for observer in snapshot {
            if let Some(_owner) = observer.owner.upgrade() {
                (observer.handler)();
            }
        }
    }
}
