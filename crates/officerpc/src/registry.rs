//! # Client Registry
//!
//! The server's authoritative set of live client identifiers. Membership is
//! the single answer to "may this caller invoke server methods".
//!
//! Uses DashMap so the pump's call tasks can check membership without a global
//! lock. Insertion order is remembered so snapshots list clients in the order
//! they were admitted.
//!
//! ## Invariants
//! - Adding is idempotent: re-adding a live id changes nothing.
//! - A removed id is retired and is never admitted again.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use serde::Serialize;

/// Opaque token naming one client window's connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for ClientId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Outcome of offering an id to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    AlreadyPresent,
    /// The id was removed earlier and may not come back.
    Retired,
}

#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    live: DashMap<ClientId, u64>,
    retired: DashMap<ClientId, ()>,
    order: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ClientId) -> Admission {
        let inner = &self.inner;
        match inner.live.entry(id) {
            Entry::Occupied(_) => Admission::AlreadyPresent,
            Entry::Vacant(slot) => {
                if inner.retired.contains_key(slot.key()) {
                    return Admission::Retired;
                }
                slot.insert(inner.order.fetch_add(1, Ordering::Relaxed));
                Admission::Admitted
            }
        }
    }

    /// Unions `ids` into the registry. Returns how many were newly admitted.
    pub fn extend(&self, ids: impl IntoIterator<Item = ClientId>) -> usize {
        ids.into_iter()
            .map(|id| self.insert(id))
            .filter(|admission| *admission == Admission::Admitted)
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.live.contains_key(id)
    }

    pub fn is_retired(&self, id: &str) -> bool {
        self.inner.retired.contains_key(id)
    }

    /// Removes and retires a live id. Unknown ids are left alone.
    ///
    /// The id is marked retired before it leaves the live set, so a
    /// concurrent `insert` can never slip it back in.
    pub fn remove(&self, id: &str) -> bool {
        let Some(key) = self.inner.live.get(id).map(|entry| entry.key().clone()) else {
            return false;
        };
        self.inner.retired.insert(key, ());
        self.inner.live.remove(id).is_some()
    }

    /// Retires every live id, returning them in admission order.
    pub fn retire_all(&self) -> Vec<ClientId> {
        let ids = self.snapshot();
        for id in &ids {
            self.remove(id.as_str());
        }
        ids
    }

    /// The live ids in admission order.
    pub fn snapshot(&self) -> Vec<ClientId> {
        let mut entries: Vec<(u64, ClientId)> = self
            .inner
            .live
            .iter()
            .map(|entry| (*entry.value(), entry.key().clone()))
            .collect();
        entries.sort_unstable_by_key(|(order, _)| *order);
        entries.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.live.is_empty()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("live", &self.snapshot())
            .field("retired", &self.inner.retired.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn ids(names: &[&str]) -> Vec<ClientId> {
        names.iter().map(|n| ClientId::from(*n)).collect()
    }

    #[test]
    fn snapshot_keeps_admission_order() {
        let registry = ClientRegistry::new();
        registry.extend(ids(&["c2", "c1", "c3"]));
        assert_eq!(registry.snapshot(), ids(&["c2", "c1", "c3"]));
    }

    #[test]
    fn extend_twice_is_a_union() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.extend(ids(&["c1", "c2"])), 2);
        assert_eq!(registry.extend(ids(&["c2", "c3"])), 1);
        assert_eq!(registry.snapshot(), ids(&["c1", "c2", "c3"]));
    }

    #[test]
    fn extend_is_idempotent_under_any_order() {
        let mut rng = rand::thread_rng();
        let mut names: Vec<String> = (0..32).map(|i| format!("client-{i}")).collect();

        let registry = ClientRegistry::new();
        for _ in 0..4 {
            names.shuffle(&mut rng);
            registry.extend(names.iter().cloned().map(ClientId::from));
        }

        assert_eq!(registry.len(), 32);
        let mut live: Vec<String> = registry.snapshot().iter().map(|id| id.to_string()).collect();
        live.sort();
        names.sort();
        assert_eq!(live, names);
    }

    #[test]
    fn removed_ids_are_never_readmitted() {
        let registry = ClientRegistry::new();
        registry.insert("c1".into());

        assert!(registry.remove("c1"));
        assert!(!registry.contains("c1"));
        assert!(registry.is_retired("c1"));
        assert_eq!(registry.insert("c1".into()), Admission::Retired);
        assert_eq!(registry.extend(ids(&["c1"])), 0);
    }

    #[test]
    fn retirement_holds_against_concurrent_inserts() {
        for round in 0..64 {
            let registry = ClientRegistry::new();
            let id = format!("client-{round}");
            registry.insert(ClientId::new(id.as_str()));

            let inserter = {
                let registry = registry.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        registry.insert(ClientId::new(id.as_str()));
                    }
                })
            };
            registry.remove(&id);
            inserter.join().unwrap();

            assert!(registry.is_retired(&id));
            assert!(!registry.contains(&id), "round {round} readmitted a retired id");
        }
    }

    #[test]
    fn removing_unknown_ids_retires_nothing() {
        let registry = ClientRegistry::new();
        assert!(!registry.remove("ghost"));
        assert_eq!(registry.insert("ghost".into()), Admission::Admitted);
    }

    #[test]
    fn retire_all_empties_the_registry() {
        let registry = ClientRegistry::new();
        registry.extend(ids(&["c1", "c2"]));

        assert_eq!(registry.retire_all(), ids(&["c1", "c2"]));
        assert!(registry.is_empty());
        assert_eq!(registry.insert("c2".into()), Admission::Retired);
    }

    #[test]
    fn separate_registries_share_nothing() {
        let a = ClientRegistry::new();
        let b = ClientRegistry::new();
        a.insert("c1".into());

        assert!(!b.contains("c1"));
        assert!(a.clone().contains("c1"));
    }
}
