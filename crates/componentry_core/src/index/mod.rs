//! Multi-key export index with override chains.
//!
//! # Responsibility
//! - Map contract keys to exports in insertion order.
//! - Map locations to override-chain heads and resolve chain tails.
//! - Apply the duplicate-location policy of module loads.
//!
//! # Invariants
//! - Every entry is in exactly one contract bucket.
//! - Every entry is reachable from exactly one location head by following
//!   `overridden_by` links, and the links never form a cycle.
//! - Removing an entry splices its chain so neighbours stay linked.
//! - Buckets are never left empty.
//!
//! The index is not synchronized itself; the registry guards it with one lock
//! so readers never observe a half-spliced chain.

use crate::error::{RegistryError, RegistryResult};
use crate::export::ExportHandle;
use crate::model::{CapabilityId, ContractKey, DuplicatePolicy, Location, ModuleId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

type EntryId = u64;

struct Entry {
    handle: Arc<ExportHandle>,
    overridden_by: Option<EntryId>,
    /// Registered through the explicit registration API rather than a module load.
    direct: bool,
}

/// Result of applying one module record to the index.
#[derive(Debug)]
pub enum InsertOutcome {
    /// The location was free; the export is the new chain head.
    Added,
    /// The location was taken and the policy kept the existing export.
    Skipped,
    /// The export was appended as the new chain tail.
    Overrode,
    /// The existing chain (head first) was removed to make room.
    Displaced(Vec<DisplacedExport>),
}

/// One member of a displaced chain, kept so the chain can be rebuilt.
#[derive(Debug, Clone)]
pub struct DisplacedExport {
    handle: Arc<ExportHandle>,
    direct: bool,
}

impl DisplacedExport {
    pub fn handle(&self) -> &Arc<ExportHandle> {
        &self.handle
    }

    /// Whether the export came from the explicit registration API.
    pub fn is_direct(&self) -> bool {
        self.direct
    }
}

#[derive(Default)]
pub struct ExportIndex {
    next_id: EntryId,
    entries: HashMap<EntryId, Entry>,
    buckets: BTreeMap<ContractKey, Vec<EntryId>>,
    locations: HashMap<Location, EntryId>,
}

impl ExportIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored exports, shadowed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_location(&self, location: &Location) -> bool {
        self.locations.contains_key(location)
    }

    /// Exports registered for one contract, in insertion order.
    pub fn lookup(&self, contract: &ContractKey) -> Vec<Arc<ExportHandle>> {
        self.buckets
            .get(contract)
            .map(|ids| self.handles(ids))
            .unwrap_or_default()
    }

    /// Exports of one capability across several names.
    ///
    /// Duplicate names collapse to their first occurrence; the result is
    /// ordered by name order, then insertion order.
    pub fn lookup_many<S: AsRef<str>>(
        &self,
        capability: &CapabilityId,
        names: &[S],
    ) -> Vec<Arc<ExportHandle>> {
        let mut seen = HashSet::with_capacity(names.len());
        let mut items = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !seen.insert(name) {
                continue;
            }
            let key = ContractKey::new(capability.clone(), Some(name));
            if let Some(ids) = self.buckets.get(&key) {
                items.extend(self.handles(ids));
            }
        }
        items
    }

    /// Resolves a location to the tail of its override chain.
    pub fn resolve(&self, location: &Location) -> Option<Arc<ExportHandle>> {
        let head = *self.locations.get(location)?;
        let tail = self.tail_of(head);
        self.entries.get(&tail).map(|entry| Arc::clone(&entry.handle))
    }

    /// Whole override chain at a location, head first.
    pub fn chain(&self, location: &Location) -> Vec<Arc<ExportHandle>> {
        match self.locations.get(location) {
            Some(head) => self.handles(&self.chain_ids(*head)),
            None => Vec::new(),
        }
    }

    /// Exports whose origin is `module`, grouped by contract key order.
    pub fn exports_from(&self, module: &ModuleId) -> Vec<Arc<ExportHandle>> {
        self.buckets
            .values()
            .flatten()
            .filter_map(|id| self.entries.get(id))
            .filter(|entry| entry.handle.origin() == module)
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    /// Applies one module record under `policy`.
    pub fn insert(&mut self, handle: Arc<ExportHandle>, policy: DuplicatePolicy) -> InsertOutcome {
        let location = handle.location().clone();
        let Some(head) = self.locations.get(&location).copied() else {
            self.push_head(handle, false);
            return InsertOutcome::Added;
        };

        match policy {
            DuplicatePolicy::SkipCurrent => InsertOutcome::Skipped,
            DuplicatePolicy::OverrideExisting => {
                let tail = self.tail_of(head);
                let id = self.push_entry(handle, false);
                if let Some(entry) = self.entries.get_mut(&tail) {
                    entry.overridden_by = Some(id);
                }
                InsertOutcome::Overrode
            }
            DuplicatePolicy::RemoveExisting => {
                let displaced = self
                    .chain_ids(head)
                    .into_iter()
                    .filter_map(|id| self.detach(id))
                    .map(|entry| DisplacedExport {
                        handle: entry.handle,
                        direct: entry.direct,
                    })
                    .collect();
                self.push_head(handle, false);
                InsertOutcome::Displaced(displaced)
            }
        }
    }

    /// Registers one export directly; an occupied location is an error.
    pub fn insert_direct(&mut self, handle: Arc<ExportHandle>) -> RegistryResult<()> {
        if self.locations.contains_key(handle.location()) {
            return Err(RegistryError::DuplicateLocation(handle.location().clone()));
        }
        self.push_head(handle, true);
        Ok(())
    }

    /// Rebuilds a displaced chain if its location is free.
    ///
    /// The first member becomes the head, later members re-link as overrides.
    /// Each member keeps the registration kind it had before displacement.
    /// Returns `false` when the location is taken and nothing was restored.
    pub fn restore_chain(&mut self, members: &[DisplacedExport]) -> bool {
        let Some(first) = members.first() else {
            return false;
        };
        if self.locations.contains_key(first.handle.location()) {
            return false;
        }

        let mut tail = self.push_head(Arc::clone(&first.handle), first.direct);
        for member in &members[1..] {
            let id = self.push_entry(Arc::clone(&member.handle), member.direct);
            if let Some(entry) = self.entries.get_mut(&tail) {
                entry.overridden_by = Some(id);
            }
            tail = id;
        }
        true
    }

    /// Removes one export (any kind) and splices its chain.
    pub fn remove(&mut self, handle: &Arc<ExportHandle>) -> bool {
        match self.find(handle) {
            Some(id) => self.detach(id).is_some(),
            None => false,
        }
    }

    /// Removes one export only if it was registered directly.
    pub fn remove_direct(&mut self, handle: &Arc<ExportHandle>) -> bool {
        let Some(id) = self.find(handle) else {
            return false;
        };
        let direct = self.entries.get(&id).is_some_and(|entry| entry.direct);
        direct && self.detach(id).is_some()
    }

    /// Removes the chain head stored at `location`.
    pub fn remove_location(&mut self, location: &Location) -> Option<Arc<ExportHandle>> {
        let head = *self.locations.get(location)?;
        self.detach(head).map(|entry| entry.handle)
    }

    /// Removes every export whose origin is `module`; returns touched keys.
    pub fn remove_origin(&mut self, module: &ModuleId) -> BTreeSet<ContractKey> {
        let doomed: Vec<EntryId> = self
            .buckets
            .values()
            .flatten()
            .copied()
            .filter(|id| {
                self.entries
                    .get(id)
                    .is_some_and(|entry| entry.handle.origin() == module)
            })
            .collect();

        doomed
            .into_iter()
            .filter_map(|id| self.detach(id))
            .map(|entry| entry.handle.contract().clone())
            .collect()
    }

    fn handles(&self, ids: &[EntryId]) -> Vec<Arc<ExportHandle>> {
        ids.iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    fn find(&self, handle: &Arc<ExportHandle>) -> Option<EntryId> {
        self.buckets
            .get(handle.contract())?
            .iter()
            .copied()
            .find(|id| {
                self.entries
                    .get(id)
                    .is_some_and(|entry| Arc::ptr_eq(&entry.handle, handle))
            })
    }

    fn chain_ids(&self, head: EntryId) -> Vec<EntryId> {
        let mut ids = vec![head];
        let mut current = head;
        while let Some(next) = self.entries.get(&current).and_then(|entry| entry.overridden_by) {
            ids.push(next);
            current = next;
        }
        ids
    }

    fn tail_of(&self, head: EntryId) -> EntryId {
        let mut current = head;
        while let Some(next) = self.entries.get(&current).and_then(|entry| entry.overridden_by) {
            current = next;
        }
        current
    }

    fn push_entry(&mut self, handle: Arc<ExportHandle>, direct: bool) -> EntryId {
        self.next_id += 1;
        let id = self.next_id;
        self.buckets
            .entry(handle.contract().clone())
            .or_default()
            .push(id);
        self.entries.insert(
            id,
            Entry {
                handle,
                overridden_by: None,
                direct,
            },
        );
        id
    }

    fn push_head(&mut self, handle: Arc<ExportHandle>, direct: bool) -> EntryId {
        let location = handle.location().clone();
        let id = self.push_entry(handle, direct);
        self.locations.insert(location, id);
        id
    }

    /// Unlinks an entry from its chain and bucket and hands it back.
    fn detach(&mut self, id: EntryId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        let location = entry.handle.location();

        match self.locations.get(location).copied() {
            Some(head) if head == id => match entry.overridden_by {
                Some(next) => {
                    self.locations.insert(location.clone(), next);
                }
                None => {
                    self.locations.remove(location);
                }
            },
            Some(head) => {
                let mut current = head;
                while let Some(next) = self.entries.get(&current).and_then(|e| e.overridden_by) {
                    if next == id {
                        if let Some(previous) = self.entries.get_mut(&current) {
                            previous.overridden_by = entry.overridden_by;
                        }
                        break;
                    }
                    current = next;
                }
            }
            None => {}
        }

        let key = entry.handle.contract();
        if let Some(bucket) = self.buckets.get_mut(key) {
            bucket.retain(|candidate| *candidate != id);
            if bucket.is_empty() {
                self.buckets.remove(key);
            }
        }

        Some(entry)
    }
}
