// ============================================================================
// Partition manager
// ============================================================================
//
// Two disjoint, insertion-ordered slices of one logical record set. An id is
// resident in at most one partition at any time; every write path below
// preserves that.
//
// ============================================================================

use crate::core::{Record, RecordId, RecordPatch};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionSide {
    Active,
    Archived,
}

impl PartitionSide {
    /// Split rule for mixed pages.
    pub fn of(record: &Record) -> Self {
        if record.is_archived() {
            PartitionSide::Archived
        } else {
            PartitionSide::Active
        }
    }

    fn other(self) -> Self {
        match self {
            PartitionSide::Active => PartitionSide::Archived,
            PartitionSide::Archived => PartitionSide::Active,
        }
    }
}

/// Outcome of [`PartitionedCollection::place`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Inserted(PartitionSide),
    Replaced(PartitionSide),
    Moved { from: PartitionSide, to: PartitionSide },
}

/// Insertion-ordered map from id to record.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    order: Vec<RecordId>,
    records: HashMap<RecordId, Record>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &RecordId> + '_ {
        self.order.iter()
    }

    pub fn to_vec(&self) -> Vec<Record> {
        self.iter().cloned().collect()
    }

    /// Inserts at the end; an existing id is left untouched.
    fn insert(&mut self, record: Record) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        true
    }

    fn remove(&mut self, id: &str) -> Option<Record> {
        let record = self.records.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(record)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.records.clear();
    }
}

/// The Active/Archived pair plus the archived-scoped selection set.
#[derive(Debug, Clone, Default)]
pub struct PartitionedCollection {
    active: Partition,
    archived: Partition,
    selection: HashSet<RecordId>,
}

impl PartitionedCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &Partition {
        &self.active
    }

    pub fn archived(&self) -> &Partition {
        &self.archived
    }

    pub fn partition(&self, side: PartitionSide) -> &Partition {
        match side {
            PartitionSide::Active => &self.active,
            PartitionSide::Archived => &self.archived,
        }
    }

    fn partition_mut(&mut self, side: PartitionSide) -> &mut Partition {
        match side {
            PartitionSide::Active => &mut self.active,
            PartitionSide::Archived => &mut self.archived,
        }
    }

    /// Which partition currently holds `id`.
    pub fn locate(&self, id: &str) -> Option<PartitionSide> {
        if self.active.contains(id) {
            Some(PartitionSide::Active)
        } else if self.archived.contains(id) {
            Some(PartitionSide::Archived)
        } else {
            None
        }
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.active.get(id).or_else(|| self.archived.get(id))
    }

    pub fn replace_active(&mut self, records: Vec<Record>) {
        self.replace(PartitionSide::Active, records);
    }

    pub fn replace_archived(&mut self, records: Vec<Record>) {
        self.replace(PartitionSide::Archived, records);
    }

    /// Replaces both partitions from one mixed page, split by archive marker.
    pub fn replace_mixed(&mut self, records: Vec<Record>) {
        let (archived, active): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| record.is_archived());
        self.replace(PartitionSide::Active, active);
        self.replace(PartitionSide::Archived, archived);
    }

    /// Empties one partition, used when a fetch is scoped to the other.
    pub fn clear(&mut self, side: PartitionSide) {
        self.partition_mut(side).clear();
        if side == PartitionSide::Archived {
            self.selection.clear();
        }
    }

    fn replace(&mut self, side: PartitionSide, records: Vec<Record>) {
        self.partition_mut(side).clear();
        if side == PartitionSide::Archived {
            self.selection.clear();
        }
        for record in records {
            self.evict(side.other(), &record.id);
            if !self.partition_mut(side).insert(record) {
                debug!("duplicate id in replacement page ignored");
            }
        }
    }

    pub fn append_active(&mut self, records: Vec<Record>) -> usize {
        self.append(PartitionSide::Active, records)
    }

    pub fn append_archived(&mut self, records: Vec<Record>) -> usize {
        self.append(PartitionSide::Archived, records)
    }

    /// Appends a mixed page, split by archive marker. Returns the number of
    /// records inserted into each partition.
    pub fn append_mixed(&mut self, records: Vec<Record>) -> (usize, usize) {
        let (archived, active): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| record.is_archived());
        (
            self.append(PartitionSide::Active, active),
            self.append(PartitionSide::Archived, archived),
        )
    }

    /// Idempotent append: ids already in the target partition are skipped.
    /// An id resident in the other partition moves to the target, the newer
    /// page being authoritative.
    fn append(&mut self, side: PartitionSide, records: Vec<Record>) -> usize {
        let mut inserted = 0;
        for record in records {
            if self.partition(side).contains(&record.id) {
                continue;
            }
            if self.evict(side.other(), &record.id) {
                debug!("record '{}' moved to {:?} by appended page", record.id, side);
            }
            if self.partition_mut(side).insert(record) {
                inserted += 1;
            }
        }
        inserted
    }

    fn evict(&mut self, side: PartitionSide, id: &str) -> bool {
        let removed = self.partition_mut(side).remove(id).is_some();
        if removed && side == PartitionSide::Archived {
            self.selection.remove(id);
        }
        removed
    }

    pub fn move_to_archived(&mut self, id: &str) -> bool {
        self.move_between(PartitionSide::Active, PartitionSide::Archived, id)
    }

    pub fn move_to_active(&mut self, id: &str) -> bool {
        self.move_between(PartitionSide::Archived, PartitionSide::Active, id)
    }

    fn move_between(&mut self, from: PartitionSide, to: PartitionSide, id: &str) -> bool {
        let Some(record) = self.evict_record(from, id) else {
            warn!(
                "partition inconsistency: cannot move '{}' from {:?} to {:?}, id not found in source",
                id, from, to
            );
            return false;
        };
        self.partition_mut(to).insert(record)
    }

    fn evict_record(&mut self, side: PartitionSide, id: &str) -> Option<Record> {
        let record = self.partition_mut(side).remove(id)?;
        if side == PartitionSide::Archived {
            self.selection.remove(id);
        }
        Some(record)
    }

    /// Merges `patch` into whichever partition holds `id`. No-op if absent.
    pub fn patch(&mut self, id: &str, patch: &RecordPatch) -> bool {
        let Some(side) = self.locate(id) else {
            return false;
        };
        match self.partition_mut(side).records.get_mut(id) {
            Some(record) => {
                record.apply(patch);
                true
            }
            None => false,
        }
    }

    /// Puts `record` into the partition its archive marker dictates, replacing
    /// or moving an existing copy.
    pub fn place(&mut self, record: Record) -> Placement {
        let target = PartitionSide::of(&record);
        let placement = match self.locate(&record.id) {
            Some(current) if current == target => {
                if let Some(existing) = self.partition_mut(target).records.get_mut(&record.id) {
                    *existing = record;
                }
                return Placement::Replaced(target);
            }
            Some(current) => {
                self.evict(current, &record.id);
                Placement::Moved {
                    from: current,
                    to: target,
                }
            }
            None => Placement::Inserted(target),
        };
        self.partition_mut(target).insert(record);
        placement
    }

    /// Removes `id` from whichever partition holds it.
    pub fn remove(&mut self, id: &str) -> Option<(PartitionSide, Record)> {
        let side = self.locate(id)?;
        self.evict_record(side, id).map(|record| (side, record))
    }

    /// Removes the given ids from the archived partition and returns the ids
    /// that were actually present.
    pub fn remove_from_archived(&mut self, ids: &HashSet<RecordId>) -> Vec<RecordId> {
        let removed: Vec<RecordId> = self
            .archived
            .ids()
            .filter(|id| ids.contains(*id))
            .cloned()
            .collect();
        for id in &removed {
            self.evict(PartitionSide::Archived, id);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Selection set (archived partition only)
    // ------------------------------------------------------------------

    /// Selects an archived id. Ids outside the archived partition are refused.
    pub fn select(&mut self, id: &str) -> bool {
        if !self.archived.contains(id) {
            return false;
        }
        self.selection.insert(id.to_string())
    }

    pub fn deselect(&mut self, id: &str) -> bool {
        self.selection.remove(id)
    }

    pub fn toggle_selection(&mut self, id: &str) -> bool {
        if self.selection.contains(id) {
            self.selection.remove(id);
            false
        } else {
            self.select(id)
        }
    }

    pub fn select_all_archived(&mut self) {
        self.selection = self.archived.ids().cloned().collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.contains(id)
    }

    /// Selected ids in archived-partition order.
    pub fn selected_ids(&self) -> Vec<RecordId> {
        self.archived
            .ids()
            .filter(|id| self.selection.contains(*id))
            .cloned()
            .collect()
    }

    /// True when no id is resident in both partitions.
    pub fn is_exclusive(&self) -> bool {
        self.active.ids().all(|id| !self.archived.contains(id))
    }
}
