//! Deduplicated working set of person sightings.
//!
//! `PersonStore` is the only mutator of `PersonRecord`s. Records are appended
//! or updated in place, never removed within a session. The durable copy lives
//! behind `PeopleRepository`.

mod repository;

pub use repository::{
    load_people, InMemoryPeopleRepository, PeopleRepository, SnapshotRepository,
    SqlitePeopleRepository,
};

use std::sync::{Arc, Mutex};

use crate::person::{
    Observation, PersonRecord, AGE_GROUP, CLOTHING_BOTTOM, CLOTHING_TOP, GENDER,
};

/// A single shared attribute never merges two sightings.
pub const MIN_SPARSE_AGREEMENTS: usize = 2;

/// When two sightings count as the same person.
///
/// Equal descriptors (case-insensitive) are always the same person. Otherwise
/// a duplicate needs `quorum` case-insensitive agreements among the quorum
/// attributes both sides carry. When fewer than `quorum` of them are present
/// on both sides, all of the shared ones must agree and there must be at
/// least `MIN_SPARSE_AGREEMENTS` of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupPolicy {
    pub quorum_attributes: Vec<String>,
    pub quorum: usize,
    pub require_same_camera: bool,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            quorum_attributes: [GENDER, AGE_GROUP, CLOTHING_TOP, CLOTHING_BOTTOM]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            quorum: 3,
            require_same_camera: true,
        }
    }
}

impl DedupPolicy {
    pub fn is_duplicate(&self, existing: &PersonRecord, observation: &Observation) -> bool {
        if self.require_same_camera && existing.metadata.camera_id != observation.metadata.camera_id
        {
            return false;
        }
        let ours = &existing.descriptor;
        let theirs = &observation.descriptor;

        if ours.len() == theirs.len()
            && ours
                .iter()
                .all(|(k, v)| theirs.get(k).is_some_and(|o| v.eq_ignore_case(o)))
        {
            return true;
        }

        let mut comparable = 0;
        let mut agreements = 0;
        for key in &self.quorum_attributes {
            if let (Some(a), Some(b)) = (ours.get(key), theirs.get(key)) {
                comparable += 1;
                if a.eq_ignore_case(b) {
                    agreements += 1;
                }
            }
        }

        if agreements >= self.quorum {
            return true;
        }
        comparable < self.quorum
            && agreements == comparable
            && agreements >= MIN_SPARSE_AGREEMENTS
    }
}

/// Outcome of `PersonStore::upsert`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upsert {
    pub record: PersonRecord,
    pub was_duplicate: bool,
}

#[derive(Debug, Default)]
pub struct PersonStore {
    records: Vec<PersonRecord>,
    policy: DedupPolicy,
}

pub type SharedPersonStore = Arc<Mutex<PersonStore>>;

impl PersonStore {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            records: Vec::new(),
            policy,
        }
    }

    pub fn into_shared(self) -> SharedPersonStore {
        Arc::new(Mutex::new(self))
    }

    pub fn policy(&self) -> &DedupPolicy {
        &self.policy
    }

    /// Merge an observation into the store.
    ///
    /// The most recent matching record wins. On a match the record's
    /// timestamp, camera, image reference and crop move to the new sighting,
    /// missing attributes are filled in and the sighting count grows.
    pub fn upsert(&mut self, observation: Observation) -> Upsert {
        let existing = self
            .records
            .iter()
            .rposition(|record| self.policy.is_duplicate(record, &observation));

        if let Some(index) = existing {
            let record = &mut self.records[index];
            let meta = &mut record.metadata;
            meta.timestamp_ms = meta.timestamp_ms.max(observation.metadata.timestamp_ms);
            meta.camera_id = observation.metadata.camera_id;
            if observation.metadata.image_ref.is_some() {
                meta.image_ref = observation.metadata.image_ref;
            }
            meta.sightings = meta.sightings.saturating_add(1);
            if observation.crop.is_some() {
                record.crop = observation.crop;
            }
            record.descriptor.fill_missing(&observation.descriptor);
            log::debug!(
                "duplicate sighting: id={} camera={} sightings={}",
                record.id,
                record.metadata.camera_id,
                record.metadata.sightings
            );
            return Upsert {
                record: record.clone(),
                was_duplicate: true,
            };
        }

        let id = self.mint_id();
        let record = PersonRecord::from_observation(id, observation);
        log::info!(
            "new person record: id={} camera={} attributes={}",
            record.id,
            record.metadata.camera_id,
            record.descriptor.len()
        );
        self.records.push(record.clone());
        Upsert {
            record,
            was_duplicate: false,
        }
    }

    /// Seed from the durable copy. Records whose id is already present are
    /// skipped; returns how many were added.
    pub fn load(&mut self, records: Vec<PersonRecord>) -> usize {
        let mut added = 0;
        for record in records {
            if self.get(&record.id).is_some() {
                continue;
            }
            self.records.push(record);
            added += 1;
        }
        added
    }

    pub fn records(&self) -> &[PersonRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&PersonRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn mint_id(&self) -> String {
        loop {
            let id = format!("person-{}", hex::encode(rand::random::<[u8; 8]>()));
            if self.get(&id).is_none() {
                return id;
            }
        }
    }
}
