use crate::error::{SResult, internal};
use crate::key::{CourseKey, RecordKey, UsageKey, record_key};
use crate::store::{RecordDefaults, RecordStore, StudentRecord};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use time::OffsetDateTime;

/// In-memory record store backed by [`DashMap`].
///
/// Clones share the same rows.
#[derive(Default, Clone)]
pub struct InMemoryRecordStore {
    records: Arc<DashMap<String, StudentRecord>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows across every owner.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn entry_key(&self, username: &str, usage_key: &UsageKey) -> RecordKey {
        record_key(username, usage_key)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn find_records(
        &self,
        username: &str,
        course: &CourseKey,
        usage_keys: &[UsageKey],
    ) -> SResult<Vec<StudentRecord>> {
        let found = usage_keys
            .iter()
            .filter(|key| key.course_key() == course)
            .filter_map(|key| {
                let key = self.entry_key(username, key);
                self.records.get(key.as_str()).map(|row| row.value().clone())
            })
            .collect();
        Ok(found)
    }

    fn get_or_create(
        &self,
        username: &str,
        usage_key: &UsageKey,
        defaults: RecordDefaults,
    ) -> SResult<(StudentRecord, bool)> {
        let key = self.entry_key(username, usage_key);
        match self.records.entry(key.as_str().to_owned()) {
            Entry::Occupied(occupied) => Ok((occupied.get().clone(), false)),
            Entry::Vacant(vacant) => {
                let now = OffsetDateTime::now_utc();
                let record = StudentRecord {
                    username: username.to_owned(),
                    usage_key: usage_key.clone(),
                    module_type: defaults.module_type,
                    state: Some(defaults.state),
                    created: now,
                    modified: now,
                };
                vacant.insert(record.clone());
                Ok((record, true))
            }
        }
    }

    fn force_update(&self, record: &StudentRecord) -> SResult<StudentRecord> {
        let key = self.entry_key(&record.username, &record.usage_key);
        let Some(mut stored) = self.records.get_mut(key.as_str()) else {
            return Err(internal(format!(
                "forced update did not affect any record for {key}"
            )));
        };
        stored.state = record.state.clone();
        stored.modified = OffsetDateTime::now_utc();
        Ok(stored.value().clone())
    }
}
