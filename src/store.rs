use crate::error::SResult;
use crate::key::{CourseKey, UsageKey};
use std::sync::Arc;
use time::OffsetDateTime;

/// One persisted row: the state of one block for one owner.
#[derive(Clone, Debug, PartialEq)]
pub struct StudentRecord {
    pub username: String,
    pub usage_key: UsageKey,
    /// Block type recorded when the row was created.
    pub module_type: String,
    /// JSON text of the field map. `None` decodes as an empty map.
    pub state: Option<String>,
    pub created: OffsetDateTime,
    pub modified: OffsetDateTime,
}

impl StudentRecord {
    pub fn course_key(&self) -> &CourseKey {
        self.usage_key.course_key()
    }
}

/// Values used when `get_or_create` has to insert a new row.
#[derive(Clone, Debug)]
pub struct RecordDefaults {
    pub state: String,
    pub module_type: String,
}

/// Durable record storage consumed by user state clients.
pub trait RecordStore: Send + Sync {
    /// Batch lookup of the rows owned by `username` in `course` whose block is in `usage_keys`.
    /// Missing rows are omitted; order is unspecified.
    fn find_records(
        &self,
        username: &str,
        course: &CourseKey,
        usage_keys: &[UsageKey],
    ) -> SResult<Vec<StudentRecord>>;

    /// Returns the row for `(username, usage_key)`, inserting one built from `defaults`
    /// when absent. The flag is `true` when the row was created by this call.
    fn get_or_create(
        &self,
        username: &str,
        usage_key: &UsageKey,
        defaults: RecordDefaults,
    ) -> SResult<(StudentRecord, bool)>;

    /// Overwrites an existing row with `record.state`, refreshing its modification time.
    /// Never inserts; a row that vanished is an error.
    fn force_update(&self, record: &StudentRecord) -> SResult<StudentRecord>;
}

impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    fn find_records(
        &self,
        username: &str,
        course: &CourseKey,
        usage_keys: &[UsageKey],
    ) -> SResult<Vec<StudentRecord>> {
        (**self).find_records(username, course, usage_keys)
    }

    fn get_or_create(
        &self,
        username: &str,
        usage_key: &UsageKey,
        defaults: RecordDefaults,
    ) -> SResult<(StudentRecord, bool)> {
        (**self).get_or_create(username, usage_key, defaults)
    }

    fn force_update(&self, record: &StudentRecord) -> SResult<StudentRecord> {
        (**self).force_update(record)
    }
}

impl<T: RecordStore + ?Sized> RecordStore for Box<T> {
    fn find_records(
        &self,
        username: &str,
        course: &CourseKey,
        usage_keys: &[UsageKey],
    ) -> SResult<Vec<StudentRecord>> {
        (**self).find_records(username, course, usage_keys)
    }

    fn get_or_create(
        &self,
        username: &str,
        usage_key: &UsageKey,
        defaults: RecordDefaults,
    ) -> SResult<(StudentRecord, bool)> {
        (**self).get_or_create(username, usage_key, defaults)
    }

    fn force_update(&self, record: &StudentRecord) -> SResult<StudentRecord> {
        (**self).force_update(record)
    }
}
