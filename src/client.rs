//! Owner-bound user state clients.
//!
//! Every singular operation on [`UserStateClient`] is a provided method that
//! delegates to its batch counterpart with a one-element batch, so both paths
//! share the same storage access.

use crate::error::{SResult, StateError};
use crate::key::{CourseKey, Scope, UsageKey};
use crate::store::{RecordDefaults, RecordStore, StudentRecord};
use crate::util::{FieldMap, decode_state, encode_state, overlay, remove_fields, select_fields};
use std::collections::{BTreeMap, BTreeSet};
use std::slice;
use time::OffsetDateTime;
use tracing::{debug, trace, warn};

/// `(block, field state)` pairs yielded by [`UserStateClient::get_many`].
pub type StateEntries<'a> = Box<dyn Iterator<Item = SResult<(UsageKey, FieldMap)>> + 'a>;

/// `(block, field name, modified)` triple.
pub type ModDate = (UsageKey, String, OffsetDateTime);

/// Triples yielded by [`UserStateClient::get_mod_date_many`].
pub type ModDates<'a> = Box<dyn Iterator<Item = SResult<ModDate>> + 'a>;

/// Cross-user entries yielded by the bulk iteration entry points.
pub type UserStateEntries<'a> = Box<dyn Iterator<Item = SResult<UserStateEntry>> + 'a>;

/// State of one block for one user, as returned by history and bulk iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct UserStateEntry {
    pub username: String,
    pub block_key: UsageKey,
    pub state: FieldMap,
    pub updated: OffsetDateTime,
    pub scope: Scope,
}

/// Reads and writes per-user block state.
pub trait UserStateClient {
    /// Yields the stored state of every block in `block_keys` that has a record.
    /// Blocks without a record are omitted. When `fields` is given only those
    /// fields are returned.
    fn get_many<'a>(
        &'a self,
        username: &str,
        block_keys: &[UsageKey],
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<StateEntries<'a>>;

    /// Overlays each partial field map onto the stored state of its block,
    /// creating records that do not exist yet.
    fn set_many(
        &self,
        username: &str,
        block_keys_to_state: &[(UsageKey, FieldMap)],
        scope: Scope,
    ) -> SResult<()>;

    /// Removes the named fields, or every field when `fields` is `None`.
    fn delete_many(
        &self,
        username: &str,
        block_keys: &[UsageKey],
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<()>;

    /// Yields one entry per stored field. Modification dates are tracked per
    /// record, so every field of a block reports the same date.
    fn get_mod_date_many<'a>(
        &'a self,
        username: &str,
        block_keys: &[UsageKey],
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<ModDates<'a>>;

    fn get_history(
        &self,
        username: &str,
        block_key: &UsageKey,
        scope: Scope,
    ) -> SResult<Vec<UserStateEntry>>;

    /// Iterates every user's state for one block. No ordering guarantees.
    fn iter_all_for_block<'a>(
        &'a self,
        block_key: &UsageKey,
        scope: Scope,
        batch_size: Option<usize>,
    ) -> SResult<UserStateEntries<'a>>;

    /// Iterates every user's state in one course. No ordering guarantees.
    fn iter_all_for_course<'a>(
        &'a self,
        course_key: &CourseKey,
        block_type: Option<&str>,
        scope: Scope,
        batch_size: Option<usize>,
    ) -> SResult<UserStateEntries<'a>>;

    /// Returns the stored state of one block, or `DoesNotExist`.
    fn get(
        &self,
        username: &str,
        block_key: &UsageKey,
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<FieldMap> {
        let mut entries = self.get_many(username, slice::from_ref(block_key), scope, fields)?;
        match entries.next() {
            Some(entry) => entry.map(|(_, state)| state),
            None => Err(StateError::DoesNotExist(block_key.to_string())),
        }
    }

    fn set(
        &self,
        username: &str,
        block_key: &UsageKey,
        state: FieldMap,
        scope: Scope,
    ) -> SResult<()> {
        self.set_many(username, &[(block_key.clone(), state)], scope)
    }

    fn delete(
        &self,
        username: &str,
        block_key: &UsageKey,
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<()> {
        self.delete_many(username, slice::from_ref(block_key), scope, fields)
    }

    /// Field name to modification date for one block.
    fn get_mod_date(
        &self,
        username: &str,
        block_key: &UsageKey,
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<BTreeMap<String, OffsetDateTime>> {
        self.get_mod_date_many(username, slice::from_ref(block_key), scope, fields)?
            .map(|entry| entry.map(|(_, field, modified)| (field, modified)))
            .collect()
    }
}

/// Fails with `UnsupportedScope` for anything but [`Scope::UserState`].
pub fn ensure_user_state(scope: Scope) -> SResult<()> {
    if scope == Scope::UserState {
        Ok(())
    } else {
        Err(StateError::UnsupportedScope(scope))
    }
}

/// [`UserStateClient`] serving exactly one user from a [`RecordStore`].
///
/// Holds no cache and no locks. `set_many` re-reads each record right before
/// writing it and does not guard the read-modify-write, so two writers updating
/// different fields of one record can lose one of the updates.
pub struct StoreBackedClient<S> {
    username: String,
    store: S,
}

impl<S: RecordStore> StoreBackedClient<S> {
    pub fn new(username: impl Into<String>, store: S) -> Self {
        Self {
            username: username.into(),
            store,
        }
    }

    /// The owner this client is bound to.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Calls for another user are a programming error, not a runtime condition.
    fn assert_owner(&self, username: &str) {
        assert!(
            self.username == username,
            "user state client bound to `{}` was called for `{}`",
            self.username,
            username
        );
    }

    /// Records for `block_keys`, queried one course at a time as the iterator advances.
    fn records(&self, block_keys: &[UsageKey]) -> GroupedRecords<'_, S> {
        GroupedRecords {
            store: &self.store,
            username: self.username.clone(),
            groups: group_by_course(block_keys).into_iter(),
            pending: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl<S: RecordStore> UserStateClient for StoreBackedClient<S> {
    fn get_many<'a>(
        &'a self,
        username: &str,
        block_keys: &[UsageKey],
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<StateEntries<'a>> {
        self.assert_owner(username);
        ensure_user_state(scope)?;

        let wanted = owned_names(fields);
        let entries = self
            .records(block_keys)
            .map(move |record| -> SResult<(UsageKey, FieldMap)> {
                let record = record?;
                let state = decode_record(&record)?;
                Ok((record.usage_key, select_fields(state, wanted.as_deref())))
            });
        Ok(Box::new(UntilFailure::new(entries)))
    }

    fn set_many(
        &self,
        username: &str,
        block_keys_to_state: &[(UsageKey, FieldMap)],
        scope: Scope,
    ) -> SResult<()> {
        self.assert_owner(username);
        ensure_user_state(scope)?;

        let mut created_count = 0_usize;
        for (usage_key, state) in block_keys_to_state {
            let defaults = RecordDefaults {
                state: encode_state(state)?,
                module_type: usage_key.block_type().to_owned(),
            };
            let (mut record, created) = self.store.get_or_create(username, usage_key, defaults)?;
            if created {
                created_count += 1;
                continue;
            }

            let mut current = decode_record(&record)?;
            overlay(&mut current, state);
            record.state = Some(encode_state(&current)?);
            // The row was read just above, so an update is safe.
            self.store.force_update(&record)?;
        }

        debug!(
            username,
            records = block_keys_to_state.len(),
            created = created_count,
            "stored user state"
        );
        Ok(())
    }

    fn delete_many(
        &self,
        username: &str,
        block_keys: &[UsageKey],
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<()> {
        self.assert_owner(username);
        ensure_user_state(scope)?;

        let mut touched = 0_usize;
        for record in self.records(block_keys) {
            let mut record = record?;
            let cleared = match fields {
                None => FieldMap::new(),
                Some(names) => {
                    let mut current = decode_record(&record)?;
                    remove_fields(&mut current, names);
                    current
                }
            };
            record.state = Some(encode_state(&cleared)?);
            self.store.force_update(&record)?;
            touched += 1;
        }

        debug!(
            username,
            records = touched,
            all_fields = fields.is_none(),
            "deleted user state"
        );
        Ok(())
    }

    fn get_mod_date_many<'a>(
        &'a self,
        username: &str,
        block_keys: &[UsageKey],
        scope: Scope,
        fields: Option<&[&str]>,
    ) -> SResult<ModDates<'a>> {
        self.assert_owner(username);
        ensure_user_state(scope)?;

        let wanted = owned_names(fields);
        let dates = self
            .records(block_keys)
            .flat_map(move |record| -> Vec<SResult<ModDate>> {
                let record = match record {
                    Ok(record) => record,
                    Err(err) => return vec![Err(err)],
                };
                if record.state.is_none() {
                    return Vec::new();
                }
                match decode_record(&record) {
                    Ok(state) => select_fields(state, wanted.as_deref())
                        .into_iter()
                        .map(|(field, _)| Ok((record.usage_key.clone(), field, record.modified)))
                        .collect(),
                    Err(err) => vec![Err(err)],
                }
            });
        Ok(Box::new(UntilFailure::new(dates)))
    }

    fn get_history(
        &self,
        username: &str,
        _block_key: &UsageKey,
        scope: Scope,
    ) -> SResult<Vec<UserStateEntry>> {
        self.assert_owner(username);
        ensure_user_state(scope)?;
        Err(StateError::NotImplemented("get_history"))
    }

    fn iter_all_for_block<'a>(
        &'a self,
        _block_key: &UsageKey,
        scope: Scope,
        _batch_size: Option<usize>,
    ) -> SResult<UserStateEntries<'a>> {
        ensure_user_state(scope)?;
        Err(StateError::NotImplemented("iter_all_for_block"))
    }

    fn iter_all_for_course<'a>(
        &'a self,
        _course_key: &CourseKey,
        _block_type: Option<&str>,
        scope: Scope,
        _batch_size: Option<usize>,
    ) -> SResult<UserStateEntries<'a>> {
        ensure_user_state(scope)?;
        Err(StateError::NotImplemented("iter_all_for_course"))
    }
}

/// Lazily walks course groups, issuing one batch lookup per course.
struct GroupedRecords<'a, S: ?Sized> {
    store: &'a S,
    username: String,
    groups: std::vec::IntoIter<(CourseKey, Vec<UsageKey>)>,
    pending: std::vec::IntoIter<StudentRecord>,
    failed: bool,
}

impl<S: RecordStore + ?Sized> Iterator for GroupedRecords<'_, S> {
    type Item = SResult<StudentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                return Some(Ok(record));
            }
            if self.failed {
                return None;
            }

            let (course, usage_keys) = self.groups.next()?;
            trace!(course = %course, keys = usage_keys.len(), "querying user state");
            match self.store.find_records(&self.username, &course, &usage_keys) {
                Ok(records) => self.pending = records.into_iter(),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Ends a result stream after its first `Err` item, so a batch never fails per key.
struct UntilFailure<I> {
    inner: I,
    done: bool,
}

impl<I> UntilFailure<I> {
    fn new(inner: I) -> Self {
        Self { inner, done: false }
    }
}

impl<I, T> Iterator for UntilFailure<I>
where
    I: Iterator<Item = SResult<T>>,
{
    type Item = SResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.inner.next()?;
        self.done = item.is_err();
        Some(item)
    }
}

fn group_by_course(block_keys: &[UsageKey]) -> Vec<(CourseKey, Vec<UsageKey>)> {
    let mut groups: BTreeMap<CourseKey, BTreeSet<UsageKey>> = BTreeMap::new();
    for key in block_keys {
        groups
            .entry(key.course_key().clone())
            .or_default()
            .insert(key.clone());
    }
    groups
        .into_iter()
        .map(|(course, keys)| (course, keys.into_iter().collect()))
        .collect()
}

fn owned_names(fields: Option<&[&str]>) -> Option<Vec<String>> {
    fields.map(|names| names.iter().map(|name| (*name).to_owned()).collect())
}

fn decode_record(record: &StudentRecord) -> SResult<FieldMap> {
    decode_state(record.state.as_deref()).inspect_err(|err| {
        warn!(
            username = %record.username,
            block = %record.usage_key,
            error = %err,
            "stored user state is not a JSON object"
        );
    })
}
