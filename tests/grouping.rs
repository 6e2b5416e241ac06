use courseware_state::error::unavailable;
use courseware_state::inmemory::InMemoryRecordStore;
use courseware_state::store::RecordDefaults;
use courseware_state::{
    CourseKey, FieldMap, RecordStore, SResult, Scope, StateError, StoreBackedClient,
    StudentRecord, UsageKey, UserStateClient,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts batch lookups on top of the in-memory store.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryRecordStore,
    queries: AtomicUsize,
}

impl CountingStore {
    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl RecordStore for CountingStore {
    fn find_records(
        &self,
        username: &str,
        course: &CourseKey,
        usage_keys: &[UsageKey],
    ) -> SResult<Vec<StudentRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.find_records(username, course, usage_keys)
    }

    fn get_or_create(
        &self,
        username: &str,
        usage_key: &UsageKey,
        defaults: RecordDefaults,
    ) -> SResult<(StudentRecord, bool)> {
        self.inner.get_or_create(username, usage_key, defaults)
    }

    fn force_update(&self, record: &StudentRecord) -> SResult<StudentRecord> {
        self.inner.force_update(record)
    }
}

/// Backend that is always down.
struct UnavailableStore;

impl RecordStore for UnavailableStore {
    fn find_records(
        &self,
        _username: &str,
        _course: &CourseKey,
        _usage_keys: &[UsageKey],
    ) -> SResult<Vec<StudentRecord>> {
        Err(unavailable("record store offline"))
    }

    fn get_or_create(
        &self,
        _username: &str,
        _usage_key: &UsageKey,
        _defaults: RecordDefaults,
    ) -> SResult<(StudentRecord, bool)> {
        Err(unavailable("record store offline"))
    }

    fn force_update(&self, _record: &StudentRecord) -> SResult<StudentRecord> {
        Err(unavailable("record store offline"))
    }
}

fn block(run: &str, id: &str) -> UsageKey {
    CourseKey::new("edX", "DemoX", run)
        .expect("valid course key")
        .make_usage_key("problem", id)
        .expect("valid usage key")
}

fn score(value: i64) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert("score".to_owned(), json!(value));
    map
}

fn seeded() -> (Arc<CountingStore>, StoreBackedClient<Arc<CountingStore>>, Vec<UsageKey>) {
    let store = Arc::new(CountingStore::default());
    let client = StoreBackedClient::new("alice", Arc::clone(&store));
    let keys = vec![
        block("2023", "a"),
        block("2024", "a"),
        block("2024", "b"),
        block("2024", "c"),
        block("2025", "a"),
        block("2025", "b"),
    ];
    let batch: Vec<(UsageKey, FieldMap)> = keys
        .iter()
        .enumerate()
        .map(|(index, key)| (key.clone(), score(index as i64)))
        .collect();
    client
        .set_many("alice", &batch, Scope::UserState)
        .expect("seed");
    (store, client, keys)
}

#[test]
fn one_query_per_course() {
    let (store, client, keys) = seeded();
    let before = store.queries();

    let entries: Vec<_> = client
        .get_many("alice", &keys, Scope::UserState, None)
        .expect("get_many")
        .collect::<Result<_, _>>()
        .expect("entries");

    assert_eq!(entries.len(), keys.len());
    assert_eq!(store.queries() - before, 3, "expected one query per course");
}

#[test]
fn duplicate_keys_do_not_duplicate_entries() {
    let (store, client, keys) = seeded();
    let before = store.queries();
    let repeated = vec![keys[1].clone(), keys[1].clone(), keys[2].clone()];

    let entries: Vec<_> = client
        .get_many("alice", &repeated, Scope::UserState, None)
        .expect("get_many")
        .collect::<Result<_, _>>()
        .expect("entries");

    assert_eq!(entries.len(), 2);
    assert_eq!(store.queries() - before, 1);
}

#[test]
fn get_many_queries_lazily() {
    let (store, client, keys) = seeded();
    let before = store.queries();

    let mut entries = client
        .get_many("alice", &keys, Scope::UserState, None)
        .expect("get_many");
    assert_eq!(store.queries(), before, "no query before iteration");

    let first = entries.next().expect("an entry").expect("ok entry");
    assert_eq!(first.0, keys[0]);
    assert_eq!(store.queries() - before, 1, "only the first course is read");
}

#[test]
fn mod_dates_and_deletes_are_grouped_too() {
    let (store, client, keys) = seeded();

    let before = store.queries();
    let dates: Vec<_> = client
        .get_mod_date_many("alice", &keys, Scope::UserState, None)
        .expect("mod dates")
        .collect::<Result<_, _>>()
        .expect("entries");
    assert_eq!(dates.len(), keys.len());
    assert_eq!(store.queries() - before, 3);

    let before = store.queries();
    client
        .delete_many("alice", &keys, Scope::UserState, None)
        .expect("delete_many");
    assert_eq!(store.queries() - before, 3);
}

#[test]
fn singular_calls_use_one_element_batches() {
    let (store, client, keys) = seeded();
    let before = store.queries();

    client
        .get("alice", &keys[3], Scope::UserState, None)
        .expect("get");
    client
        .get_mod_date("alice", &keys[3], Scope::UserState, None)
        .expect("mod date");
    client
        .delete("alice", &keys[3], Scope::UserState, None)
        .expect("delete");

    assert_eq!(store.queries() - before, 3);
}

#[test]
fn backend_outage_surfaces_service_unavailable() {
    let client = StoreBackedClient::new("alice", UnavailableStore);
    let key = block("2024", "a");

    let err = client
        .set("alice", &key, score(1), Scope::UserState)
        .expect_err("set");
    assert!(err.is_retryable());
    assert!(matches!(err, StateError::ServiceUnavailable(_)));

    assert!(matches!(
        client.get("alice", &key, Scope::UserState, None),
        Err(StateError::ServiceUnavailable(_))
    ));
    assert!(matches!(
        client.delete("alice", &key, Scope::UserState, None),
        Err(StateError::ServiceUnavailable(_))
    ));
    assert!(matches!(
        client.get_mod_date("alice", &key, Scope::UserState, None),
        Err(StateError::ServiceUnavailable(_))
    ));
}

#[test]
fn failed_lookup_ends_iteration() {
    let client = StoreBackedClient::new("alice", UnavailableStore);
    let keys = vec![block("2023", "a"), block("2024", "a")];

    let results: Vec<_> = client
        .get_many("alice", &keys, Scope::UserState, None)
        .expect("validation passes")
        .collect();
    assert_eq!(results.len(), 1, "the first failure ends the batch");
    assert!(matches!(results[0], Err(StateError::ServiceUnavailable(_))));
}

#[test]
fn undecodable_record_ends_iteration() {
    let store = InMemoryRecordStore::new();
    let client = StoreBackedClient::new("alice", store.clone());
    let a = block("2024", "a");
    let b = block("2024", "b");
    let mut x = FieldMap::new();
    x.insert("x".to_owned(), json!(1));
    client
        .set_many(
            "alice",
            &[(a.clone(), x.clone()), (b.clone(), x)],
            Scope::UserState,
        )
        .expect("seed");

    let mut broken = store
        .find_records("alice", a.course_key(), std::slice::from_ref(&a))
        .expect("lookup")
        .remove(0);
    broken.state = Some("[1,2]".to_owned());
    store.force_update(&broken).expect("corrupt");

    let keys = vec![a, b];
    let entries: Vec<_> = client
        .get_many("alice", &keys, Scope::UserState, None)
        .expect("validation passes")
        .collect();
    assert_eq!(entries.len(), 1, "a bad record ends the batch");
    assert!(matches!(entries[0], Err(StateError::InvalidInput(_))));

    let dates: Vec<_> = client
        .get_mod_date_many("alice", &keys, Scope::UserState, None)
        .expect("validation passes")
        .collect();
    assert_eq!(dates.len(), 1, "a bad record ends the batch");
    assert!(dates[0].is_err());
}
