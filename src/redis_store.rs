use crate::error::{SResult, from_redis, from_serde, internal};
use crate::key::{CourseKey, RecordKey, UsageKey, course_bucket};
use crate::store::{RecordDefaults, RecordStore, StudentRecord};
use parking_lot::Mutex;
use redis::{Connection, RedisResult, Script};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

/// Default number of hash fields fetched per HMGET.
pub const DEFAULT_QUERY_CHUNK_SIZE: usize = 500;

const GET_OR_CREATE_LUA: &str = r#"
local bucket = KEYS[1]
local field = ARGV[1]
local payload = ARGV[2]

local created = redis.call("HSETNX", bucket, field, payload)
return {created, redis.call("HGET", bucket, field)}
"#;

const FORCE_UPDATE_LUA: &str = r#"
local bucket = KEYS[1]
local field = ARGV[1]
local payload = ARGV[2]

if redis.call("HEXISTS", bucket, field) == 0 then
  return 0
end
redis.call("HSET", bucket, field, payload)
return 1
"#;

/// Row layout inside the per-course hash.
#[derive(Serialize, Deserialize)]
struct StoredRow {
    module_type: String,
    state: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    modified: OffsetDateTime,
}

impl StoredRow {
    fn into_record(self, username: &str, usage_key: UsageKey) -> StudentRecord {
        StudentRecord {
            username: username.to_owned(),
            usage_key,
            module_type: self.module_type,
            state: self.state,
            created: self.created,
            modified: self.modified,
        }
    }
}

/// Redis-backed [`RecordStore`].
///
/// Each `(username, course)` pair owns one hash whose fields are usage keys,
/// so a course-scoped lookup is a single HMGET.
pub struct RedisRecordStore {
    client: redis::Client,
    connection: Mutex<Option<Connection>>,
    get_or_create_script: Script,
    force_update_script: Script,
    query_chunk_size: usize,
}

impl RedisRecordStore {
    /// Creates a store using an existing Redis client.
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
            get_or_create_script: Script::new(GET_OR_CREATE_LUA),
            force_update_script: Script::new(FORCE_UPDATE_LUA),
            query_chunk_size: DEFAULT_QUERY_CHUNK_SIZE,
        }
    }

    /// Builds a store by connecting to the provided Redis URL.
    pub fn from_url(redis_url: impl AsRef<str>) -> SResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|err| from_redis(err, "connect redis"))?;
        Ok(Self::new(client))
    }

    /// Caps the number of fields per HMGET. Chunks of one lookup share a pipeline.
    pub fn with_query_chunk_size(mut self, chunk_size: usize) -> Self {
        self.query_chunk_size = chunk_size.max(1);
        self
    }

    fn with_connection<T>(
        &self,
        mut f: impl FnMut(&mut Connection) -> RedisResult<T>,
    ) -> SResult<T> {
        let mut guard = self.connection.lock();
        if guard.is_none() {
            *guard = Some(
                self.client
                    .get_connection()
                    .map_err(|err| from_redis(err, "connect redis"))?,
            );
        }

        let Some(conn) = guard.as_mut() else {
            return Err(internal("redis connection not initialized"));
        };
        f(conn).map_err(|err| {
            if err.is_io_error() {
                *guard = None;
            }
            from_redis(err, "redis command")
        })
    }

    fn encode_row(row: &StoredRow) -> SResult<String> {
        serde_json::to_string(row).map_err(from_serde)
    }

    fn decode_row(payload: &str) -> SResult<StoredRow> {
        serde_json::from_str(payload).map_err(from_serde)
    }
}

impl RecordStore for RedisRecordStore {
    fn find_records(
        &self,
        username: &str,
        course: &CourseKey,
        usage_keys: &[UsageKey],
    ) -> SResult<Vec<StudentRecord>> {
        let bucket = course_bucket(username, course);
        let fields: Vec<String> = usage_keys
            .iter()
            .filter(|key| key.course_key() == course)
            .map(ToString::to_string)
            .collect();
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let replies: Vec<Vec<Option<String>>> = self.with_connection(|conn| {
            let mut pipe = redis::pipe();
            for chunk in fields.chunks(self.query_chunk_size) {
                pipe.cmd("HMGET").arg(bucket.as_str()).arg(chunk.to_vec());
            }
            pipe.query(conn)
        })?;

        let mut records = Vec::new();
        for (field, payload) in fields.iter().zip(replies.into_iter().flatten()) {
            let Some(payload) = payload else {
                continue;
            };
            let usage_key: UsageKey = field.parse()?;
            let row = Self::decode_row(&payload)?;
            records.push(row.into_record(username, usage_key.map_into_course(course)));
        }
        Ok(records)
    }

    fn get_or_create(
        &self,
        username: &str,
        usage_key: &UsageKey,
        defaults: RecordDefaults,
    ) -> SResult<(StudentRecord, bool)> {
        let bucket = course_bucket(username, usage_key.course_key());
        let field = usage_key.to_string();
        let now = OffsetDateTime::now_utc();
        let payload = Self::encode_row(&StoredRow {
            module_type: defaults.module_type,
            state: Some(defaults.state),
            created: now,
            modified: now,
        })?;

        let (created, stored): (i64, String) = self.with_connection(|conn| {
            self.get_or_create_script
                .key(bucket.as_str())
                .arg(field.as_str())
                .arg(payload.as_str())
                .invoke(conn)
        })?;

        let record = Self::decode_row(&stored)?.into_record(username, usage_key.clone());
        if created == 1 {
            debug!(bucket = %bucket, field = %field, "created user state record");
        }
        Ok((record, created == 1))
    }

    fn force_update(&self, record: &StudentRecord) -> SResult<StudentRecord> {
        let bucket: RecordKey = course_bucket(&record.username, record.course_key());
        let field = record.usage_key.to_string();
        let mut updated = record.clone();
        updated.modified = OffsetDateTime::now_utc();
        let payload = Self::encode_row(&StoredRow {
            module_type: updated.module_type.clone(),
            state: updated.state.clone(),
            created: updated.created,
            modified: updated.modified,
        })?;

        let written: i64 = self.with_connection(|conn| {
            self.force_update_script
                .key(bucket.as_str())
                .arg(field.as_str())
                .arg(payload.as_str())
                .invoke(conn)
        })?;

        if written == 0 {
            return Err(internal(format!(
                "forced update did not affect any record for {bucket} {field}"
            )));
        }
        Ok(updated)
    }
}
