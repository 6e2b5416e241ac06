use crate::error::{SResult, invalid_input};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

const COURSE_PREFIX: &str = "course-v1:";
const BLOCK_PREFIX: &str = "block-v1:";
const KEY_NAMESPACE: &str = "courseware:state";

/// Storage namespace for block state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Content,
    Settings,
    #[default]
    UserState,
    Preferences,
    UserInfo,
    UserStateSummary,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Content => "content",
            Scope::Settings => "settings",
            Scope::UserState => "user_state",
            Scope::Preferences => "preferences",
            Scope::UserInfo => "user_info",
            Scope::UserStateSummary => "user_state_summary",
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a course run: `course-v1:{org}+{course}+{run}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseKey {
    org: String,
    course: String,
    run: String,
}

impl CourseKey {
    pub fn new(
        org: impl Into<String>,
        course: impl Into<String>,
        run: impl Into<String>,
    ) -> SResult<Self> {
        let key = Self {
            org: org.into(),
            course: course.into(),
            run: run.into(),
        };
        for part in [&key.org, &key.course, &key.run] {
            check_segment(part)?;
        }
        Ok(key)
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn course(&self) -> &str {
        &self.course
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    /// Builds a usage key for a block inside this course.
    pub fn make_usage_key(
        &self,
        block_type: impl Into<String>,
        block_id: impl Into<String>,
    ) -> SResult<UsageKey> {
        UsageKey::new(self.clone(), block_type, block_id)
    }
}

impl Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COURSE_PREFIX}{}+{}+{}", self.org, self.course, self.run)
    }
}

impl FromStr for CourseKey {
    type Err = crate::error::StateError;

    fn from_str(raw: &str) -> SResult<Self> {
        let body = raw
            .strip_prefix(COURSE_PREFIX)
            .ok_or_else(|| invalid_input(format!("course key `{raw}` lacks `{COURSE_PREFIX}`")))?;
        match body.split('+').collect::<Vec<_>>().as_slice() {
            [org, course, run] => Self::new(*org, *course, *run),
            _ => Err(invalid_input(format!(
                "course key `{raw}` must have org, course and run"
            ))),
        }
    }
}

impl TryFrom<String> for CourseKey {
    type Error = crate::error::StateError;

    fn try_from(raw: String) -> SResult<Self> {
        raw.parse()
    }
}

impl From<CourseKey> for String {
    fn from(key: CourseKey) -> Self {
        key.to_string()
    }
}

/// Identifies one addressable block and the course it belongs to.
///
/// Text form: `block-v1:{org}+{course}+{run}+type@{block_type}+block@{block_id}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsageKey {
    course_key: CourseKey,
    block_type: String,
    block_id: String,
}

impl UsageKey {
    pub fn new(
        course_key: CourseKey,
        block_type: impl Into<String>,
        block_id: impl Into<String>,
    ) -> SResult<Self> {
        let block_type = block_type.into();
        let block_id = block_id.into();
        check_segment(&block_type)?;
        check_segment(&block_id)?;
        Ok(Self {
            course_key,
            block_type,
            block_id,
        })
    }

    pub fn course_key(&self) -> &CourseKey {
        &self.course_key
    }

    pub fn block_type(&self) -> &str {
        &self.block_type
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    /// Returns the same block rebound to `course_key`.
    pub fn map_into_course(&self, course_key: &CourseKey) -> Self {
        Self {
            course_key: course_key.clone(),
            block_type: self.block_type.clone(),
            block_id: self.block_id.clone(),
        }
    }
}

impl Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let course = &self.course_key;
        write!(
            f,
            "{BLOCK_PREFIX}{}+{}+{}+type@{}+block@{}",
            course.org, course.course, course.run, self.block_type, self.block_id
        )
    }
}

impl FromStr for UsageKey {
    type Err = crate::error::StateError;

    fn from_str(raw: &str) -> SResult<Self> {
        let body = raw
            .strip_prefix(BLOCK_PREFIX)
            .ok_or_else(|| invalid_input(format!("usage key `{raw}` lacks `{BLOCK_PREFIX}`")))?;
        let parts: Vec<&str> = body.split('+').collect();
        let [org, course, run, block_type, block_id] = parts.as_slice() else {
            return Err(invalid_input(format!(
                "usage key `{raw}` must have org, course, run, type and block"
            )));
        };
        let block_type = block_type
            .strip_prefix("type@")
            .ok_or_else(|| invalid_input(format!("usage key `{raw}` lacks `type@`")))?;
        let block_id = block_id
            .strip_prefix("block@")
            .ok_or_else(|| invalid_input(format!("usage key `{raw}` lacks `block@`")))?;
        Self::new(CourseKey::new(*org, *course, *run)?, block_type, block_id)
    }
}

impl TryFrom<String> for UsageKey {
    type Error = crate::error::StateError;

    fn try_from(raw: String) -> SResult<Self> {
        raw.parse()
    }
}

impl From<UsageKey> for String {
    fn from(key: UsageKey) -> Self {
        key.to_string()
    }
}

fn check_segment(segment: &str) -> SResult<()> {
    if segment.is_empty() {
        return Err(invalid_input("key segments must not be empty"));
    }
    let valid = segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~' | '%'));
    if !valid {
        return Err(invalid_input(format!(
            "key segment `{segment}` contains reserved characters"
        )));
    }
    Ok(())
}

/// Storage key for one owner's record of one block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordKey(pub String);

impl RecordKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Deterministic per-record key. Backends MUST only use this representation.
pub fn record_key(username: &str, usage_key: &UsageKey) -> RecordKey {
    RecordKey(format!("{KEY_NAMESPACE}:{username}:{usage_key}"))
}

/// Key of the bucket holding every record an owner has in one course.
pub fn course_bucket(username: &str, course_key: &CourseKey) -> RecordKey {
    RecordKey(format!("{KEY_NAMESPACE}:{username}:{course_key}"))
}
