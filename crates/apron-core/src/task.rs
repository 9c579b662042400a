use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::datetime::lenient_timestamp_serde;

/// Backend task identifier. The API emits both numbers and strings, so the
/// value is carried as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Identifier for a record that arrived without one.
    pub fn synthetic() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with("local-")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(Self(raw.as_ref().and_then(scalar_text).unwrap_or_default()))
    }
}

/// Tabs of the "My Jobs" listing; also the `type` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Created,
    Assigned,
    Received,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::Created => "created",
            View::Assigned => "assigned",
            View::Received => "received",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Some(View::Created),
            "assigned" => Some(View::Assigned),
            "received" => Some(View::Received),
            _ => None,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecipientType {
    User,
    Unit,
    Team,
}

impl RecipientType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "USER" => Some(RecipientType::User),
            "UNIT" => Some(RecipientType::Unit),
            "TEAM" => Some(RecipientType::Team),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecipientType::User => "USER",
            RecipientType::Unit => "UNIT",
            RecipientType::Team => "TEAM",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub id: Option<String>,
    #[serde(default, alias = "fullName", deserialize_with = "lenient::opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_name")]
    pub team: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_name")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_name")]
    pub role: Option<String>,
}

impl UserSummary {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("-")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(default, deserialize_with = "lenient::opt_recipient_type")]
    pub recipient_type: Option<RecipientType>,

    #[serde(default, deserialize_with = "lenient::opt_user")]
    pub recipient_user: Option<UserSummary>,

    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub recipient_id: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_user")]
    pub assigned_by_user: Option<UserSummary>,

    #[serde(default, with = "lenient_timestamp_serde")]
    pub assigned_at: Option<DateTime<Utc>>,

    #[serde(default, with = "lenient_timestamp_serde")]
    pub due_at: Option<DateTime<Utc>>,

    #[serde(default, with = "lenient_timestamp_serde")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient::text")]
    pub status: String,

    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub note: Option<String>,
}

impl Assignment {
    pub fn recipient_label(&self) -> String {
        if let Some(user) = &self.recipient_user {
            return user.display_name().to_string();
        }
        match (self.recipient_type, self.recipient_id.as_deref()) {
            (Some(kind), Some(id)) => format!("{}:{id}", kind.as_str()),
            (None, Some(id)) => id.to_string(),
            (Some(kind), None) => kind.as_str().to_string(),
            (None, None) => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, alias = "fileName", alias = "originalName", deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, alias = "fileUrl", deserialize_with = "lenient::opt_text")]
    pub url: Option<String>,
    #[serde(default, alias = "contentType", deserialize_with = "lenient::opt_text")]
    pub mime_type: Option<String>,
    #[serde(default, alias = "fileSize", deserialize_with = "lenient::opt_size")]
    pub size: Option<u64>,
}

/// A task record as the backend sends it, before tree reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,

    #[serde(default, deserialize_with = "lenient::opt_task_id")]
    pub parent_id: Option<TaskId>,

    #[serde(default, deserialize_with = "lenient::level")]
    pub hierarchy_level: u32,

    #[serde(default, deserialize_with = "lenient::text")]
    pub title: String,

    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub content: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "lenient::text")]
    pub status: String,

    #[serde(default, deserialize_with = "lenient::text")]
    pub priority: String,

    #[serde(default, with = "lenient_timestamp_serde")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient::opt_user")]
    pub created_by_user: Option<UserSummary>,

    #[serde(default, deserialize_with = "lenient::list")]
    pub assignments: Vec<Assignment>,

    #[serde(default, deserialize_with = "lenient::list")]
    pub attachments: Vec<Attachment>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// The assignment every view treats as authoritative.
    pub fn primary_assignment(&self) -> Option<&Assignment> {
        self.assignments.first()
    }

    pub fn is_root(&self) -> bool {
        self.hierarchy_level == 0 || self.parent_id.is_none()
    }
}

/// A task together with its reconstructed subtasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskNode {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<TaskNode>,
}

impl TaskNode {
    pub fn leaf(task: Task) -> Self {
        Self {
            task,
            subtasks: Vec::new(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.task.id
    }

    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&TaskNode> = self.subtasks.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.subtasks.iter());
        }
        count
    }
}

/// Releases subtrees from an explicit stack; the derived drop would recurse
/// once per level.
impl Drop for TaskNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.subtasks);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.subtasks);
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Decoders that tolerate the null, numeric and nested variants the backend
/// produces for fields that are nominally plain strings.
mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use tracing::debug;

    use super::{RecipientType, TaskId, UserSummary, scalar_text};

    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(opt_text(deserializer)?.unwrap_or_default())
    }

    pub fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(raw.as_ref().and_then(scalar_text))
    }

    /// Accepts `"Ramp A"` or `{ "id": 3, "name": "Ramp A" }`.
    pub fn opt_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(Value::Object(map)) => map.get("name").and_then(scalar_text),
            Some(other) => scalar_text(&other),
            None => None,
        })
    }

    pub fn opt_task_id<'de, D>(deserializer: D) -> Result<Option<TaskId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = opt_text(deserializer)?;
        Ok(raw
            .filter(|text| !text.trim().is_empty())
            .map(TaskId::new))
    }

    pub fn level<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        let level = match raw {
            Some(Value::Number(num)) => num
                .as_u64()
                .or_else(|| num.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        };
        Ok(level
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(0))
    }

    pub fn opt_recipient_type<'de, D>(
        deserializer: D,
    ) -> Result<Option<RecipientType>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = opt_text(deserializer)?;
        Ok(raw.as_deref().and_then(RecipientType::parse))
    }

    /// Accepts `{ ... }` or a bare `"Nguyen Van B"`; anything else is `None`.
    pub fn opt_user<'de, D>(deserializer: D) -> Result<Option<UserSummary>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(value @ Value::Object(_)) => serde_json::from_value(value)
                .map_err(|err| debug!(error = %err, "ignoring undecodable user"))
                .ok(),
            Some(Value::String(name)) if !name.trim().is_empty() => Some(UserSummary {
                name: Some(name),
                ..UserSummary::default()
            }),
            _ => None,
        })
    }

    /// Byte counts as numbers or numeric strings; `"2MB"` and the like are
    /// dropped.
    pub fn opt_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(Value::Number(num)) => num
                .as_u64()
                .or_else(|| num.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        })
    }

    /// A non-array becomes empty; elements that fail to decode are skipped.
    pub fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        let Some(Value::Array(items)) = raw else {
            return Ok(Vec::new());
        };
        Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                serde_json::from_value(item)
                    .map_err(|err| debug!(index = idx, error = %err, "skipping undecodable entry"))
                    .ok()
            })
            .collect())
    }
}
