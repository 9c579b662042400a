//! Normalization of the task-list payloads the backend has produced over
//! time. Everything downstream of the network boundary sees only
//! [`NormalizedResponse`].

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    pub tasks: Vec<Task>,
    pub total_count: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// The payload layouts seen in the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{ success, data: { tasks, totalCount, metadata } }`
    Envelope,
    /// `{ data: [...] }`
    DataArray,
    /// `{ tasks: [...] }`
    TasksKey,
    /// `[...]`
    BareArray,
}

impl fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseShape::Envelope => "envelope",
            ResponseShape::DataArray => "data-array",
            ResponseShape::TasksKey => "tasks-key",
            ResponseShape::BareArray => "bare-array",
        };
        f.write_str(name)
    }
}

pub fn detect_shape(value: &Value) -> Option<ResponseShape> {
    match value {
        Value::Array(_) => Some(ResponseShape::BareArray),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(_)) => Some(ResponseShape::DataArray),
            Some(Value::Object(data)) if matches!(data.get("tasks"), Some(Value::Array(_))) => {
                Some(ResponseShape::Envelope)
            }
            Some(_) => None,
            None if matches!(map.get("tasks"), Some(Value::Array(_))) => {
                Some(ResponseShape::TasksKey)
            }
            None => None,
        },
        _ => None,
    }
}

#[instrument(skip(text), fields(bytes = text.len()))]
pub fn normalize_response_str(text: &str) -> anyhow::Result<NormalizedResponse> {
    let value: Value =
        serde_json::from_str(text).context("task list response is not valid JSON")?;
    normalize_response(value)
}

/// Flattens any known payload layout into a [`NormalizedResponse`].
///
/// A `success: false` envelope is an error carrying the backend's message.
/// Records that are not JSON objects are skipped; records without an id get a
/// synthetic one.
#[instrument(skip(value))]
pub fn normalize_response(value: Value) -> anyhow::Result<NormalizedResponse> {
    if let Value::Object(map) = &value
        && map.get("success") == Some(&Value::Bool(false))
    {
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        bail!("backend reported failure: {message}");
    }

    let shape = detect_shape(&value)
        .ok_or_else(|| anyhow!("unrecognized task list response shape"))?;
    debug!(%shape, "detected response shape");

    let (items, container) = match (shape, value) {
        (ResponseShape::BareArray, Value::Array(items)) => (items, Map::new()),
        (ResponseShape::DataArray, Value::Object(mut map)) => {
            let items = take_array(&mut map, "data");
            (items, map)
        }
        (ResponseShape::TasksKey, Value::Object(mut map)) => {
            let items = take_array(&mut map, "tasks");
            (items, map)
        }
        (ResponseShape::Envelope, Value::Object(mut map)) => {
            let mut data = match map.remove("data") {
                Some(Value::Object(data)) => data,
                _ => Map::new(),
            };
            let items = take_array(&mut data, "tasks");
            (items, data)
        }
        (shape, _) => bail!("response did not match detected shape {shape}"),
    };

    let tasks = decode_tasks(items);
    let total_count = container
        .get("totalCount")
        .or_else(|| container.get("total"))
        .and_then(Value::as_u64)
        .and_then(|count| usize::try_from(count).ok())
        .unwrap_or(tasks.len());
    let metadata = match container.get("metadata") {
        Some(Value::Object(meta)) => meta
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => BTreeMap::new(),
    };

    debug!(tasks = tasks.len(), total_count, "normalized task list");
    Ok(NormalizedResponse {
        tasks,
        total_count,
        metadata,
    })
}

fn take_array(map: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match map.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn decode_tasks(items: Vec<Value>) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            warn!(index = idx, "skipping task record that is not an object");
            continue;
        }
        match serde_json::from_value::<Task>(item) {
            Ok(mut task) => {
                if task.id.is_blank() {
                    task.id = TaskId::synthetic();
                    debug!(index = idx, id = %task.id, "assigned synthetic task id");
                }
                tasks.push(task);
            }
            Err(err) => {
                warn!(index = idx, error = %err, "skipping undecodable task record");
            }
        }
    }
    tasks
}
