//! Maps the backend's open-ended status and priority strings onto the small
//! display vocabulary used by listings and filters.
//!
//! Each classifier tries the known enum values first, then keyword rules over
//! legacy free text (English and Vietnamese), then falls back to `Unknown`.

use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PriorityKey {
    Low,
    Medium,
    High,
    Urgent,
    #[value(skip)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityClass {
    pub key: PriorityKey,
    pub label: &'static str,
    pub color: &'static str,
    pub emoji: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKey {
    Open,
    Pending,
    Accepted,
    Working,
    Paused,
    Completed,
    Cancelled,
    Rejected,
    Unknown,
}

impl StatusKey {
    /// Completed, cancelled and rejected work needs no further action.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            StatusKey::Completed | StatusKey::Cancelled | StatusKey::Rejected
        )
    }
}

/// Task and assignment lifecycles share keys but not labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusContext {
    Task,
    Assignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusClass {
    pub key: StatusKey,
    pub label: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
}

pub fn classify_priority(raw: &str) -> PriorityClass {
    priority_class(priority_key(raw))
}

fn priority_key(raw: &str) -> PriorityKey {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return PriorityKey::Unknown;
    }

    match trimmed.to_ascii_uppercase().as_str() {
        "LOW" => return PriorityKey::Low,
        "MEDIUM" => return PriorityKey::Medium,
        "HIGH" => return PriorityKey::High,
        "URGENT" => return PriorityKey::Urgent,
        _ => {}
    }

    priority_rules()
        .iter()
        .find(|(re, _)| re.is_match(trimmed))
        .map(|(_, key)| *key)
        .unwrap_or(PriorityKey::Unknown)
}

fn priority_class(key: PriorityKey) -> PriorityClass {
    let (label, color, emoji) = match key {
        PriorityKey::Low => ("Low", "#4caf50", "🟢"),
        PriorityKey::Medium => ("Medium", "#ffb300", "🟡"),
        PriorityKey::High => ("High", "#fb8c00", "🟠"),
        PriorityKey::Urgent => ("Urgent", "#e53935", "🔴"),
        PriorityKey::Unknown => ("Unknown", "#9e9e9e", "⚪"),
    };
    PriorityClass {
        key,
        label,
        color,
        emoji,
    }
}

// Urgent is tested before high so "rất khẩn cấp" never lands on "cao".
fn priority_rules() -> &'static [(Regex, PriorityKey)] {
    static RULES: OnceLock<Vec<(Regex, PriorityKey)>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile_rules(&[
            (
                r"(?i)khẩn|gấp|\burgent\b|\bcritical\b|\bemergency\b|\basap\b",
                PriorityKey::Urgent,
            ),
            (r"(?i)\bcao\b|quan trọng|\bhigh\b|\bimportant\b", PriorityKey::High),
            (
                r"(?i)trung bình|bình thường|\bmedium\b|\bnormal\b",
                PriorityKey::Medium,
            ),
            (r"(?i)thấp|\blow\b|\bminor\b", PriorityKey::Low),
        ])
    })
}

pub fn classify_status(raw: &str, context: StatusContext) -> StatusClass {
    status_class(status_key(raw, context), context)
}

fn status_key(raw: &str, context: StatusContext) -> StatusKey {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return StatusKey::Unknown;
    }

    let exact = match (context, trimmed.to_ascii_uppercase().as_str()) {
        (_, "OPEN") => Some(StatusKey::Open),
        (_, "WORKING") => Some(StatusKey::Working),
        (_, "COMPLETED") => Some(StatusKey::Completed),
        (_, "CANCELLED") => Some(StatusKey::Cancelled),
        (_, "PAUSED") => Some(StatusKey::Paused),
        (StatusContext::Assignment, "PENDING") => Some(StatusKey::Pending),
        (StatusContext::Assignment, "ACCEPTED") => Some(StatusKey::Accepted),
        (StatusContext::Assignment, "IN_PROGRESS") => Some(StatusKey::Working),
        (StatusContext::Assignment, "REJECTED") => Some(StatusKey::Rejected),
        _ => None,
    };
    if let Some(key) = exact {
        return key;
    }

    status_rules()
        .iter()
        .find(|(re, _)| re.is_match(trimmed))
        .map(|(_, key)| *key)
        .unwrap_or(StatusKey::Unknown)
}

fn status_class(key: StatusKey, context: StatusContext) -> StatusClass {
    let (label, color, icon) = match (key, context) {
        (StatusKey::Open, StatusContext::Task) => ("Open", "#1e88e5", "circle"),
        (StatusKey::Open, StatusContext::Assignment) => ("Not started", "#1e88e5", "circle"),
        (StatusKey::Pending, _) => ("Awaiting acceptance", "#8e24aa", "clock"),
        (StatusKey::Accepted, _) => ("Accepted", "#00897b", "check"),
        (StatusKey::Working, _) => ("In progress", "#fb8c00", "play-circle"),
        (StatusKey::Paused, _) => ("Paused", "#757575", "pause-circle"),
        (StatusKey::Completed, _) => ("Completed", "#43a047", "check-circle"),
        (StatusKey::Cancelled, _) => ("Cancelled", "#e53935", "x-circle"),
        (StatusKey::Rejected, _) => ("Rejected", "#c62828", "slash"),
        (StatusKey::Unknown, _) => ("Unknown", "#9e9e9e", "help-circle"),
    };
    StatusClass {
        key,
        label,
        color,
        icon,
    }
}

// Negated phrases ("chưa hoàn thành", "not completed") must match before the
// completed rule.
fn status_rules() -> &'static [(Regex, StatusKey)] {
    static RULES: OnceLock<Vec<(Regex, StatusKey)>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile_rules(&[
            (r"(?i)hủy|huỷ|\bcancel+ed\b|\bcanceled\b|\bvoid\b", StatusKey::Cancelled),
            (r"(?i)từ chối|\brejected\b|\bdeclined\b", StatusKey::Rejected),
            (
                r"(?i)chưa|\bnot (yet|started|completed|done)\b|\bincomplete\b",
                StatusKey::Open,
            ),
            (
                r"(?i)hoàn thành|\bxong\b|\bcompleted?\b|\bdone\b|\bfinished\b|\bclosed\b",
                StatusKey::Completed,
            ),
            (r"(?i)tạm dừng|\bpaused?\b|\bon hold\b|\bsuspended\b", StatusKey::Paused),
            (
                r"(?i)đang|\bin[ _-]?progress\b|\bworking\b|\bprocessing\b|\bstarted\b",
                StatusKey::Working,
            ),
            (r"(?i)đã nhận|\baccepted\b|\backnowledged\b", StatusKey::Accepted),
            (r"(?i)\bchờ\b|\bpending\b|\bwaiting\b|\bassigned\b", StatusKey::Pending),
            (r"(?i)\bmới\b|\bnew\b|\bopen\b|\btodo\b|\bto do\b", StatusKey::Open),
        ])
    })
}

fn compile_rules<K: Copy>(rules: &[(&str, K)]) -> Vec<(Regex, K)> {
    rules
        .iter()
        .filter_map(|(pattern, key)| match Regex::new(pattern) {
            Ok(re) => Some((re, *key)),
            Err(err) => {
                tracing::error!(pattern, error = %err, "failed to compile classification rule");
                None
            }
        })
        .collect()
}
