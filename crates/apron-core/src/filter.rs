use std::collections::BTreeSet;

use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use clap::ValueEnum;
use tracing::trace;

use crate::classify::{
  PriorityKey,
  StatusContext,
  StatusKey,
  classify_priority,
  classify_status
};
use crate::datetime::to_project_date;
use crate::task::{
  RecipientType,
  Task,
  TaskNode,
  View
};

/// Which timestamp the date range
/// applies to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum DateField {
  /// `createdAt` of the task.
  #[default]
  Created,
  /// `assignedAt` of the first
  /// assignment.
  Assigned
}

impl DateField {
  pub fn for_view(view: View) -> Self {
    match view {
      | View::Assigned => {
        DateField::Assigned
      }
      | View::Created
      | View::Received => {
        DateField::Created
      }
    }
  }
}

/// Single-select status filter kept
/// for the older listings.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  ValueEnum,
)]
pub enum StatusFilter {
  Incomplete,
  Overdue,
  Urgent,
  Completed
}

/// Filter state for a job listing.
///
/// Every field is optional; an empty
/// value places no constraint on that
/// dimension. Active dimensions are
/// AND-ed, members of a set are OR-ed.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
  pub search_text:    Option<String>,
  pub priorities:     BTreeSet<PriorityKey>,
  pub date_from:      Option<NaiveDate>,
  pub date_to:        Option<NaiveDate>,
  pub date_field:     DateField,
  pub assignee_types:
    BTreeSet<RecipientType>,
  pub status:         Option<StatusFilter>,
  /// Reference instant for `overdue`;
  /// the current time when unset.
  pub as_of:          Option<DateTime<Utc>>
}

#[derive(Debug, Clone)]
enum Pred {
  Text(String),
  Priority(BTreeSet<PriorityKey>),
  DateRange {
    field: DateField,
    from:  Option<NaiveDate>,
    to:    Option<NaiveDate>
  },
  AssigneeType(BTreeSet<RecipientType>),
  Status(StatusFilter)
}

impl FilterSpec {
  pub fn for_view(view: View) -> Self {
    Self {
      date_field: DateField::for_view(
        view
      ),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.predicates().is_empty()
  }

  pub fn matches(
    &self,
    task: &Task,
    now: DateTime<Utc>
  ) -> bool {
    self.predicates().iter().all(
      |pred| eval_pred(pred, task, now)
    )
  }

  fn predicates(&self) -> Vec<Pred> {
    let mut preds = Vec::new();

    if let Some(text) = self
      .search_text
      .as_deref()
      .map(str::trim)
      .filter(|text| !text.is_empty())
    {
      preds.push(Pred::Text(
        text.to_lowercase()
      ));
    }

    if !self.priorities.is_empty() {
      preds.push(Pred::Priority(
        self.priorities.clone()
      ));
    }

    if self.date_from.is_some()
      || self.date_to.is_some()
    {
      preds.push(Pred::DateRange {
        field: self.date_field,
        from:  self.date_from,
        to:    self.date_to
      });
    }

    if !self.assignee_types.is_empty() {
      preds.push(Pred::AssigneeType(
        self.assignee_types.clone()
      ));
    }

    if let Some(status) = self.status {
      preds.push(Pred::Status(status));
    }

    preds
  }
}

/// Root jobs that pass every active
/// dimension, in input order. Subtasks
/// travel with their root unchanged.
#[tracing::instrument(skip_all, fields(jobs = jobs.len()))]
pub fn filter_jobs(
  jobs: &[TaskNode],
  spec: &FilterSpec
) -> Vec<TaskNode> {
  let preds = spec.predicates();
  if preds.is_empty() {
    return jobs.to_vec();
  }

  let now =
    spec.as_of.unwrap_or_else(Utc::now);
  jobs
    .iter()
    .filter(|node| {
      preds.iter().all(|pred| {
        eval_pred(pred, &node.task, now)
      })
    })
    .cloned()
    .collect()
}

fn eval_pred(
  pred: &Pred,
  task: &Task,
  now: DateTime<Utc>
) -> bool {
  let ok = match pred {
    | Pred::Text(needle) => {
      [
        Some(task.title.as_str()),
        task.content.as_deref(),
        task.description.as_deref()
      ]
      .into_iter()
      .flatten()
      .any(|field| {
        field
          .to_lowercase()
          .contains(needle.as_str())
      })
    }
    | Pred::Priority(keys) => {
      keys.contains(
        &classify_priority(
          &task.priority
        )
        .key
      )
    }
    | Pred::DateRange {
      field,
      from,
      to
    } => {
      date_for(task, *field)
        .map(to_project_date)
        .is_some_and(|day| {
          from.is_none_or(|from| {
            day >= from
          }) && to
            .is_none_or(|to| day <= to)
        })
    }
    | Pred::AssigneeType(kinds) => {
      task.assignments.iter().any(
        |assignment| {
          assignment
            .recipient_type
            .is_some_and(|kind| {
              kinds.contains(&kind)
            })
        }
      )
    }
    | Pred::Status(status) => {
      eval_status(*status, task, now)
    }
  };

  trace!(pred = ?pred, id = %task.id, ok, "filter predicate evaluation");
  ok
}

fn date_for(
  task: &Task,
  field: DateField
) -> Option<DateTime<Utc>> {
  match field {
    | DateField::Created => {
      task.created_at
    }
    | DateField::Assigned => {
      task
        .primary_assignment()
        .and_then(|a| a.assigned_at)
    }
  }
}

fn eval_status(
  status: StatusFilter,
  task: &Task,
  now: DateTime<Utc>
) -> bool {
  let key = task_status_key(task);

  match status {
    | StatusFilter::Incomplete => {
      key.is_some_and(|key| {
        !key.is_closed()
      })
    }
    | StatusFilter::Completed => {
      key == Some(StatusKey::Completed)
    }
    | StatusFilter::Urgent => {
      classify_priority(&task.priority)
        .key
        == PriorityKey::Urgent
    }
    | StatusFilter::Overdue => {
      let open = key
        .is_none_or(|key| !key.is_closed());
      let assignment =
        task.primary_assignment();
      open
        && assignment.is_some_and(|a| {
          a.completed_at.is_none()
            && a
              .due_at
              .is_some_and(|due| due < now)
        })
    }
  }
}

fn task_status_key(
  task: &Task
) -> Option<StatusKey> {
  if task.status.trim().is_empty() {
    return None;
  }
  Some(
    classify_status(
      &task.status,
      StatusContext::Task
    )
    .key
  )
}
