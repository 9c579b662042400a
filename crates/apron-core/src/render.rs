use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::classify::{StatusContext, classify_priority, classify_status};
use crate::config::Config;
use crate::datetime::{format_project_date, format_project_datetime};
use crate::task::{Assignment, TaskNode};
use crate::tree::{flatten, walk};

const INDENT: &str = "  ";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, forest, now))]
    pub fn print_forest(
        &self,
        forest: &[TaskNode],
        flat: bool,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_forest(&mut out, forest, flat, now)
    }

    /// One row per task. In tree mode titles are indented by depth; in flat
    /// mode every task is listed at the left margin in pre-order.
    pub fn write_forest<W: Write>(
        &self,
        writer: W,
        forest: &[TaskNode],
        flat: bool,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Priority", "Status", "Due", "Assignee", "Title"]
            .map(str::to_string)
            .to_vec();

        let mut rows = Vec::new();
        if flat {
            for node in flatten(forest) {
                rows.push(self.row(node, 0, now));
            }
        } else {
            walk(forest, |node, depth| rows.push(self.row(node, depth, now)));
        }

        write_table(writer, headers, rows)
    }

    fn row(&self, node: &TaskNode, depth: usize, now: DateTime<Utc>) -> Vec<String> {
        let task = &node.task;
        let priority = classify_priority(&task.priority);
        let status = classify_status(&task.status, StatusContext::Task);
        let assignment = task.primary_assignment();

        let due = assignment
            .and_then(|a| a.due_at)
            .map(format_project_date)
            .unwrap_or_default();
        let due = if assignment.is_some_and(|a| is_late(a, now)) && !status.key.is_closed() {
            self.paint(&due, "31")
        } else {
            due
        };

        let assignee = assignment
            .map(Assignment::recipient_label)
            .unwrap_or_default();

        let mut title = format!("{}{}", INDENT.repeat(depth), task.title);
        if !node.subtasks.is_empty() {
            title.push_str(&format!(" ({})", node.descendant_count()));
        }

        vec![
            self.paint(task.id.as_str(), "33"),
            format!("{} {}", priority.emoji, priority.label),
            format!("{} {}", status.icon, status.label),
            due,
            assignee,
            title,
        ]
    }

    #[tracing::instrument(skip(self, node, now))]
    pub fn print_task_detail(&self, node: &TaskNode, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_task_detail(&mut out, node, now)
    }

    pub fn write_task_detail<W: Write>(
        &self,
        mut out: W,
        node: &TaskNode,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let task = &node.task;
        let priority = classify_priority(&task.priority);
        let status = classify_status(&task.status, StatusContext::Task);

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.title)?;
        writeln!(out, "status    {} {}", status.icon, status.label)?;
        writeln!(out, "priority  {} {}", priority.emoji, priority.label)?;
        writeln!(out, "level     {}", task.hierarchy_level)?;
        if let Some(parent) = &task.parent_id {
            writeln!(out, "parent    {parent}")?;
        }
        if let Some(created) = task.created_at {
            writeln!(out, "created   {}", format_project_datetime(created))?;
        }
        if let Some(creator) = &task.created_by_user {
            writeln!(out, "creator   {}", creator.display_name())?;
        }
        if let Some(content) = task.content.as_deref().or(task.description.as_deref()) {
            writeln!(out, "content   {content}")?;
        }

        for (idx, assignment) in task.assignments.iter().enumerate() {
            let state = classify_status(&assignment.status, StatusContext::Assignment);
            writeln!(
                out,
                "assign #{} {} [{} {}]",
                idx + 1,
                assignment.recipient_label(),
                state.icon,
                state.label
            )?;
            if let Some(due) = assignment.due_at {
                let text = format_project_datetime(due);
                let text = if is_late(assignment, now) && !status.key.is_closed() {
                    self.paint(&text, "31")
                } else {
                    text
                };
                writeln!(out, "  due     {text}")?;
            }
            if let Some(done) = assignment.completed_at {
                writeln!(out, "  done    {}", format_project_datetime(done))?;
            }
            if let Some(note) = &assignment.note {
                writeln!(out, "  note    {note}")?;
            }
        }

        for attachment in &task.attachments {
            match &attachment.url {
                Some(url) => writeln!(out, "file      {} <{url}>", attachment.name)?,
                None => writeln!(out, "file      {}", attachment.name)?,
            }
        }

        if !node.subtasks.is_empty() {
            writeln!(
                out,
                "subtasks  {} direct, {} total",
                node.subtasks.len(),
                node.descendant_count()
            )?;
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn is_late(assignment: &Assignment, now: DateTime<Utc>) -> bool {
    assignment.completed_at.is_none() && assignment.due_at.is_some_and(|due| due < now)
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = column_count.saturating_sub(1);
    for (idx, header) in headers.iter().enumerate() {
        if idx == last {
            write!(writer, "{header}")?;
        } else {
            write!(writer, "{:width$} ", header, width = widths[idx])?;
        }
    }
    writeln!(writer)?;

    for (idx, width) in widths.iter().enumerate() {
        let sep = if idx == last { "" } else { " " };
        write!(writer, "{}{sep}", "-".repeat(*width))?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            if idx == last {
                write!(writer, "{cell}")?;
                continue;
            }
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
