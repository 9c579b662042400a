use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::classify::PriorityKey;
use crate::datetime::parse_day_expr;
use crate::filter::{FilterSpec, StatusFilter};
use crate::task::{RecipientType, View};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "apron",
    version,
    about = "Apron: hierarchical job board for the task backend",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "apronrc", global = true)]
    pub apronrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Download the task list for a view and store it as the local snapshot.
    Fetch(FetchArgs),
    /// List jobs as a tree, filtered.
    Jobs(JobsArgs),
    /// Show one task and its subtasks.
    Show(ShowArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    #[arg(long, value_enum)]
    pub view: Option<View>,
}

/// Where a listing gets its tasks from.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    #[arg(long, value_enum)]
    pub view: Option<View>,

    /// Read a saved backend response instead of the snapshot.
    #[arg(long, conflicts_with = "refresh")]
    pub input: Option<PathBuf>,

    /// Fetch from the backend even when a snapshot exists.
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct JobsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long)]
    pub search: Option<String>,

    #[arg(long = "priority", value_enum, action = ArgAction::Append)]
    pub priorities: Vec<PriorityKey>,

    #[arg(long)]
    pub from: Option<String>,

    #[arg(long)]
    pub to: Option<String>,

    #[arg(long = "assignee-type", value_enum, action = ArgAction::Append)]
    pub assignee_types: Vec<RecipientType>,

    #[arg(long, value_enum)]
    pub status: Option<StatusFilter>,

    /// List every task at the left margin instead of as a tree.
    #[arg(long, conflicts_with = "json")]
    pub flat: bool,

    /// Print the filtered forest as JSON.
    #[arg(long)]
    pub json: bool,
}

impl JobsArgs {
    #[tracing::instrument(skip(self, now))]
    pub fn to_filter_spec(&self, view: View, now: DateTime<Utc>) -> anyhow::Result<FilterSpec> {
        let date_from = self
            .from
            .as_deref()
            .map(|raw| parse_day_expr(raw, now))
            .transpose()?;
        let date_to = self
            .to
            .as_deref()
            .map(|raw| parse_day_expr(raw, now))
            .transpose()?;

        if let (Some(from), Some(to)) = (date_from, date_to)
            && from > to
        {
            warn!(%from, %to, "date range is empty; no job can match");
        }

        Ok(FilterSpec {
            search_text: self.search.clone(),
            priorities: self.priorities.iter().copied().collect::<BTreeSet<_>>(),
            date_from,
            date_to,
            assignee_types: self.assignee_types.iter().copied().collect(),
            status: self.status,
            as_of: Some(now),
            ..FilterSpec::for_view(view)
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    pub id: String,

    #[command(flatten)]
    pub source: SourceArgs,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                if k.trim().is_empty() {
                    return Err(anyhow!("empty key in override: {s}"));
                }
                debug!(key = %k, "captured positional rc override");
                overrides.push((format!("rc.{}", k.trim()), v.trim().to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::filter::DateField;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_overrides_are_extracted() {
        let pre = preprocess_args(&os(&[
            "apron",
            "rc.color=off",
            "jobs",
            "rc.default.view:created",
            "--flat",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, os(&["apron", "jobs", "--flat"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.default.view".to_string(), "created".to_string()),
            ]
        );
        assert!(preprocess_args(&os(&["apron", "rc.=x"])).is_err());
    }

    #[test]
    fn jobs_flags_parse() {
        let cli = GlobalCli::try_parse_from([
            "apron",
            "-vv",
            "--rc",
            "api.timeout=5",
            "jobs",
            "--view",
            "assigned",
            "--priority",
            "urgent",
            "--priority",
            "low",
            "--assignee-type",
            "team",
            "--status",
            "overdue",
            "--flat",
        ])
        .expect("parse");

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides[0].key, "api.timeout");
        let Some(Command::Jobs(args)) = cli.command else {
            panic!("expected jobs command");
        };
        assert_eq!(args.source.view, Some(View::Assigned));
        assert_eq!(args.priorities, vec![PriorityKey::Urgent, PriorityKey::Low]);
        assert_eq!(args.assignee_types, vec![RecipientType::Team]);
        assert_eq!(args.status, Some(StatusFilter::Overdue));
        assert!(args.flat);
    }

    #[test]
    fn input_and_refresh_conflict() {
        assert!(
            GlobalCli::try_parse_from(["apron", "jobs", "--input", "a.json", "--refresh"]).is_err()
        );
    }

    #[test]
    fn filter_spec_follows_view_and_day_expressions() {
        let now = Utc
            .with_ymd_and_hms(2025, 3, 10, 3, 0, 0)
            .single()
            .expect("valid time");
        let args = JobsArgs {
            from: Some("-2d".to_string()),
            to: Some("2025-03-12".to_string()),
            priorities: vec![PriorityKey::High, PriorityKey::High],
            ..JobsArgs::default()
        };

        let spec = args.to_filter_spec(View::Assigned, now).expect("spec");
        assert_eq!(spec.date_field, DateField::Assigned);
        assert_eq!(spec.date_from, NaiveDate::from_ymd_opt(2025, 3, 8));
        assert_eq!(spec.date_to, NaiveDate::from_ymd_opt(2025, 3, 12));
        assert_eq!(spec.priorities.len(), 1);
        assert_eq!(spec.as_of, Some(now));

        let bad = JobsArgs {
            from: Some("someday".to_string()),
            ..JobsArgs::default()
        };
        assert!(bad.to_filter_spec(View::Created, now).is_err());
    }
}
