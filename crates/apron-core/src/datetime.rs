use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Days,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

const TIMEZONE_ENV_VAR: &str =
  "APRON_TIMEZONE";
const DEFAULT_TIMEZONE: Tz =
  chrono_tz::Asia::Ho_Chi_Minh;

/// Timezone used for every calendar-day
/// comparison (date filters, "today").
/// Read once from `$APRON_TIMEZONE`.
pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(|| {
    timezone_from(
      std::env::var(TIMEZONE_ENV_VAR)
        .ok()
        .as_deref()
    )
  })
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

#[must_use]
pub fn format_project_date(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%Y-%m-%d")
    .to_string()
}

#[must_use]
pub fn format_project_datetime(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

fn timezone_from(raw: Option<&str>) -> Tz {
  let Some(name) = raw
    .map(str::trim)
    .filter(|name| !name.is_empty())
  else {
    return DEFAULT_TIMEZONE;
  };

  match name.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        timezone = %tz,
        "timezone from {TIMEZONE_ENV_VAR}"
      );
      tz
    }
    | Err(err) => {
      tracing::warn!(
        timezone = %name,
        error = %err,
        "unknown {TIMEZONE_ENV_VAR}; \
         using {DEFAULT_TIMEZONE}"
      );
      DEFAULT_TIMEZONE
    }
  }
}

fn from_project_local(
  local_naive: NaiveDateTime
) -> Option<DateTime<Utc>> {
  match project_timezone()
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Some(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => None
  }
}

/// Parses a calendar day given on the
/// command line.
///
/// Accepts `today`, `yesterday`,
/// `tomorrow`, relative `+Nd`/`-Nd`,
/// `YYYY-MM-DD` and `DD/MM/YYYY`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_day_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower = token.to_lowercase();
  let today = to_project_date(now);

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!(
            "date out of range: \
             tomorrow"
          )
        });
    }
    | "yesterday" => {
      return today
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!(
            "date out of range: \
             yesterday"
          )
        });
    }
    | _ => {}
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)d$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: u64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let shifted = match caps
      .name("sign")
      .map(|m| m.as_str())
    {
      | Some("-") => {
        today.checked_sub_days(
          Days::new(num)
        )
      }
      | _ => {
        today.checked_add_days(
          Days::new(num)
        )
      }
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative day out of range: \
         {input}"
      )
    });
  }

  for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, fmt
      )
    {
      return Ok(date);
    }
  }

  Err(anyhow!(
    "unrecognized day expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     +Nd/-Nd, YYYY-MM-DD, DD/MM/YYYY"
  })
}

/// Reads a backend timestamp.
///
/// Offsets are honoured; naive values
/// are taken as project-local time; a
/// bare run of digits is epoch millis.
#[must_use]
pub fn parse_timestamp(
  raw: &str
) -> Option<DateTime<Utc>> {
  let token = raw.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  if token
    .chars()
    .all(|c| c.is_ascii_digit())
  {
    return token
      .parse::<i64>()
      .ok()
      .and_then(
        DateTime::from_timestamp_millis
      );
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return from_project_local(ndt);
    }
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .ok()
  .and_then(|date| {
    date.and_hms_opt(0, 0, 0)
  })
  .and_then(from_project_local)
}

/// Serde adapter for optional backend
/// timestamps. Strings and epoch-millis
/// numbers are accepted; anything that
/// does not parse decodes as `None`.
pub mod lenient_timestamp_serde {
  use chrono::{
    DateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };
  use serde_json::Value;

  pub fn serialize<S>(
    dt: &Option<DateTime<Utc>>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match dt {
      | Some(value) => {
        serializer.serialize_str(
          &value.to_rfc3339_opts(
            SecondsFormat::Secs,
            true
          )
        )
      }
      | None => {
        serializer.serialize_none()
      }
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<
    Option<DateTime<Utc>>,
    D::Error
  >
  where
    D: Deserializer<'de>
  {
    let raw =
      Option::<Value>::deserialize(
        deserializer
      )?;
    Ok(match raw {
      | Some(Value::String(text)) => {
        super::parse_timestamp(&text)
      }
      | Some(Value::Number(num)) => {
        num.as_i64().and_then(
          DateTime::from_timestamp_millis
        )
      }
      | _ => None
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    DEFAULT_TIMEZONE,
    parse_day_expr,
    parse_timestamp,
    timezone_from,
    to_project_date
  };

  #[test]
  fn timezone_comes_from_env_value_or_default()
  {
    assert_eq!(
      timezone_from(Some(" Europe/Paris ")),
      chrono_tz::Europe::Paris
    );
    assert_eq!(
      timezone_from(None),
      DEFAULT_TIMEZONE
    );
    assert_eq!(
      timezone_from(Some("  ")),
      DEFAULT_TIMEZONE
    );
    assert_eq!(
      timezone_from(Some("Mars/Olympus")),
      chrono_tz::Asia::Ho_Chi_Minh
    );
  }

  #[test]
  fn parses_named_and_relative_days()
  {
    let now = Utc
      .with_ymd_and_hms(
        2026, 3, 10, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let today = to_project_date(now);

    assert_eq!(
      parse_day_expr("today", now)
        .expect("today"),
      today
    );
    assert_eq!(
      parse_day_expr("Tomorrow", now)
        .expect("tomorrow"),
      today.succ_opt().expect("succ")
    );
    assert_eq!(
      parse_day_expr("-7d", now)
        .expect("relative"),
      today
        - chrono::Duration::days(7)
    );
  }

  #[test]
  fn parses_iso_and_day_first_dates() {
    let now = Utc::now();
    let expected =
      NaiveDate::from_ymd_opt(
        2026, 4, 30
      )
      .expect("valid date");
    assert_eq!(
      parse_day_expr("2026-04-30", now)
        .expect("iso"),
      expected
    );
    assert_eq!(
      parse_day_expr("30/04/2026", now)
        .expect("day first"),
      expected
    );
    assert!(
      parse_day_expr("next week", now)
        .is_err()
    );
  }

  #[test]
  fn parses_backend_timestamps() {
    let exact = Utc
      .with_ymd_and_hms(
        2026, 5, 1, 8, 30, 0
      )
      .single()
      .expect("valid instant");

    assert_eq!(
      parse_timestamp(
        "2026-05-01T08:30:00Z"
      ),
      Some(exact)
    );
    assert_eq!(
      parse_timestamp(
        "2026-05-01T15:30:00+07:00"
      ),
      Some(exact)
    );
    assert_eq!(
      parse_timestamp(&exact
        .timestamp_millis()
        .to_string()),
      Some(exact)
    );

    let day = parse_timestamp(
      "2026-05-01"
    )
    .expect("bare date");
    assert_eq!(
      to_project_date(day),
      NaiveDate::from_ymd_opt(
        2026, 5, 1
      )
      .expect("valid date")
    );

    assert_eq!(
      parse_timestamp("not a date"),
      None
    );
    assert_eq!(
      parse_timestamp("   "),
      None
    );
  }
}
