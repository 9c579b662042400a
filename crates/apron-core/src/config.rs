use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::task::View;
use crate::tree::{
  ParentResolution,
  TreeOptions
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.apron"),
      (
        "api.base_url",
        "http://localhost:8080/api"
      ),
      ("api.timeout", "30"),
      ("color", "on"),
      ("default.view", "received"),
      ("tree.level_fallback", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(apronrc = %path.display(), "loading apronrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no apronrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn default_view(
    &self
  ) -> anyhow::Result<View> {
    let raw = self
      .get("default.view")
      .unwrap_or_else(|| {
        "received".to_string()
      });
    View::parse(&raw).ok_or_else(|| {
      anyhow!(
        "invalid default.view: {raw} \
         (expected created, assigned \
         or received)"
      )
    })
  }

  pub fn api_timeout(
    &self
  ) -> anyhow::Result<Duration> {
    let Some(raw) =
      self.get("api.timeout")
    else {
      return Ok(Duration::from_secs(
        DEFAULT_TIMEOUT_SECS
      ));
    };
    let secs: u64 =
      raw.trim().parse().with_context(
        || {
          format!(
            "invalid api.timeout: \
             {raw}"
          )
        }
      )?;
    Ok(Duration::from_secs(secs))
  }

  pub fn tree_options(
    &self
  ) -> TreeOptions {
    let parent_resolution = if self
      .get_bool("tree.level_fallback")
      .unwrap_or(true)
    {
      ParentResolution::LevelFallback
    } else {
      ParentResolution::Strict
    };
    TreeOptions {
      parent_resolution
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(canonical_or_self(&path));

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      line = strip_inline_comment(line);

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        if self.loaded_files.contains(
          &canonical_or_self(&include_path)
        ) {
          warn!(include = %include_path.display(), "include already loaded; skipping");
          continue;
        }
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("APRONRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping apronrc"
    );
    return Ok(None);
  };
  let candidate = home.join(".apronrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".apron"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

/// Resolves `.`/`..` and symlinks so
/// one file reached by two spellings
/// compares equal.
fn canonical_or_self(
  path: &Path
) -> PathBuf {
  fs::canonicalize(path)
    .unwrap_or_else(|_| path.to_path_buf())
}

/// `#` starts a comment only at the
/// beginning of a line or after
/// whitespace, so values such as
/// tokens may contain it.
fn strip_inline_comment(
  line: &str
) -> &str {
  let mut prev_ws = true;
  for (idx, ch) in line.char_indices() {
    if ch == '#' && prev_ws {
      return line[..idx].trim();
    }
    prev_ws = ch.is_whitespace();
  }
  line
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use tempfile::tempdir;

  use super::{
    Config,
    parse_bool,
    strip_inline_comment
  };
  use crate::task::View;
  use crate::tree::ParentResolution;

  #[test]
  fn defaults_apply_without_rc_file() {
    let cfg = Config::default();
    assert_eq!(
      cfg.default_view().unwrap(),
      View::Received
    );
    assert_eq!(
      cfg.api_timeout().unwrap(),
      Duration::from_secs(30)
    );
    assert_eq!(
      cfg
        .tree_options()
        .parent_resolution,
      ParentResolution::LevelFallback
    );
  }

  #[test]
  fn rc_file_with_comments_and_include()
  {
    let dir = tempdir().unwrap();
    let shared = dir.path().join("shared.rc");
    fs::write(
      &shared,
      "api.token = abc123\n"
    )
    .unwrap();

    let rc = dir.path().join("apronrc");
    fs::write(
      &rc,
      "# ramp crew settings\n\
       api.base_url = https://ops.example.test/api  # prod\n\
       \n\
       default.view=assigned\n\
       include shared.rc\n\
       include missing.rc\n"
    )
    .unwrap();

    let cfg =
      Config::load(Some(&rc)).unwrap();
    assert_eq!(
      cfg.get("api.base_url").as_deref(),
      Some("https://ops.example.test/api")
    );
    assert_eq!(
      cfg.get("api.token").as_deref(),
      Some("abc123")
    );
    assert_eq!(
      cfg.default_view().unwrap(),
      View::Assigned
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn invalid_line_is_rejected() {
    let dir = tempdir().unwrap();
    let rc = dir.path().join("apronrc");
    fs::write(&rc, "no equals sign\n")
      .unwrap();
    assert!(
      Config::load(Some(&rc)).is_err()
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::default();
    cfg.apply_overrides([
      (
        "rc.tree.level_fallback"
          .to_string(),
        "off".to_string()
      ),
      (
        "api.timeout".to_string(),
        "5".to_string()
      )
    ]);
    assert_eq!(
      cfg
        .tree_options()
        .parent_resolution,
      ParentResolution::Strict
    );
    assert_eq!(
      cfg.api_timeout().unwrap(),
      Duration::from_secs(5)
    );

    cfg.apply_overrides([(
      "default.view".to_string(),
      "everything".to_string()
    )]);
    assert!(cfg.default_view().is_err());
  }

  #[test]
  fn self_include_spelled_relatively_is_skipped()
  {
    let dir = tempdir().unwrap();
    let rc = dir.path().join("apronrc");
    fs::write(
      &rc,
      "color = off
       include ./apronrc
       include ../{}/apronrc
"
        .replace(
          "{}",
          &dir
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
        )
    )
    .unwrap();

    let cfg =
      Config::load(Some(&rc)).unwrap();
    assert_eq!(cfg.loaded_files.len(), 1);
    assert_eq!(
      cfg.get("color").as_deref(),
      Some("off")
    );
  }

  #[test]
  fn hash_inside_value_is_kept() {
    let dir = tempdir().unwrap();
    let rc = dir.path().join("apronrc");
    fs::write(
      &rc,
      "api.token = abc#123  # ramp token
       color=on#still-value
"
    )
    .unwrap();

    let cfg =
      Config::load(Some(&rc)).unwrap();
    assert_eq!(
      cfg.get("api.token").as_deref(),
      Some("abc#123")
    );
    assert_eq!(
      cfg.get("color").as_deref(),
      Some("on#still-value")
    );
    assert_eq!(
      strip_inline_comment("# whole"),
      ""
    );
  }

  #[test]
  fn bool_parsing() {
    assert!(parse_bool(" Yes "));
    assert!(parse_bool("on"));
    assert!(!parse_bool("off"));
    assert!(!parse_bool("maybe"));
  }
}
