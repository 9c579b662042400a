use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::response::{NormalizedResponse, normalize_response_str};
use crate::task::View;

/// Local copy of the last task list fetched for each view, so listings work
/// without reaching the backend.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened datastore");
        Ok(Self { data_dir })
    }

    pub fn snapshot_path(&self, view: View) -> PathBuf {
        self.data_dir.join(format!("{}.json", view.as_str()))
    }

    #[tracing::instrument(skip(self), fields(view = %view))]
    pub fn load_snapshot(&self, view: View) -> anyhow::Result<Option<NormalizedResponse>> {
        let path = self.snapshot_path(view);
        if !path.exists() {
            debug!(file = %path.display(), "no snapshot stored");
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let snapshot: NormalizedResponse = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", path.display()))?;
        debug!(count = snapshot.tasks.len(), "loaded snapshot");
        Ok(Some(snapshot))
    }

    #[tracing::instrument(skip(self, snapshot), fields(view = %view, count = snapshot.tasks.len()))]
    pub fn save_snapshot(&self, view: View, snapshot: &NormalizedResponse) -> anyhow::Result<()> {
        let path = self.snapshot_path(view);
        save_json_atomic(&path, snapshot)
            .with_context(|| format!("failed to save {}", path.display()))
    }

    /// Reads a raw backend payload from disk, in any of the known layouts.
    #[tracing::instrument(skip(self))]
    pub fn import_response(&self, path: &Path) -> anyhow::Result<NormalizedResponse> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        normalize_response_str(&raw)
            .with_context(|| format!("failed normalizing {}", path.display()))
    }
}

#[tracing::instrument(skip(path, snapshot))]
fn save_json_atomic(path: &Path, snapshot: &NormalizedResponse) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving snapshot atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, snapshot)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
