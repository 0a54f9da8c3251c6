// src/history/mod.rs

pub mod state;

pub use state::ArtifactState;

use anyhow::{Context, Result};
use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::debug;

/// Registry of the artifacts one stage owns, keyed by canonical filename.
///
/// Built by scanning `dir` once; the stage then marks what it writes so the
/// registry never needs a second scan. Hidden files (in-flight temp files)
/// are not artifacts.
pub struct ArtifactRegistry {
    dir: PathBuf,
    present: HashSet<String>,
}

impl ArtifactRegistry {
    /// Scan `dir`, creating it if needed.
    pub fn scan(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating directory {:?}", &dir))?;

        let mut present = HashSet::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("listing {:?}", &dir))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            present.insert(name);
        }
        debug!(dir = %dir.display(), count = present.len(), "artifact registry scanned");

        Ok(Self { dir, present })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn state(&self, name: &str) -> ArtifactState {
        if self.present.contains(name) {
            ArtifactState::Present
        } else {
            ArtifactState::Missing
        }
    }

    pub fn mark_present(&mut self, name: &str) {
        self.present.insert(name.to_string());
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// Atomically write `bytes` as artifact `name` and mark it present.
    pub fn store(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_of(name);
        write_atomic(&path, |w| {
            w.write_all(bytes)?;
            Ok(())
        })?;
        self.mark_present(name);
        Ok(path)
    }
}

/// Write `dest` through a temp file in the same directory, renamed into
/// place only once `fill` succeeds. A crash mid-write leaves no file at `dest`.
pub fn write_atomic<F>(dest: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> Result<()>,
{
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {:?}", dir))?;
    fill(&mut tmp).with_context(|| format!("writing {:?}", dest))?;
    tmp.flush()?;
    tmp.persist(dest)
        .with_context(|| format!("renaming temp file to {:?}", dest))?;
    Ok(())
}
