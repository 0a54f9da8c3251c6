// src/extract.rs

use anyhow::{Context, Result};
use glob::{glob_with, MatchOptions};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{error, info, instrument, warn};
use zip::ZipArchive;

use crate::history::{ArtifactRegistry, ArtifactState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Extracted { archive: String, entries: usize },
    AlreadyExtracted { archive: String },
    Corrupt { archive: String, cause: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub archives: usize,
    pub extracted: usize,
    pub already_extracted: usize,
    pub corrupt: usize,
}

impl ExtractSummary {
    fn record(&mut self, outcome: &ExtractOutcome) {
        self.archives += 1;
        match outcome {
            ExtractOutcome::Extracted { .. } => self.extracted += 1,
            ExtractOutcome::AlreadyExtracted { .. } => self.already_extracted += 1,
            ExtractOutcome::Corrupt { .. } => self.corrupt += 1,
        }
    }
}

/// Name an archive's payload is expected to extract to: the archive name
/// minus its `.zip` suffix.
pub fn expected_name(archive_name: &str) -> Option<&str> {
    let cut = archive_name.len().checked_sub(4)?;
    let (stem, ext) = (archive_name.get(..cut)?, archive_name.get(cut..)?);
    if ext.eq_ignore_ascii_case(".zip") && !stem.is_empty() {
        Some(stem)
    } else {
        None
    }
}

/// Unpacks every `*.zip` in `raw_dir` into the flat `out_dir`.
pub struct Extractor {
    raw_dir: PathBuf,
    out_dir: PathBuf,
}

impl Extractor {
    pub fn new(raw_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            out_dir: out_dir.into(),
        }
    }

    #[instrument(level = "info", skip(self), fields(raw = %self.raw_dir.display(), out = %self.out_dir.display()))]
    pub fn run(&self) -> Result<ExtractSummary> {
        let mut registry = ArtifactRegistry::scan(&self.out_dir)?;
        let archives = list_archives(&self.raw_dir)?;
        info!(archives = archives.len(), "starting extraction");

        let mut summary = ExtractSummary::default();
        for path in archives {
            let outcome = self.extract_one(&path, &mut registry);
            summary.record(&outcome);
        }

        info!(
            archives = summary.archives,
            extracted = summary.extracted,
            already_extracted = summary.already_extracted,
            corrupt = summary.corrupt,
            "extraction completed"
        );
        Ok(summary)
    }

    fn extract_one(&self, path: &Path, registry: &mut ArtifactRegistry) -> ExtractOutcome {
        let archive = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(expected) = expected_name(&archive) {
            if registry.state(expected) == ArtifactState::Present {
                return ExtractOutcome::AlreadyExtracted { archive };
            }
        }

        match unpack(path, registry) {
            Ok(written) => {
                info!(archive = %archive, entries = written.len(), "extracted");
                if let Some(expected) = expected_name(&archive) {
                    if !written.iter().any(|w| w == expected) {
                        warn!(archive = %archive, expected, "archive did not contain its expected file");
                    }
                }
                ExtractOutcome::Extracted {
                    archive,
                    entries: written.len(),
                }
            }
            Err(e) => {
                error!(archive = %archive, error = %format!("{:#}", e), "corrupt ZIP file");
                ExtractOutcome::Corrupt {
                    archive,
                    cause: format!("{:#}", e),
                }
            }
        }
    }
}

/// Sorted list of `*.zip` files directly under `dir`. The extension is
/// matched without regard to case, as in `expected_name`.
fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.zip", glob::Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let mut paths: Vec<PathBuf> = glob_with(&pattern, options)
        .with_context(|| format!("invalid glob pattern {}", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Decompress every file entry of `zip_path` into the registry's directory,
/// flattening any internal folders.
///
/// All entries are first decompressed into hidden temp files; they are renamed
/// to their final names only once every entry has passed its checksum. An
/// archive that fails anywhere leaves none of its entries behind, so the next
/// run retries it.
fn unpack(zip_path: &Path, registry: &mut ArtifactRegistry) -> Result<Vec<String>> {
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;

    let mut staged: Vec<(String, NamedTempFile)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to access ZIP entry #{} in {:?}", i, zip_path))?;
        if !entry.is_file() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        else {
            warn!(entry = entry.name(), "skipping entry with unsafe path");
            continue;
        };

        let mut tmp = NamedTempFile::new_in(registry.dir())
            .with_context(|| format!("creating temp file in {:?}", registry.dir()))?;
        io::copy(&mut entry, &mut tmp)
            .and_then(|_| tmp.flush())
            .with_context(|| format!("Failed to extract {} from {:?}", name, zip_path))?;
        staged.push((name, tmp));
    }

    let mut written: Vec<String> = Vec::with_capacity(staged.len());
    for (name, tmp) in staged {
        let dest = registry.path_of(&name);
        if let Err(e) = tmp.persist(&dest) {
            for done in &written {
                let _ = fs::remove_file(registry.path_of(done));
            }
            return Err(e.error).with_context(|| format!("renaming temp file to {:?}", dest));
        }
        written.push(name);
    }
    for name in &written {
        registry.mark_present(name);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use zip::{write::SimpleFileOptions, CompressionMethod};

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(io::Cursor::new(&mut buf));
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let tmp = tempdir().unwrap();
        let raw = tmp.path().join("raw");
        let out = tmp.path().join("extracted");
        fs::create_dir_all(&raw).unwrap();
        (tmp, raw, out)
    }

    #[test]
    fn expected_name_strips_zip_suffix() {
        assert_eq!(
            expected_name("cm01JAN2015bhav.csv.zip"),
            Some("cm01JAN2015bhav.csv")
        );
        assert_eq!(
            expected_name("BhavCopy_NSE_CM_0_0_0_20240708_F_0000.csv.ZIP"),
            Some("BhavCopy_NSE_CM_0_0_0_20240708_F_0000.csv")
        );
        assert_eq!(expected_name("ind_close_all_01012015.csv"), None);
        assert_eq!(expected_name(".zip"), None);
    }

    #[test]
    fn extracts_and_is_idempotent() {
        let (_tmp, raw, out) = setup();
        fs::write(
            raw.join("cm01JAN2015bhav.csv.zip"),
            zip_bytes(&[("cm01JAN2015bhav.csv", "SYMBOL,SERIES\nABC,EQ\n")]),
        )
        .unwrap();
        fs::write(
            raw.join("cm02JAN2015bhav.csv.zip"),
            zip_bytes(&[("cm02JAN2015bhav.csv", "SYMBOL,SERIES\nXYZ,EQ\n")]),
        )
        .unwrap();

        let ex = Extractor::new(&raw, &out);
        let first = ex.run().unwrap();
        assert_eq!(first.archives, 2);
        assert_eq!(first.extracted, 2);
        assert_eq!(
            fs::read_to_string(out.join("cm01JAN2015bhav.csv")).unwrap(),
            "SYMBOL,SERIES\nABC,EQ\n"
        );

        // a second pass must not decompress anything; prove it by tampering
        fs::write(out.join("cm01JAN2015bhav.csv"), "edited").unwrap();
        let second = ex.run().unwrap();
        assert_eq!(second.extracted, 0);
        assert_eq!(second.already_extracted, 2);
        assert_eq!(
            fs::read_to_string(out.join("cm01JAN2015bhav.csv")).unwrap(),
            "edited"
        );

        let mut names: Vec<_> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["cm01JAN2015bhav.csv", "cm02JAN2015bhav.csv"]);
    }

    #[test]
    fn corrupt_archive_does_not_stop_the_batch() {
        let (_tmp, raw, out) = setup();
        fs::write(raw.join("cm01JAN2015bhav.csv.zip"), b"this is not a zip").unwrap();
        fs::write(
            raw.join("cm02JAN2015bhav.csv.zip"),
            zip_bytes(&[("cm02JAN2015bhav.csv", "A\n1\n")]),
        )
        .unwrap();

        let summary = Extractor::new(&raw, &out).run().unwrap();
        assert_eq!(summary.corrupt, 1);
        assert_eq!(summary.extracted, 1);
        assert!(!out.join("cm01JAN2015bhav.csv").exists());
        assert!(out.join("cm02JAN2015bhav.csv").exists());
    }

    #[test]
    fn checksum_failure_leaves_no_partial_file() {
        let (_tmp, raw, out) = setup();
        let payload = "SYMBOL,SERIES\nABC,EQ\nDEF,EQ\n";
        let mut bytes = zip_bytes(&[("cm05JAN2015bhav.csv", payload)]);
        let at = bytes
            .windows(3)
            .position(|w| w == b"DEF")
            .expect("stored payload is present verbatim");
        bytes[at] = b'X';
        fs::write(raw.join("cm05JAN2015bhav.csv.zip"), bytes).unwrap();

        let summary = Extractor::new(&raw, &out).run().unwrap();
        assert_eq!(summary.corrupt, 1);
        assert!(!out.join("cm05JAN2015bhav.csv").exists());

        // and the next run retries it rather than treating it as done
        let again = Extractor::new(&raw, &out).run().unwrap();
        assert_eq!(again.corrupt, 1);
        assert_eq!(again.already_extracted, 0);
    }

    #[test]
    fn failure_in_a_later_entry_discards_the_whole_archive() {
        let (_tmp, raw, out) = setup();
        let mut bytes = zip_bytes(&[
            ("cm06JAN2015bhav.csv", "SYMBOL,SERIES\nABC,EQ\n"),
            ("extra.csv", "SYMBOL\nQWERTY\n"),
        ]);
        let at = bytes
            .windows(6)
            .position(|w| w == b"QWERTY")
            .expect("stored payload is present verbatim");
        bytes[at] = b'X';
        fs::write(raw.join("cm06JAN2015bhav.csv.zip"), bytes).unwrap();

        let summary = Extractor::new(&raw, &out).run().unwrap();
        assert_eq!(summary.corrupt, 1);
        assert!(!out.join("cm06JAN2015bhav.csv").exists());
        assert!(!out.join("extra.csv").exists());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);

        let again = Extractor::new(&raw, &out).run().unwrap();
        assert_eq!(again.corrupt, 1);
        assert_eq!(again.already_extracted, 0);
    }

    #[test]
    fn upper_case_extension_is_listed() {
        let (_tmp, raw, out) = setup();
        fs::write(
            raw.join("BhavCopy_NSE_CM_0_0_0_20240708_F_0000.csv.ZIP"),
            zip_bytes(&[("BhavCopy_NSE_CM_0_0_0_20240708_F_0000.csv", "A\n1\n")]),
        )
        .unwrap();

        let ex = Extractor::new(&raw, &out);
        assert_eq!(ex.run().unwrap().extracted, 1);
        assert!(out.join("BhavCopy_NSE_CM_0_0_0_20240708_F_0000.csv").exists());
        assert_eq!(ex.run().unwrap().already_extracted, 1);
    }

    #[test]
    fn nested_entries_are_flattened_and_non_zip_files_ignored() {
        let (_tmp, raw, out) = setup();
        fs::write(
            raw.join("bundle.zip"),
            zip_bytes(&[("inner/dir/bundle", "x\n")]),
        )
        .unwrap();
        fs::write(raw.join("ind_close_all_01012015.csv"), "not an archive").unwrap();

        let summary = Extractor::new(&raw, &out).run().unwrap();
        assert_eq!(summary.archives, 1);
        assert_eq!(summary.extracted, 1);
        assert!(out.join("bundle").exists());
    }
}
