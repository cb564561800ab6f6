//! Download/Verification Loop
//!
//! The browser saves exports into a staging directory. After the export is
//! triggered the directory is polled for a completed report that was not
//! there before; the newest such file is moved to the item's canonical path.
//! Nothing is written under the output root unless a file actually arrived.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::form::Form;
use crate::scan::{WorkItem, REPORT_EXTENSION};
use crate::settings::Timings;

/// Suffix of a download still in progress
const PARTIAL_SUFFIX: &str = ".crdownload";

/// Captures exports from one staging directory
#[derive(Debug, Clone)]
pub struct DownloadCapture {
    staging: PathBuf,
    timeout: Duration,
    poll: Duration,
}

impl DownloadCapture {
    pub fn new(staging: impl Into<PathBuf>, timings: &Timings) -> Self {
        Self {
            staging: staging.into(),
            timeout: timings.download_timeout,
            poll: timings.download_poll,
        }
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Names currently in the staging directory
    pub fn snapshot(&self) -> HashSet<PathBuf> {
        std::fs::read_dir(&self.staging)
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    fn is_complete(path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let has_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(REPORT_EXTENSION));
        has_extension
            && !name.ends_with(PARTIAL_SUFFIX)
            && std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
    }

    fn stamp(path: &Path) -> SystemTime {
        std::fs::metadata(path)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Completed paths that partial downloads in `before` will land on
    fn pending_targets(before: &HashSet<PathBuf>) -> HashSet<PathBuf> {
        before
            .iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                let target = name.strip_suffix(PARTIAL_SUFFIX)?;
                Some(path.with_file_name(target))
            })
            .collect()
    }

    /// Newest completed report not in `before` and not finished from it
    fn newest_new_file(&self, before: &HashSet<PathBuf>) -> Option<PathBuf> {
        let pending = Self::pending_targets(before);
        self.snapshot()
            .into_iter()
            .filter(|path| !before.contains(path) && !pending.contains(path))
            .filter(|path| Self::is_complete(path))
            .max_by_key(|path| Self::stamp(path))
    }

    /// Remove reports and partial downloads left by earlier exports
    pub fn clear_leftovers(&self) -> usize {
        let mut removed = 0;
        for path in self.snapshot() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let is_report = name.ends_with(PARTIAL_SUFFIX)
                || path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(REPORT_EXTENSION));
            if !is_report || !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "Could not clear staging file"),
            }
        }
        if removed > 0 {
            tracing::warn!(removed, dir = %self.staging.display(), "Cleared leftover exports from staging");
        }
        removed
    }

    /// Poll until a new completed report appears
    pub async fn wait_for_file(&self, before: &HashSet<PathBuf>) -> Result<PathBuf> {
        let start = Instant::now();

        loop {
            if let Some(path) = self.newest_new_file(before) {
                tracing::debug!(
                    file = %path.display(),
                    waited_ms = start.elapsed().as_millis() as u64,
                    "Download complete"
                );
                return Ok(path);
            }

            if start.elapsed() >= self.timeout {
                return Err(Error::DownloadTimeout {
                    waited_ms: start.elapsed().as_millis() as u64,
                    dir: self.staging.display().to_string(),
                });
            }

            sleep(self.poll).await;
        }
    }

    /// Move `file` to `root/state/year/MON/vahan_data_<stamp>.xlsx`
    pub fn relocate(&self, file: &Path, item: &WorkItem, root: &Path) -> Result<PathBuf> {
        let dir = item.output_dir(root);
        std::fs::create_dir_all(&dir)?;

        let stem = format!("vahan_data_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let target = unique_path(&dir, &stem, REPORT_EXTENSION);

        if let Err(e) = std::fs::rename(file, &target) {
            // Staging and output may sit on different filesystems
            tracing::debug!(error = %e, "Rename failed, copying instead");
            std::fs::copy(file, &target)?;
            std::fs::remove_file(file)?;
        }

        Ok(target)
    }

    /// Trigger the export on `form` and file the result for `item`
    pub async fn trigger_and_capture<F: Form + ?Sized>(
        &self,
        form: &F,
        item: &WorkItem,
        root: &Path,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.staging)?;
        self.clear_leftovers();
        let before = self.snapshot();

        form.trigger_download().await?;
        let file = self.wait_for_file(&before).await?;
        let saved = self.relocate(&file, item, root)?;

        tracing::info!(%item, file = %saved.display(), "Saved report");
        Ok(saved)
    }
}

/// `dir/stem.ext`, or `dir/stem_<n>.ext` for the first free `n`
fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{}.{}", stem, ext));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{}_{}.{}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Month;
    use crate::role::Role;
    use async_trait::async_trait;
    use std::fs;

    /// Form whose export writes `payload` into the staging directory
    struct Exporting {
        staging: PathBuf,
        payload: Option<&'static [u8]>,
    }

    #[async_trait]
    impl Form for Exporting {
        async fn is_alive(&self) -> bool {
            true
        }
        async fn select(&self, _: Role, value: &str) -> Result<String> {
            Ok(value.to_string())
        }
        async fn list_options(&self, _: Role) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn refresh(&self) -> Result<()> {
            Ok(())
        }
        async fn trigger_download(&self) -> Result<()> {
            if let Some(payload) = self.payload {
                fs::write(self.staging.join("reportTable.xlsx"), payload)?;
            }
            Ok(())
        }
        async fn close(self) {}
    }

    fn capture(staging: &Path) -> DownloadCapture {
        DownloadCapture::new(staging, &Timings::instant())
    }

    #[tokio::test]
    async fn test_capture_moves_report_into_item_folder() {
        let staging = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let form = Exporting {
            staging: staging.path().to_path_buf(),
            payload: Some(&b"PK\x03\x04"[..]),
        };
        let item = WorkItem::new("Goa(13)", 2024, Month::Feb);

        let saved = capture(staging.path())
            .trigger_and_capture(&form, &item, out.path())
            .await
            .unwrap();

        assert!(saved.starts_with(out.path().join("Goa(13)").join("2024").join("FEB")));
        let name = saved.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("vahan_data_") && name.ends_with(".xlsx"));
        assert_eq!(fs::read(&saved).unwrap(), b"PK\x03\x04");
        assert!(!staging.path().join("reportTable.xlsx").exists());
    }

    #[tokio::test]
    async fn test_timeout_leaves_output_untouched() {
        let staging = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let form = Exporting {
            staging: staging.path().to_path_buf(),
            payload: None,
        };
        let item = WorkItem::new("Goa(13)", 2024, Month::Feb);

        let err = capture(staging.path())
            .trigger_and_capture(&form, &item, out.path())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DownloadTimeout { .. }));
        assert!(!out.path().join("Goa(13)").exists());
    }

    #[tokio::test]
    async fn test_empty_and_partial_files_are_ignored() {
        let staging = tempfile::tempdir().unwrap();
        let capture = capture(staging.path());
        let before = capture.snapshot();

        fs::write(staging.path().join("a.xlsx"), b"").unwrap();
        fs::write(staging.path().join("b.xlsx.crdownload"), b"PK").unwrap();
        fs::write(staging.path().join("c.csv"), b"a,b").unwrap();

        let err = capture.wait_for_file(&before).await.unwrap_err();
        assert!(matches!(err, Error::DownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn test_files_present_before_trigger_are_ignored() {
        let staging = tempfile::tempdir().unwrap();
        fs::write(staging.path().join("old.xlsx"), b"PK").unwrap();
        let capture = capture(staging.path());
        let before = capture.snapshot();

        assert!(capture.wait_for_file(&before).await.is_err());

        fs::write(staging.path().join("new.xlsx"), b"PK").unwrap();
        let found = capture.wait_for_file(&before).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "new.xlsx");
    }

    #[tokio::test]
    async fn test_late_partial_from_previous_item_is_not_claimed() {
        let staging = tempfile::tempdir().unwrap();
        let partial = staging.path().join("reportTable.xlsx.crdownload");
        fs::write(&partial, b"PK-previous-item").unwrap();
        let capture = capture(staging.path());
        let before = capture.snapshot();

        fs::rename(&partial, staging.path().join("reportTable.xlsx")).unwrap();
        let err = capture.wait_for_file(&before).await.unwrap_err();
        assert!(matches!(err, Error::DownloadTimeout { .. }));

        fs::write(staging.path().join("reportTable (1).xlsx"), b"PK-this-item").unwrap();
        let found = capture.wait_for_file(&before).await.unwrap();
        assert_eq!(fs::read(found).unwrap(), b"PK-this-item");
    }

    #[tokio::test]
    async fn test_leftovers_are_cleared_before_trigger() {
        let staging = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(staging.path().join("reportTable.xlsx.crdownload"), b"PK-previous-item").unwrap();
        fs::write(staging.path().join("stale.xlsx"), b"PK-stale").unwrap();
        fs::write(staging.path().join("notes.txt"), b"keep").unwrap();
        let form = Exporting {
            staging: staging.path().to_path_buf(),
            payload: Some(&b"PK-this-item"[..]),
        };
        let item = WorkItem::new("Goa(13)", 2024, Month::Mar);

        let saved = capture(staging.path())
            .trigger_and_capture(&form, &item, out.path())
            .await
            .unwrap();

        assert_eq!(fs::read(&saved).unwrap(), b"PK-this-item");
        assert!(!staging.path().join("reportTable.xlsx.crdownload").exists());
        assert!(!staging.path().join("stale.xlsx").exists());
        assert!(staging.path().join("notes.txt").exists());
    }

    #[test]
    fn test_name_collisions_get_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vahan_data_x.xlsx"), b"PK").unwrap();
        fs::write(dir.path().join("vahan_data_x_1.xlsx"), b"PK").unwrap();
        assert_eq!(
            unique_path(dir.path(), "vahan_data_x", "xlsx"),
            dir.path().join("vahan_data_x_2.xlsx")
        );
    }
}
