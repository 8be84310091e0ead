//! Content-addressed screenshot store.
//!
//! Capture files are named `{hash-prefix}_{timestamp-millis}.png` so
//! identical pixel content at different times stays distinguishable, while
//! equal hashes still give trivial dedup detection. Filesystem mtime
//! ordering substitutes for an index; the capture volume is bounded and
//! local.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::traits::ScreenSource;
use crate::types::CaptureRecord;

/// Hex digits of the content hash kept in filenames.
const HASH_PREFIX_LEN: usize = 12;

pub struct CaptureStore {
    dir: PathBuf,
    source: Arc<dyn ScreenSource>,
}

impl CaptureStore {
    pub fn new(dir: impl Into<PathBuf>, source: Arc<dyn ScreenSource>) -> Self {
        Self {
            dir: dir.into(),
            source,
        }
    }

    /// Grab one frame, hash it, and persist it under a content-addressed
    /// name. Any grab or write failure is a capture error: reportable and
    /// retryable, never a crash.
    pub async fn capture(&self) -> Result<CaptureRecord, CoreError> {
        let bytes = self.source.grab().await?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            CoreError::capture(format!(
                "cannot create capture directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let hash = hex::encode(Sha256::digest(&bytes));
        let taken_at = Utc::now();
        let filename = format!(
            "{}_{}.png",
            &hash[..HASH_PREFIX_LEN],
            taken_at.timestamp_millis()
        );
        let path = self.dir.join(filename);

        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            CoreError::capture(format!("cannot write {}: {}", path.display(), e))
        })?;

        let (width, height) = match png_dimensions(&bytes) {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };

        debug!(path = %path.display(), bytes = bytes.len(), "captured frame");

        Ok(CaptureRecord {
            taken_at,
            path,
            hash: Some(hash),
            width,
            height,
        })
    }

    /// Most recently modified capture by directory scan, or `None` when
    /// the directory is empty or missing. Metadata-only: the content hash
    /// and dimensions are not recomputed. A file vanishing mid-scan (the
    /// sweep racing us) counts as absent.
    pub async fn latest(&self) -> Result<Option<CaptureRecord>, CoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await.unwrap_or(None) {
            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_file() => match meta.modified() {
                    Ok(m) => m,
                    Err(_) => continue,
                },
                _ => continue,
            };
            match &newest {
                Some((best, _)) if *best >= modified => {}
                _ => newest = Some((modified, entry.path())),
            }
        }

        Ok(newest.map(|(modified, path)| CaptureRecord {
            taken_at: DateTime::<Utc>::from(modified),
            path,
            hash: None,
            width: None,
            height: None,
        }))
    }

    /// Delete every capture whose mtime precedes `now - max_age`.
    /// Per-file failures are logged and skipped; the scan continues.
    /// Returns the number of files deleted.
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<u64, CoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(UNIX_EPOCH);

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };

        let mut deleted = 0u64;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("capture sweep: directory scan stopped: {}", e);
                    break;
                }
            };
            let path = entry.path();

            let modified = match entry.metadata().await {
                Ok(meta) => match meta.modified() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), "capture sweep: no mtime: {}", e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), "capture sweep: stat failed: {}", e);
                    continue;
                }
            };

            if modified < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        warn!(path = %path.display(), "capture sweep: delete failed: {}", e);
                    }
                }
            }
        }

        if deleted > 0 {
            debug!(deleted, "capture sweep removed stale files");
        }
        Ok(deleted)
    }
}

/// Width and height from a PNG IHDR header. Reads the header only, no
/// pixel decoding. `None` for anything that isn't a well-formed PNG prefix.
pub fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    if bytes.len() < 24 || bytes[..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Production screen source: shells out to the platform screenshot tool,
/// writing to a temp file that is read back and removed. A `command`
/// template (with `{path}` substituted) overrides the platform default.
pub struct CommandScreenSource {
    command: Option<String>,
}

impl CommandScreenSource {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    async fn run_grab(&self, out: &Path) -> Result<(), CoreError> {
        let output = if let Some(template) = &self.command {
            let rendered = template.replace("{path}", &out.to_string_lossy());
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(rendered)
                .output()
                .await
        } else {
            platform_grab_command(out)?.output().await
        };

        let output = output
            .map_err(|e| CoreError::capture(format!("cannot run screen grab: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::capture(format!(
                "screen grab exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn platform_grab_command(out: &Path) -> Result<tokio::process::Command, CoreError> {
    let mut cmd = tokio::process::Command::new("screencapture");
    cmd.arg("-x").arg("-t").arg("png").arg(out);
    Ok(cmd)
}

#[cfg(target_os = "linux")]
fn platform_grab_command(out: &Path) -> Result<tokio::process::Command, CoreError> {
    let mut cmd = tokio::process::Command::new("gnome-screenshot");
    cmd.arg("-f").arg(out);
    Ok(cmd)
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn platform_grab_command(_out: &Path) -> Result<tokio::process::Command, CoreError> {
    Err(CoreError::capture(
        "no screen grab command available on this platform; set [capture].command",
    ))
}

#[async_trait]
impl ScreenSource for CommandScreenSource {
    async fn grab(&self) -> Result<Vec<u8>, CoreError> {
        let out_path = std::env::temp_dir().join(format!(
            "companiond-grab-{}.png",
            uuid::Uuid::new_v4()
        ));

        let grabbed = self.run_grab(&out_path).await;
        let bytes = match grabbed {
            Ok(()) => tokio::fs::read(&out_path).await.map_err(|e| {
                CoreError::capture(format!("grab output unreadable: {}", e))
            }),
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&out_path).await;

        let bytes = bytes?;
        if bytes.is_empty() {
            return Err(CoreError::capture("screen grab produced an empty image"));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_png, ScriptedScreenSource};

    fn store_with_frames(
        dir: &Path,
        frames: Vec<Result<Vec<u8>, String>>,
    ) -> CaptureStore {
        CaptureStore::new(dir, Arc::new(ScriptedScreenSource::new(frames)))
    }

    #[tokio::test]
    async fn identical_content_same_hash_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let frame = fake_png(1920, 1080);
        let store = store_with_frames(
            dir.path(),
            vec![Ok(frame.clone()), Ok(frame.clone())],
        );

        let first = store.capture().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.capture().await.unwrap();

        assert_eq!(first.hash, second.hash);
        assert!(first.hash.is_some());
        assert_ne!(first.path, second.path);
        assert!(second.taken_at >= first.taken_at);
    }

    #[tokio::test]
    async fn capture_record_carries_header_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_frames(dir.path(), vec![Ok(fake_png(800, 600))]);

        let record = store.capture().await.unwrap();
        assert_eq!(record.width, Some(800));
        assert_eq!(record.height, Some(600));

        let name = record.path.file_name().unwrap().to_string_lossy().into_owned();
        let hash = record.hash.unwrap();
        assert!(name.starts_with(&hash[..12]));
        assert!(name.ends_with(".png"));
        assert!(name.contains('_'));
    }

    #[tokio::test]
    async fn grab_failure_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_frames(dir.path(), vec![Err("no display".to_string())]);

        let err = store.capture().await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Capture);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn latest_returns_newest_by_mtime_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_frames(
            dir.path(),
            vec![Ok(fake_png(4, 4)), Ok(fake_png(8, 8))],
        );

        assert!(store.latest().await.unwrap().is_none());

        store.capture().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.capture().await.unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.path, second.path);
        // Metadata-only read: hash and dimensions are not recomputed.
        assert!(latest.hash.is_none());
        assert!(latest.width.is_none());
    }

    #[tokio::test]
    async fn latest_on_missing_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-created");
        let store = store_with_frames(&missing, vec![]);
        assert!(store.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evict_zero_age_empties_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_frames(
            dir.path(),
            vec![Ok(fake_png(4, 4)), Ok(fake_png(8, 8))],
        );

        store.capture().await.unwrap();
        store.capture().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let deleted = store.evict_older_than(Duration::ZERO).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.latest().await.unwrap().is_none());

        // Nothing left to evict; missing files are not an error.
        assert_eq!(store.evict_older_than(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn evict_spares_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_frames(dir.path(), vec![Ok(fake_png(4, 4))]);

        let record = store.capture().await.unwrap();
        let deleted = store
            .evict_older_than(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(store.latest().await.unwrap().unwrap().path, record.path);
    }

    #[test]
    fn png_header_parsing() {
        assert_eq!(png_dimensions(&fake_png(1920, 1080)), Some((1920, 1080)));
        assert_eq!(png_dimensions(&fake_png(1, 1)), Some((1, 1)));
        assert_eq!(png_dimensions(b"not a png at all"), None);
        assert_eq!(png_dimensions(&[]), None);
        assert_eq!(png_dimensions(&fake_png(0, 10)), None);

        // Valid signature but truncated before IHDR payload
        let truncated = &fake_png(4, 4)[..16];
        assert_eq!(png_dimensions(truncated), None);
    }
}
