//! Arrival notifications.
//!
//! `Dispatcher` owns the temporary file an upload needs. The file is created
//! per dispatch, handed to the `Notifier` by path and removed on every exit
//! path: success, failure, or a panic unwinding through the notifier.
//! Delivery is attempted once; failures are reported, never retried.

pub mod telegram;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

pub use telegram::{TelegramConfig, TelegramNotifier};

/// Outbound message channel. Shared between camera loops, so calls may be
/// concurrent.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver the image at `photo` with `caption`. One attempt.
    fn send_photo(&self, photo: &Path, caption: &str) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    temp_dir: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            temp_dir: None,
        }
    }

    /// Put temporary upload files in `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Send `jpeg` with `caption`. Never panics on delivery failure and never
    /// leaves the temporary file behind.
    pub fn dispatch(&self, camera: &str, jpeg: &[u8], caption: &str) -> DispatchOutcome {
        match self.try_dispatch(jpeg, caption) {
            Ok(()) => {
                log::info!("[{}] notification sent via {}", camera, self.notifier.name());
                DispatchOutcome::Delivered
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                log::error!(
                    "[{}] notification via {} failed, event missed: {}",
                    camera,
                    self.notifier.name(),
                    reason
                );
                DispatchOutcome::Failed { reason }
            }
        }
    }

    fn try_dispatch(&self, jpeg: &[u8], caption: &str) -> Result<()> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("arrival-").suffix(".jpg");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("create snapshot temp file")?;
        file.write_all(jpeg).context("write snapshot temp file")?;
        file.flush().context("flush snapshot temp file")?;

        // `file` deletes itself on drop, including during unwinding.
        let sent = self.notifier.send_photo(file.path(), caption);
        if let Err(e) = file.close() {
            log::warn!("failed to remove snapshot temp file: {}", e);
        }
        sent
    }
}

/// Alert caption: subject, camera name and local wall-clock time.
pub fn build_caption(camera: &str, at: SystemTime) -> String {
    let local: DateTime<Local> = at.into();
    format!(
        "⚠ Person detected\nCamera: {}\nTime: {}",
        camera,
        local.format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(PathBuf, Vec<u8>, String)>>,
        fail: bool,
    }

    impl Notifier for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn send_photo(&self, photo: &Path, caption: &str) -> Result<()> {
            let bytes = std::fs::read(photo)?;
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((photo.to_path_buf(), bytes, caption.to_string()));
            }
            if self.fail {
                Err(anyhow!("HTTP 502 bad gateway"))
            } else {
                Ok(())
            }
        }
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false)
    }

    #[test]
    fn delivered_photo_is_cleaned_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let notifier = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new(notifier.clone()).with_temp_dir(dir.path());

        let outcome = dispatcher.dispatch("Cam1", b"\xFF\xD8jpeg", "hello");
        assert_eq!(outcome, DispatchOutcome::Delivered);

        let seen = notifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, b"\xFF\xD8jpeg");
        assert_eq!(seen[0].2, "hello");
        assert!(!seen[0].0.exists());
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[test]
    fn failed_delivery_is_reported_and_cleaned_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let notifier = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let dispatcher = Dispatcher::new(notifier).with_temp_dir(dir.path());

        match dispatcher.dispatch("Cam1", b"jpeg", "caption") {
            DispatchOutcome::Failed { reason } => assert!(reason.contains("502")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[test]
    fn panicking_notifier_still_removes_file() -> Result<()> {
        struct Panics;
        impl Notifier for Panics {
            fn name(&self) -> &'static str {
                "panics"
            }
            fn send_photo(&self, _photo: &Path, _caption: &str) -> Result<()> {
                panic!("connection pool poisoned");
            }
        }

        let dir = tempfile::tempdir()?;
        let dispatcher = Dispatcher::new(Arc::new(Panics)).with_temp_dir(dir.path());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            dispatcher.dispatch("Cam1", b"jpeg", "caption")
        }));
        assert!(result.is_err());
        assert!(dir_is_empty(dir.path()));
        Ok(())
    }

    #[test]
    fn missing_temp_dir_fails_without_panicking() {
        let dispatcher = Dispatcher::new(Arc::new(Recording::default()))
            .with_temp_dir("/nonexistent/arrival-watch/tmp");
        assert!(!dispatcher.dispatch("Cam1", b"jpeg", "caption").is_delivered());
    }

    #[test]
    fn caption_names_camera_and_time() {
        let caption = build_caption("Gate", SystemTime::now());
        let lines: Vec<&str> = caption.lines().collect();
        assert_eq!(lines[0], "⚠ Person detected");
        assert_eq!(lines[1], "Camera: Gate");
        assert!(lines[2].starts_with("Time: "));
        assert_eq!(lines[2].len(), "Time: 2024-01-01 00:00:00".len());
    }
}
