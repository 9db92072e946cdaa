//! JSON-file record store for subscribers, timetables and homework.
//!
//! Timetables are weekly: lessons are keyed by weekday name, looked up
//! case-insensitively (`"MONDAY"`, `"monday"` and `"Monday"` all match).
//!
//! The file may be edited while the daemon runs. Every lookup first checks
//! the file's size and modification time and re-reads it when either changed.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use homebot_scheduler::{
    ContentError, ContentProvider, Homework, Lesson, OwnerId, RepositoryError, Subscriber,
    SubscriberRepository,
};

/// Errors from the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for ContentError {
    fn from(e: StoreError) -> Self {
        ContentError::Store(e.to_string())
    }
}

/// One subscriber and their weekly timetable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub id: OwnerId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lessons by weekday name.
    #[serde(default)]
    pub timetable: HashMap<String, Vec<Lesson>>,
}

fn default_enabled() -> bool {
    true
}

/// Homework tagged with its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeworkRecord {
    pub owner: OwnerId,
    #[serde(flatten)]
    pub item: Homework,
}

/// Store file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    pub version: u32,
    #[serde(default)]
    pub owners: Vec<OwnerRecord>,
    #[serde(default)]
    pub homework: Vec<HomeworkRecord>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: 1,
            owners: Vec::new(),
            homework: Vec::new(),
        }
    }
}

/// Size and modification time of the file as last seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        }
    }
}

#[derive(Debug)]
struct Snapshot {
    file: StoreFile,
    fingerprint: Option<Fingerprint>,
}

/// Record store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    data: RwLock<Snapshot>,
}

async fn read_file(path: &Path) -> Result<StoreFile, StoreError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

async fn fingerprint(path: &Path) -> Result<Option<Fingerprint>, StoreError> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(Fingerprint::of(&metadata))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl JsonStore {
    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let fingerprint = fingerprint(&path).await?;
        let file = match fingerprint {
            Some(_) => read_file(&path).await?,
            None => StoreFile::default(),
        };

        Ok(Self {
            path,
            data: RwLock::new(Snapshot { file, fingerprint }),
        })
    }

    /// Create a store with `data`, writing it to `path`.
    pub async fn create(path: impl Into<PathBuf>, data: StoreFile) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            data: RwLock::new(Snapshot {
                file: data,
                fingerprint: None,
            }),
        };
        {
            let mut snapshot = store.data.write().await;
            snapshot.fingerprint = store.save(&snapshot.file).await?;
        }
        Ok(store)
    }

    /// Persist `data` to disk, replacing the file atomically.
    ///
    /// Returns the fingerprint of the written file.
    async fn save(&self, data: &StoreFile) -> Result<Option<Fingerprint>, StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        fingerprint(&self.path).await
    }

    /// Re-read the file if it changed since it was last seen.
    ///
    /// A file that vanished or no longer parses leaves the previous contents
    /// in place.
    async fn refresh(&self) {
        let current = match fingerprint(&self.path).await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot stat store file");
                return;
            }
        };

        if self.data.read().await.fingerprint == Some(current) {
            return;
        }

        let mut snapshot = self.data.write().await;
        if snapshot.fingerprint == Some(current) {
            return;
        }
        match read_file(&self.path).await {
            Ok(file) => {
                snapshot.file = file;
                info!(path = %self.path.display(), "reloaded store file");
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to reload store file, keeping previous contents"
                );
            }
        }
        snapshot.fingerprint = Some(current);
    }

    async fn snapshot(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.refresh().await;
        self.data.read().await
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Lessons for `weekday`.
///
/// The canonical upper-case key (`"MONDAY"`) wins; otherwise the
/// lexicographically smallest case-insensitive match is used.
fn lessons_on(timetable: &HashMap<String, Vec<Lesson>>, weekday: Weekday) -> Vec<Lesson> {
    let name = weekday_name(weekday);
    if let Some(lessons) = timetable.get(&name.to_ascii_uppercase()) {
        return lessons.clone();
    }
    timetable
        .iter()
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, lessons)| lessons.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ContentProvider for JsonStore {
    async fn lessons_for_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
    ) -> Result<Vec<Lesson>, ContentError> {
        let data = self.snapshot().await;
        Ok(data
            .file
            .owners
            .iter()
            .find(|record| record.id == owner)
            .map(|record| lessons_on(&record.timetable, date.weekday()))
            .unwrap_or_default())
    }

    async fn active_homework_for_subjects(
        &self,
        owner: OwnerId,
        subjects: &[String],
    ) -> Result<Vec<Homework>, ContentError> {
        let data = self.snapshot().await;
        Ok(data
            .file
            .homework
            .iter()
            .filter(|record| record.owner == owner && !record.item.completed)
            .filter(|record| subjects.iter().any(|s| s == record.item.subject.trim()))
            .map(|record| record.item.clone())
            .collect())
    }

    async fn homework_for_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
        excluded_subjects: &[String],
    ) -> Result<Vec<Homework>, ContentError> {
        let data = self.snapshot().await;
        Ok(data
            .file
            .homework
            .iter()
            .filter(|record| record.owner == owner && record.item.due == date)
            .filter(|record| !excluded_subjects.iter().any(|s| s == record.item.subject.trim()))
            .map(|record| record.item.clone())
            .collect())
    }

    async fn purge_expired(&self, before: NaiveDate) -> Result<(), ContentError> {
        self.refresh().await;
        let mut data = self.data.write().await;
        let count = data.file.homework.len();
        data.file.homework.retain(|record| record.item.due >= before);
        let removed = count - data.file.homework.len();

        if removed == 0 {
            debug!(%before, "no expired homework");
            return Ok(());
        }

        data.fingerprint = self.save(&data.file).await?;
        info!(removed, %before, "purged expired homework");
        Ok(())
    }
}

#[async_trait]
impl SubscriberRepository for JsonStore {
    async fn subscriber(&self, owner: OwnerId) -> Result<Option<Subscriber>, RepositoryError> {
        let data = self.snapshot().await;
        Ok(data
            .file
            .owners
            .iter()
            .find(|record| record.id == owner)
            .map(|record| Subscriber {
                id: record.id,
                display_name: record.display_name.clone(),
                enabled: record.enabled,
            }))
    }

    async fn enabled_subscribers(&self) -> Result<Vec<OwnerId>, RepositoryError> {
        let data = self.snapshot().await;
        Ok(data
            .file
            .owners
            .iter()
            .filter(|record| record.enabled)
            .map(|record| record.id)
            .collect())
    }
}
