//! Remote gateway contract and the in-memory mock used by demos and tests.
//!
//! The backend is modeled as a document store keyed by progress id. The
//! core never talks to a transport directly; everything goes through
//! [`RemoteGateway`], and any gateway failure is treated as transient.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{Lesson, Progress, ProgressId, SyncStatus, User};
use crate::util::{format_instant, parse_instant, unix_millis_now};

/// Simulated round-trip latency of the mock gateway.
pub const SIMULATED_NETWORK_DELAY_MS: u64 = 800;

/// Percentage of mock gateway calls that fail with a transient error.
pub const SIMULATED_FAILURE_PERCENT: u8 = 15;

/// How far into the future a synthetic conflict is stamped.
const CONFLICT_SKEW_MS: i64 = 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Wire documents
// ---------------------------------------------------------------------------

/// Progress record as exchanged with the backend.
///
/// Every field is optional: downloaded documents may be partial, and
/// unknown extra fields are ignored. Upload payloads built from local rows
/// always carry all five fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<i64>,
    /// ISO-8601 instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<&Progress> for ProgressDocument {
    fn from(progress: &Progress) -> Self {
        Self {
            id: Some(progress.id.as_str().to_string()),
            user_id: Some(progress.user_id.clone()),
            lesson_id: Some(progress.lesson_id.clone()),
            progress_percent: Some(i64::from(progress.progress_percent)),
            updated_at: Some(format_instant(progress.updated_at)),
        }
    }
}

/// User record as seeded from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl From<&User> for UserDocument {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            updated_at: Some(format_instant(user.updated_at)),
        }
    }
}

/// Lesson record as seeded from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl From<&Lesson> for LessonDocument {
    fn from(lesson: &Lesson) -> Self {
        Self {
            id: lesson.id.clone(),
            title: lesson.title.clone(),
            description: lesson.description.clone(),
            duration_minutes: lesson.duration_minutes,
            updated_at: Some(format_instant(lesson.updated_at)),
        }
    }
}

/// A downloaded progress document that passed the validity gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProgress {
    pub id: String,
    pub user_id: String,
    pub lesson_id: String,
    pub progress_percent: u8,
    /// Unix milliseconds parsed from the document's instant
    pub updated_at: i64,
}

impl RemoteProgress {
    /// Build the local row this record resolves to, under the given id.
    ///
    /// The caller picks the id: an existing local row keeps its own id, a
    /// record without a local counterpart keeps the backend's.
    #[must_use]
    pub fn into_progress(self, id: ProgressId) -> Progress {
        Progress {
            id,
            user_id: self.user_id,
            lesson_id: self.lesson_id,
            progress_percent: self.progress_percent,
            updated_at: self.updated_at,
            sync_status: SyncStatus::Synced,
        }
    }
}

impl TryFrom<&ProgressDocument> for RemoteProgress {
    type Error = Error;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to 0..=100 first
    fn try_from(doc: &ProgressDocument) -> Result<Self> {
        let id = required_text(doc.id.as_deref(), "id")?;
        let user_id = required_text(doc.user_id.as_deref(), "userId")?;
        let lesson_id = required_text(doc.lesson_id.as_deref(), "lessonId")?;

        let progress_percent = doc
            .progress_percent
            .ok_or_else(|| Error::InvalidInput("document missing 'progressPercent'".to_string()))?
            .clamp(0, 100) as u8;

        let updated_at = doc
            .updated_at
            .as_deref()
            .and_then(parse_instant)
            .ok_or_else(|| {
                Error::InvalidInput("document missing or malformed 'updatedAt'".to_string())
            })?;

        Ok(Self {
            id,
            user_id,
            lesson_id,
            progress_percent,
            updated_at,
        })
    }
}

fn required_text(value: Option<&str>, field: &str) -> Result<String> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(Error::InvalidInput(format!("document missing '{field}'"))),
    }
}

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

/// Remote backend operations the sync engine depends on.
///
/// Implementations bound their own I/O; the engine applies no timeout of
/// its own and treats every error as transient.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Merge a progress document into the backend record keyed by its id.
    /// Fields absent from the payload are left untouched.
    async fn upload_progress(&self, doc: &ProgressDocument) -> Result<()>;

    /// Fetch every progress document the backend holds.
    async fn fetch_all_progress(&self) -> Result<Vec<ProgressDocument>>;

    /// Write a synthetic conflicting document for the given progress id:
    /// completion forced to 100 with a timestamp one hour in the future.
    async fn simulate_remote_conflict(&self, progress_id: &str) -> Result<()>;

    /// Fetch the seed list of users.
    async fn fetch_users(&self) -> Result<Vec<UserDocument>>;

    /// Fetch the seed list of lessons.
    async fn fetch_lessons(&self) -> Result<Vec<LessonDocument>>;
}

/// Tuning knobs for [`MockRemoteGateway`].
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Artificial latency added to every call
    pub simulated_delay: Duration,
    /// Percentage of calls that fail with a transient error (0 disables)
    pub failure_percent: u8,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            simulated_delay: Duration::from_millis(SIMULATED_NETWORK_DELAY_MS),
            failure_percent: SIMULATED_FAILURE_PERCENT,
        }
    }
}

impl GatewayOptions {
    /// No latency, no random failures; the right options for tests.
    #[must_use]
    pub const fn instant() -> Self {
        Self {
            simulated_delay: Duration::ZERO,
            failure_percent: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory mock
// ---------------------------------------------------------------------------

/// Which gateway operation was invoked; recorded by the mock in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCall {
    UploadProgress,
    FetchAllProgress,
    SimulateConflict,
    FetchUsers,
    FetchLessons,
}

#[derive(Debug, Default)]
struct MockState {
    progress: HashMap<String, ProgressDocument>,
    users: Vec<UserDocument>,
    lessons: Vec<LessonDocument>,
    uploads: Vec<ProgressDocument>,
    calls: Vec<GatewayCall>,
}

/// In-memory [`RemoteGateway`] with configurable latency and failure
/// injection. Backs demos and the end-to-end tests.
pub struct MockRemoteGateway {
    state: Mutex<MockState>,
    options: GatewayOptions,
    always_fail: AtomicBool,
}

impl MockRemoteGateway {
    /// Create an empty mock backend.
    #[must_use]
    pub fn new(options: GatewayOptions) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            options,
            always_fail: AtomicBool::new(false),
        }
    }

    /// Create a mock backend pre-populated with seed users and lessons.
    #[must_use]
    pub fn with_seed_data(
        options: GatewayOptions,
        users: Vec<UserDocument>,
        lessons: Vec<LessonDocument>,
    ) -> Self {
        let gateway = Self::new(options);
        if let Ok(mut state) = gateway.state.try_lock() {
            state.users = users;
            state.lessons = lessons;
        }
        gateway
    }

    /// Force every subsequent call to fail deterministically.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::Release);
    }

    /// Documents uploaded so far, in arrival order.
    pub async fn uploads(&self) -> Vec<ProgressDocument> {
        self.state.lock().await.uploads.clone()
    }

    /// Every call received so far, in arrival order.
    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    /// The backend's current document for a progress id, if any.
    pub async fn document(&self, progress_id: &str) -> Option<ProgressDocument> {
        self.state.lock().await.progress.get(progress_id).cloned()
    }

    /// Seed the backend with a progress document (test setup).
    pub async fn put_document(&self, doc: ProgressDocument) {
        if let Some(id) = doc.id.clone() {
            self.state.lock().await.progress.insert(id, doc);
        }
    }

    async fn record_call(&self, call: GatewayCall) {
        self.state.lock().await.calls.push(call);
    }

    async fn simulate_network(&self) -> Result<()> {
        if !self.options.simulated_delay.is_zero() {
            tokio::time::sleep(self.options.simulated_delay).await;
        }
        if self.always_fail.load(Ordering::Acquire) {
            return Err(Error::Remote("simulated network failure".to_string()));
        }
        if self.options.failure_percent > 0
            && rand::random::<f64>() * 100.0 < f64::from(self.options.failure_percent)
        {
            return Err(Error::Remote("simulated network failure".to_string()));
        }
        Ok(())
    }
}

/// Overwrite the fields present in `incoming`, leaving the rest untouched.
fn merge_document(target: &mut ProgressDocument, incoming: &ProgressDocument) {
    if incoming.user_id.is_some() {
        target.user_id = incoming.user_id.clone();
    }
    if incoming.lesson_id.is_some() {
        target.lesson_id = incoming.lesson_id.clone();
    }
    if incoming.progress_percent.is_some() {
        target.progress_percent = incoming.progress_percent;
    }
    if incoming.updated_at.is_some() {
        target.updated_at = incoming.updated_at.clone();
    }
}

#[async_trait]
impl RemoteGateway for MockRemoteGateway {
    async fn upload_progress(&self, doc: &ProgressDocument) -> Result<()> {
        self.record_call(GatewayCall::UploadProgress).await;
        self.simulate_network().await?;

        let id = doc
            .id
            .clone()
            .ok_or_else(|| Error::InvalidInput("upload payload missing 'id'".to_string()))?;

        let mut state = self.state.lock().await;
        let entry = state.progress.entry(id.clone()).or_insert_with(|| {
            ProgressDocument {
                id: Some(id),
                ..ProgressDocument::default()
            }
        });
        merge_document(entry, doc);
        state.uploads.push(doc.clone());
        Ok(())
    }

    async fn fetch_all_progress(&self) -> Result<Vec<ProgressDocument>> {
        self.record_call(GatewayCall::FetchAllProgress).await;
        self.simulate_network().await?;
        Ok(self.state.lock().await.progress.values().cloned().collect())
    }

    async fn simulate_remote_conflict(&self, progress_id: &str) -> Result<()> {
        self.record_call(GatewayCall::SimulateConflict).await;
        self.simulate_network().await?;

        let mut state = self.state.lock().await;
        let entry = state
            .progress
            .entry(progress_id.to_string())
            .or_insert_with(|| ProgressDocument {
                id: Some(progress_id.to_string()),
                ..ProgressDocument::default()
            });
        entry.progress_percent = Some(100);
        entry.updated_at = Some(format_instant(unix_millis_now() + CONFLICT_SKEW_MS));
        Ok(())
    }

    async fn fetch_users(&self) -> Result<Vec<UserDocument>> {
        self.record_call(GatewayCall::FetchUsers).await;
        self.simulate_network().await?;
        Ok(self.state.lock().await.users.clone())
    }

    async fn fetch_lessons(&self) -> Result<Vec<LessonDocument>> {
        self.record_call(GatewayCall::FetchLessons).await;
        self.simulate_network().await?;
        Ok(self.state.lock().await.lessons.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_document(id: &str) -> ProgressDocument {
        ProgressDocument {
            id: Some(id.to_string()),
            user_id: Some("u1".to_string()),
            lesson_id: Some("l1".to_string()),
            progress_percent: Some(40),
            updated_at: Some("2024-06-01T10:00:00.000Z".to_string()),
        }
    }

    #[test]
    fn validation_accepts_complete_documents() {
        let remote = RemoteProgress::try_from(&full_document("p1")).unwrap();
        assert_eq!(remote.id, "p1");
        assert_eq!(remote.progress_percent, 40);
        assert_eq!(remote.updated_at, parse_instant("2024-06-01T10:00:00Z").unwrap());
    }

    #[test]
    fn validation_rejects_missing_fields() {
        let mut doc = full_document("p1");
        doc.lesson_id = None;
        assert!(RemoteProgress::try_from(&doc).is_err());

        let mut doc = full_document("p1");
        doc.user_id = Some("  ".to_string());
        assert!(RemoteProgress::try_from(&doc).is_err());

        let mut doc = full_document("p1");
        doc.progress_percent = None;
        assert!(RemoteProgress::try_from(&doc).is_err());
    }

    #[test]
    fn validation_rejects_malformed_timestamps() {
        let mut doc = full_document("p1");
        doc.updated_at = Some("last tuesday".to_string());
        assert!(RemoteProgress::try_from(&doc).is_err());
    }

    #[test]
    fn validation_clamps_out_of_range_percent() {
        let mut doc = full_document("p1");
        doc.progress_percent = Some(250);
        let remote = RemoteProgress::try_from(&doc).unwrap();
        assert_eq!(remote.progress_percent, 100);
    }

    #[test]
    fn documents_tolerate_extra_fields() {
        let doc: ProgressDocument = serde_json::from_str(
            r#"{
                "id": "p1",
                "userId": "u1",
                "lessonId": "l1",
                "progressPercent": 25,
                "updatedAt": "2024-06-01T10:00:00Z",
                "deviceName": "tablet"
            }"#,
        )
        .unwrap();
        assert_eq!(doc.progress_percent, Some(25));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upload_merges_by_id() {
        let gateway = MockRemoteGateway::new(GatewayOptions::instant());
        gateway.upload_progress(&full_document("p1")).await.unwrap();

        // A partial second write only touches the fields it carries
        let partial = ProgressDocument {
            id: Some("p1".to_string()),
            progress_percent: Some(70),
            ..ProgressDocument::default()
        };
        gateway.upload_progress(&partial).await.unwrap();

        let stored = gateway.document("p1").await.unwrap();
        assert_eq!(stored.progress_percent, Some(70));
        assert_eq!(stored.user_id, Some("u1".to_string()));
        assert_eq!(gateway.uploads().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_write_is_partial_and_newer() {
        let gateway = MockRemoteGateway::new(GatewayOptions::instant());
        gateway.upload_progress(&full_document("p1")).await.unwrap();

        let before = unix_millis_now();
        gateway.simulate_remote_conflict("p1").await.unwrap();

        let stored = gateway.document("p1").await.unwrap();
        assert_eq!(stored.progress_percent, Some(100));
        assert_eq!(stored.user_id, Some("u1".to_string()));
        let stamped = parse_instant(stored.updated_at.as_deref().unwrap()).unwrap();
        assert!(stamped >= before + CONFLICT_SKEW_MS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_always_fail_is_deterministic() {
        let gateway = MockRemoteGateway::new(GatewayOptions::instant());
        gateway.set_always_fail(true);

        let result = gateway.upload_progress(&full_document("p1")).await;
        assert!(matches!(result, Err(Error::Remote(_))));
        assert!(gateway.document("p1").await.is_none());

        gateway.set_always_fail(false);
        gateway.upload_progress(&full_document("p1")).await.unwrap();
    }
}
