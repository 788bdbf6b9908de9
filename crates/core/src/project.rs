//! Project / context registry.
//!
//! Projects group documents (n:1 through the `document_projects` index) and
//! carry the context that is prefixed to future review requests: a static
//! purpose/audience block plus dated external notes collected weekly.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::persistence::{load_record, save_record, KeyValueStore, DOCUMENT_PROJECTS_KEY, PROJECTS_KEY};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Minimum `1 - distance / max_len` for two titles to count as similar.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Filled external contexts kept per project.
pub const MAX_FILLED_CONTEXTS: usize = 20;

/// Pending contexts older than this are discarded.
pub const PENDING_RETENTION_DAYS: i64 = 21;

/// A pending context this old triggers a reminder.
pub const REMINDER_AFTER_DAYS: i64 = 3;

/// Monday, counting 0 = Sunday.
pub const DEFAULT_WEEKLY_INPUT_DAY: u8 = 1;

/// Project name used when a document has no title.
pub const UNTITLED_PRESENTATION: &str = "無題のプレゼンテーション";

/// Normalized default titles that never match anything.
const GENERIC_TITLES: &[&str] = &[
    "untitledpresentation",
    "untitled",
    "untitledproject",
    "newpresentation",
    "無題のプレゼンテーション",
    "無題のプロジェクト",
];

const PROJECT_ID_SUFFIX_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticContext {
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub audience: String,
}

impl StaticContext {
    pub fn is_empty(&self) -> bool {
        self.purpose.trim().is_empty() && self.audience.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStatus {
    Empty,
    Pending,
    Filled,
}

/// A dated note attached to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalContext {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub content: String,
    pub status: ContextStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

impl ExternalContext {
    /// `created_at`, falling back to midnight UTC of `date`.
    pub fn reference_time(&self) -> Timestamp {
        self.created_at
            .unwrap_or_else(|| self.date.and_time(NaiveTime::MIN).and_utc())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    pub project_name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// 0 = Sunday ... 6 = Saturday.
    #[serde(default = "default_weekly_input_day")]
    pub weekly_input_day: u8,
    #[serde(default)]
    pub static_context: StaticContext,
    #[serde(default)]
    pub external_contexts: Vec<ExternalContext>,
}

fn default_weekly_input_day() -> u8 {
    DEFAULT_WEEKLY_INPUT_DAY
}

impl Project {
    pub fn new(name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            project_id: generate_project_id(now),
            project_name: name.into(),
            created_at: now,
            updated_at: now,
            weekly_input_day: DEFAULT_WEEKLY_INPUT_DAY,
            static_context: StaticContext::default(),
            external_contexts: Vec::new(),
        }
    }
}

/// A project whose name resembles a document title.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarProject {
    pub project_id: String,
    pub project_name: String,
    pub created_at: Timestamp,
}

/// What is known about a document's project when it is opened.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    /// The document is already mapped.
    Linked(Project),
    /// Not mapped; these projects have similar names (newest first).
    Candidates(Vec<SimilarProject>),
    /// Not mapped and nothing similar.
    Unmatched,
}

/// The newest pending context has been waiting too long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReminder {
    pub context_id: String,
    pub date: NaiveDate,
    pub days_pending: i64,
}

/// Totals from one maintenance pass over every project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub projects: usize,
    pub contexts_created: usize,
    pub pending_removed: usize,
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// `proj_<millis base36>_<6 random lowercase alphanumerics>`.
pub fn generate_project_id(now: Timestamp) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    let suffix: String = rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(PROJECT_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("proj_{}_{suffix}", to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn context_id(now: Timestamp, taken: &[ExternalContext]) -> String {
    let base = format!("ctx_{}", now.timestamp_millis());
    let mut id = base.clone();
    let mut n = 2;
    while taken.iter().any(|c| c.id == id) {
        id = format!("{base}_{n}");
        n += 1;
    }
    id
}

// ---------------------------------------------------------------------------
// Title similarity
// ---------------------------------------------------------------------------

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            row[j + 1] = substitution.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Lowercase with all whitespace removed.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_generic_title(normalized: &str) -> bool {
    GENERIC_TITLES.contains(&normalized)
}

/// Whether two titles name the same project. Blank and generic default
/// titles never match.
pub fn is_similar_title(a: &str, b: &str, threshold: f64) -> bool {
    let (a, b) = (normalize_title(a), normalize_title(b));
    if a.is_empty() || b.is_empty() || is_generic_title(&a) || is_generic_title(&b) {
        return false;
    }
    if a == b {
        return true;
    }
    let max_len = a.chars().count().max(b.chars().count());
    let similarity = 1.0 - levenshtein(&a, &b) as f64 / max_len as f64;
    similarity >= threshold
}

/// Projects whose names resemble `title`, newest `created_at` first.
pub fn find_similar<'a>(
    title: &str,
    projects: impl IntoIterator<Item = &'a Project>,
    threshold: f64,
) -> Vec<SimilarProject> {
    let mut similar: Vec<SimilarProject> = projects
        .into_iter()
        .filter(|p| is_similar_title(title, &p.project_name, threshold))
        .map(|p| SimilarProject {
            project_id: p.project_id.clone(),
            project_name: p.project_name.clone(),
            created_at: p.created_at,
        })
        .collect();
    similar.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    similar
}

// ---------------------------------------------------------------------------
// Context retention
// ---------------------------------------------------------------------------

/// Apply the retention policy.
///
/// Keeps the [`MAX_FILLED_CONTEXTS`] newest filled entries (by `date`) and
/// pending entries younger than [`PENDING_RETENTION_DAYS`]; everything else,
/// including `empty` entries, is dropped. Ids are deduplicated, first
/// occurrence wins.
pub fn compress_external_contexts(
    contexts: Vec<ExternalContext>,
    now: Timestamp,
) -> Vec<ExternalContext> {
    let mut seen = HashSet::new();
    let unique: Vec<ExternalContext> = contexts
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect();

    let cutoff = now - Duration::days(PENDING_RETENTION_DAYS);

    let mut filled: Vec<ExternalContext> = unique
        .iter()
        .filter(|c| c.status == ContextStatus::Filled)
        .cloned()
        .collect();
    filled.sort_by(|a, b| b.date.cmp(&a.date));
    filled.truncate(MAX_FILLED_CONTEXTS);

    let pending = unique
        .into_iter()
        .filter(|c| c.status == ContextStatus::Pending && c.reference_time() >= cutoff);

    filled.into_iter().chain(pending).collect()
}

/// Remove pending contexts older than the retention window, returning how
/// many were removed. Other entries are untouched.
pub fn cleanup_old_pending(contexts: &mut Vec<ExternalContext>, now: Timestamp) -> usize {
    let cutoff = now - Duration::days(PENDING_RETENTION_DAYS);
    let before = contexts.len();
    contexts.retain(|c| c.status != ContextStatus::Pending || c.reference_time() >= cutoff);
    before - contexts.len()
}

/// The newest pending context, if it has waited at least
/// [`REMINDER_AFTER_DAYS`] whole days.
pub fn pending_reminder(contexts: &[ExternalContext], now: Timestamp) -> Option<PendingReminder> {
    let latest = contexts
        .iter()
        .filter(|c| c.status == ContextStatus::Pending)
        .max_by_key(|c| c.date)?;
    let days_pending = (now - latest.reference_time()).num_days();
    (days_pending >= REMINDER_AFTER_DAYS).then(|| PendingReminder {
        context_id: latest.id.clone(),
        date: latest.date,
        days_pending,
    })
}

// ---------------------------------------------------------------------------
// Prompt assembly
// ---------------------------------------------------------------------------

/// Text prefixed to review requests. Empty when the project carries no
/// context at all.
pub fn build_context_prompt(project: &Project) -> String {
    let mut prompt = String::new();

    let purpose = project.static_context.purpose.trim();
    let audience = project.static_context.audience.trim();
    if !purpose.is_empty() || !audience.is_empty() {
        prompt.push_str("[プロジェクトコンテキスト]\n");
        if !purpose.is_empty() {
            prompt.push_str(&format!("目的: {purpose}\n"));
        }
        if !audience.is_empty() {
            prompt.push_str(&format!("対象者: {audience}\n"));
        }
        prompt.push('\n');
    }

    let mut filled: Vec<&ExternalContext> = project
        .external_contexts
        .iter()
        .filter(|c| c.status == ContextStatus::Filled && !c.content.trim().is_empty())
        .collect();
    filled.sort_by(|a, b| b.date.cmp(&a.date));
    for context in filled {
        prompt.push_str(&format!("[外部コンテキスト - {}]\n{}\n\n", context.date, context.content));
    }

    prompt
}

// ---------------------------------------------------------------------------
// ProjectContextStore
// ---------------------------------------------------------------------------

type ProjectTable = BTreeMap<String, Project>;
type DocumentIndex = BTreeMap<String, String>;

/// Persistent project registry.
///
/// Mutations are serialized through an internal lock so concurrent callers
/// in one process never lose each other's read-modify-write.
pub struct ProjectContextStore {
    store: Arc<dyn KeyValueStore>,
    similarity_threshold: f64,
    write_lock: Mutex<()>,
}

impl ProjectContextStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    // -- tables -------------------------------------------------------------

    async fn projects(&self) -> Result<ProjectTable, CoreError> {
        Ok(load_record(self.store.as_ref(), PROJECTS_KEY).await?.unwrap_or_default())
    }

    async fn document_index(&self) -> Result<DocumentIndex, CoreError> {
        Ok(load_record(self.store.as_ref(), DOCUMENT_PROJECTS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Compress, stamp and write one project into the table.
    async fn write_project(&self, mut project: Project, now: Timestamp) -> Result<Project, CoreError> {
        validate_project(&project)?;
        project.external_contexts =
            compress_external_contexts(std::mem::take(&mut project.external_contexts), now);
        project.updated_at = now;

        let mut table = self.projects().await?;
        table.insert(project.project_id.clone(), project.clone());
        save_record(self.store.as_ref(), PROJECTS_KEY, &table).await?;
        tracing::debug!(project_id = %project.project_id, "Saved project");
        Ok(project)
    }

    async fn write_link(&self, document_id: &str, project_id: &str) -> Result<(), CoreError> {
        let mut index = self.document_index().await?;
        index.insert(document_id.to_string(), project_id.to_string());
        save_record(self.store.as_ref(), DOCUMENT_PROJECTS_KEY, &index).await
    }

    // -- lifecycle ----------------------------------------------------------

    /// Every project, newest first.
    pub async fn list(&self) -> Result<Vec<Project>, CoreError> {
        let mut projects: Vec<Project> = self.projects().await?.into_values().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    pub async fn load(&self, project_id: &str) -> Result<Option<Project>, CoreError> {
        Ok(self.projects().await?.remove(project_id))
    }

    /// Like [`load`](Self::load) but a missing project is an error.
    pub async fn get(&self, project_id: &str) -> Result<Project, CoreError> {
        self.load(project_id).await?.ok_or_else(|| CoreError::NotFound {
            entity: "project",
            id: project_id.to_string(),
        })
    }

    /// Create a project, optionally linking `document_id` to it.
    pub async fn create(&self, name: &str, document_id: Option<&str>) -> Result<Project, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("project name must not be empty".into()));
        }
        let _guard = self.write_lock.lock().await;
        self.insert_project(name, document_id).await
    }

    /// Caller holds `write_lock`.
    async fn insert_project(&self, name: &str, document_id: Option<&str>) -> Result<Project, CoreError> {
        let now = Utc::now();
        let project = self.write_project(Project::new(name, now), now).await?;
        if let Some(document_id) = document_id {
            self.write_link(document_id, &project.project_id).await?;
        }
        tracing::info!(
            project_id = %project.project_id,
            name = %project.project_name,
            document_id = ?document_id,
            "Created project"
        );
        Ok(project)
    }

    /// Persist `project`, applying the retention policy and bumping
    /// `updated_at`.
    pub async fn save(&self, project: Project) -> Result<Project, CoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_project(project, Utc::now()).await
    }

    /// Map `document_id` to an existing project.
    pub async fn link_document(&self, document_id: &str, project_id: &str) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        if !self.projects().await?.contains_key(project_id) {
            return Err(CoreError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            });
        }
        self.write_link(document_id, project_id).await?;
        tracing::info!(document_id, project_id, "Linked document to project");
        Ok(())
    }

    /// The project `document_id` is mapped to. A mapping to a deleted
    /// project resolves to `None`.
    pub async fn project_for_document(&self, document_id: &str) -> Result<Option<Project>, CoreError> {
        let Some(project_id) = self.document_index().await?.remove(document_id) else {
            return Ok(None);
        };
        let project = self.load(&project_id).await?;
        if project.is_none() {
            tracing::warn!(document_id, project_id = %project_id, "Document mapped to missing project");
        }
        Ok(project)
    }

    /// Resolve an opened document: its linked project, or link candidates
    /// by title similarity.
    pub async fn discover(&self, document_id: &str, title: &str) -> Result<Discovery, CoreError> {
        if let Some(project) = self.project_for_document(document_id).await? {
            return Ok(Discovery::Linked(project));
        }
        if title.trim().is_empty() {
            return Ok(Discovery::Unmatched);
        }
        let projects = self.projects().await?;
        let candidates = find_similar(title, projects.values(), self.similarity_threshold);
        tracing::debug!(document_id, candidates = candidates.len(), "Project discovery");
        Ok(if candidates.is_empty() {
            Discovery::Unmatched
        } else {
            Discovery::Candidates(candidates)
        })
    }

    /// The document's project, creating and linking one named after `title`
    /// (or [`UNTITLED_PRESENTATION`]) when none exists.
    pub async fn load_or_create_for_document(
        &self,
        document_id: &str,
        title: Option<&str>,
    ) -> Result<Project, CoreError> {
        let _guard = self.write_lock.lock().await;
        if let Some(project) = self.project_for_document(document_id).await? {
            return Ok(project);
        }
        let name = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED_PRESENTATION);
        self.insert_project(name, Some(document_id)).await
    }

    pub async fn update_static_context(
        &self,
        project_id: &str,
        static_context: StaticContext,
    ) -> Result<Project, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut project = self.get(project_id).await?;
        project.static_context = static_context;
        self.write_project(project, Utc::now()).await
    }

    /// Store `content` into an external context. Blank content leaves the
    /// entry pending.
    pub async fn fill_context(
        &self,
        project_id: &str,
        context_id: &str,
        content: &str,
    ) -> Result<Project, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut project = self.get(project_id).await?;
        let context = project
            .external_contexts
            .iter_mut()
            .find(|c| c.id == context_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "external context",
                id: context_id.to_string(),
            })?;
        context.content = content.trim().to_string();
        context.status = if context.content.is_empty() {
            ContextStatus::Pending
        } else {
            ContextStatus::Filled
        };
        self.write_project(project, Utc::now()).await
    }

    // -- weekly context -----------------------------------------------------

    /// On the project's weekly input day, add a pending context dated today
    /// unless one already exists. Returns the new context.
    pub async fn ensure_weekly_context(
        &self,
        project_id: &str,
        now: Timestamp,
    ) -> Result<Option<ExternalContext>, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut project = self.get(project_id).await?;
        let Some(context) = weekly_context_due(&project, now) else {
            return Ok(None);
        };
        project.external_contexts.push(context.clone());
        self.write_project(project, now).await?;
        tracing::info!(project_id, date = %context.date, "Created weekly context");
        Ok(Some(context))
    }

    /// Drop stale pending contexts of one project.
    pub async fn cleanup_pending(&self, project_id: &str, now: Timestamp) -> Result<usize, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut project = self.get(project_id).await?;
        let removed = cleanup_old_pending(&mut project.external_contexts, now);
        if removed > 0 {
            self.write_project(project, now).await?;
            tracing::info!(project_id, removed, "Removed stale pending contexts");
        }
        Ok(removed)
    }

    pub async fn pending_reminder(
        &self,
        project_id: &str,
        now: Timestamp,
    ) -> Result<Option<PendingReminder>, CoreError> {
        Ok(pending_reminder(&self.get(project_id).await?.external_contexts, now))
    }

    /// Weekly generation and pending cleanup across every project.
    pub async fn maintain_all(&self, now: Timestamp) -> Result<MaintenanceReport, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut report = MaintenanceReport::default();
        for mut project in self.projects().await?.into_values() {
            report.projects += 1;
            let removed = cleanup_old_pending(&mut project.external_contexts, now);
            let created = weekly_context_due(&project, now);
            if let Some(context) = &created {
                project.external_contexts.push(context.clone());
            }
            if removed > 0 || created.is_some() {
                self.write_project(project, now).await?;
            }
            report.pending_removed += removed;
            report.contexts_created += usize::from(created.is_some());
        }
        Ok(report)
    }

    // -- prompt -------------------------------------------------------------

    /// [`build_context_prompt`] for the document's project; `""` when the
    /// document is not linked.
    pub async fn context_prompt_for_document(&self, document_id: &str) -> Result<String, CoreError> {
        Ok(self
            .project_for_document(document_id)
            .await?
            .map(|p| build_context_prompt(&p))
            .unwrap_or_default())
    }
}

fn validate_project(project: &Project) -> Result<(), CoreError> {
    if project.weekly_input_day > 6 {
        return Err(CoreError::Validation(format!(
            "weeklyInputDay must be 0..=6, got {}",
            project.weekly_input_day
        )));
    }
    if project.project_name.trim().is_empty() {
        return Err(CoreError::Validation("project name must not be empty".into()));
    }
    Ok(())
}

fn weekly_context_due(project: &Project, now: Timestamp) -> Option<ExternalContext> {
    if now.weekday().num_days_from_sunday() != u32::from(project.weekly_input_day) {
        return None;
    }
    let today = now.date_naive();
    if project.external_contexts.iter().any(|c| c.date == today) {
        return None;
    }
    Some(ExternalContext {
        id: context_id(now, &project.external_contexts),
        date: today,
        content: String::new(),
        status: ContextStatus::Pending,
        created_at: Some(now),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn ctx(id: &str, date: NaiveDate, status: ContextStatus, created_at: Option<Timestamp>) -> ExternalContext {
        ExternalContext {
            id: id.to_string(),
            date,
            content: format!("note {id}"),
            status,
            created_at,
        }
    }

    fn project_named(name: &str, created_at: Timestamp) -> Project {
        Project::new(name, created_at)
    }

    fn registry() -> ProjectContextStore {
        ProjectContextStore::new(Arc::new(MemoryStore::new()))
    }

    // -- ids ----------------------------------------------------------------

    #[test]
    fn project_id_format() {
        let id = generate_project_id(at(2026, 3, 2));
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "proj");
        assert_eq!(parts[1], to_base36(at(2026, 3, 2).timestamp_millis() as u64));
        assert_eq!(parts[2].len(), PROJECT_ID_SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    // -- similarity ---------------------------------------------------------

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("資料", "資料"), 0);
        assert_eq!(levenshtein("営業資料", "営業計画"), 2);
    }

    #[test]
    fn similar_matches_case_and_whitespace_insensitively() {
        let now = at(2026, 1, 1);
        let projects = vec![
            project_named("Q2  sales review", now),
            project_named("Q3 Marketing Plan", now),
        ];
        let found = find_similar("Q2 Sales Review", &projects, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].project_name, "Q2  sales review");
    }

    #[test]
    fn similar_uses_edit_ratio_threshold() {
        // one edit over 13 characters
        assert!(is_similar_title("Q2 Sales Review", "Q3 Sales Review", 0.7));
        assert!(!is_similar_title("Q2 Sales Review", "Board Update", 0.7));
        assert!(!is_similar_title("", "", 0.7));
    }

    #[test]
    fn generic_titles_never_match() {
        assert!(!is_similar_title("Untitled presentation", "Untitled Presentation", 0.7));
        assert!(!is_similar_title("無題のプレゼンテーション", "無題のプレゼンテーション", 0.7));
    }

    #[test]
    fn similar_sorted_newest_first() {
        let projects = vec![
            project_named("Roadmap 2026", at(2026, 1, 1)),
            project_named("Roadmap 2026 v2", at(2026, 2, 1)),
        ];
        let found = find_similar("roadmap 2026", &projects, 0.7);
        let names: Vec<&str> = found.iter().map(|p| p.project_name.as_str()).collect();
        assert_eq!(names, vec!["Roadmap 2026 v2", "Roadmap 2026"]);
    }

    // -- retention ----------------------------------------------------------

    #[test]
    fn compress_keeps_twenty_newest_filled_and_drops_old_pending() {
        let now = at(2026, 6, 30);
        let base = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut contexts: Vec<ExternalContext> = (0..25)
            .map(|i| ctx(&format!("f{i}"), base + Duration::days(i), ContextStatus::Filled, None))
            .collect();
        let old = now - Duration::days(30);
        contexts.extend(
            (0..5).map(|i| ctx(&format!("p{i}"), old.date_naive(), ContextStatus::Pending, Some(old))),
        );

        let kept = compress_external_contexts(contexts, now);
        assert_eq!(kept.len(), 20);
        assert!(kept.iter().all(|c| c.status == ContextStatus::Filled));
        assert_eq!(kept[0].id, "f24");
        assert_eq!(kept[19].id, "f5");
    }

    #[test]
    fn compress_keeps_recent_pending_and_dedupes() {
        let now = at(2026, 6, 30);
        let recent = now - Duration::days(3);
        let contexts = vec![
            ctx("p", recent.date_naive(), ContextStatus::Pending, None),
            ctx("p", recent.date_naive(), ContextStatus::Pending, None),
            ctx("e", now.date_naive(), ContextStatus::Empty, None),
        ];
        let kept = compress_external_contexts(contexts, now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "p");
    }

    #[test]
    fn cleanup_only_touches_stale_pending() {
        let now = at(2026, 6, 30);
        let stale = now - Duration::days(22);
        let mut contexts = vec![
            ctx("old-filled", stale.date_naive(), ContextStatus::Filled, Some(stale)),
            ctx("old-pending", stale.date_naive(), ContextStatus::Pending, Some(stale)),
            ctx("new-pending", now.date_naive(), ContextStatus::Pending, Some(now)),
        ];
        assert_eq!(cleanup_old_pending(&mut contexts, now), 1);
        let ids: Vec<&str> = contexts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["old-filled", "new-pending"]);
    }

    #[test]
    fn reminder_after_three_days() {
        let now = at(2026, 6, 30);
        let two_days = now - Duration::days(2);
        let four_days = now - Duration::days(4);

        let fresh = vec![ctx("a", two_days.date_naive(), ContextStatus::Pending, Some(two_days))];
        assert_eq!(pending_reminder(&fresh, now), None);

        let overdue = vec![ctx("b", four_days.date_naive(), ContextStatus::Pending, Some(four_days))];
        let reminder = pending_reminder(&overdue, now).unwrap();
        assert_eq!(reminder.context_id, "b");
        assert_eq!(reminder.days_pending, 4);
    }

    // -- prompt -------------------------------------------------------------

    #[test]
    fn prompt_orders_filled_newest_first() {
        let mut project = project_named("Deck", at(2026, 1, 1));
        project.static_context = StaticContext {
            purpose: "承認を得る".into(),
            audience: String::new(),
        };
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap();
        project.external_contexts = vec![
            ctx("a", d1, ContextStatus::Filled, None),
            ctx("b", d2, ContextStatus::Filled, None),
            ctx("c", d2, ContextStatus::Pending, None),
        ];

        let prompt = build_context_prompt(&project);
        assert_eq!(
            prompt,
            "[プロジェクトコンテキスト]\n目的: 承認を得る\n\n\
             [外部コンテキスト - 2026-01-12]\nnote b\n\n\
             [外部コンテキスト - 2026-01-05]\nnote a\n\n"
        );
    }

    #[test]
    fn prompt_is_empty_without_context() {
        assert_eq!(build_context_prompt(&project_named("Deck", at(2026, 1, 1))), "");
    }

    // -- store --------------------------------------------------------------

    #[tokio::test]
    async fn create_link_and_resolve() {
        let registry = registry();
        let project = registry.create("  Q2 Sales Review ", Some("doc-1")).await.unwrap();
        assert_eq!(project.project_name, "Q2 Sales Review");
        assert_eq!(project.weekly_input_day, 1);

        let resolved = registry.project_for_document("doc-1").await.unwrap();
        assert_eq!(resolved.map(|p| p.project_id), Some(project.project_id.clone()));
        assert_eq!(registry.list().await.unwrap().len(), 1);

        registry.link_document("doc-2", &project.project_id).await.unwrap();
        assert!(registry.project_for_document("doc-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_rejects_blank_name_and_link_rejects_unknown_project() {
        let registry = registry();
        assert_matches!(registry.create("   ", None).await, Err(CoreError::Validation(_)));
        assert_matches!(
            registry.link_document("doc", "proj_missing").await,
            Err(CoreError::NotFound { entity: "project", .. })
        );
    }

    #[tokio::test]
    async fn discover_linked_candidates_and_unmatched() {
        let registry = registry();
        let project = registry.create("Q2 Sales Review", Some("doc-1")).await.unwrap();

        assert_matches!(
            registry.discover("doc-1", "anything").await.unwrap(),
            Discovery::Linked(p) if p.project_id == project.project_id
        );
        assert_matches!(
            registry.discover("doc-2", "q2 sales  review").await.unwrap(),
            Discovery::Candidates(c) if c.len() == 1
        );
        assert_matches!(
            registry.discover("doc-3", "Q3 Marketing Plan").await.unwrap(),
            Discovery::Unmatched
        );
        assert_matches!(registry.discover("doc-4", " ").await.unwrap(), Discovery::Unmatched);
    }

    #[tokio::test]
    async fn load_or_create_uses_untitled_default() {
        let registry = registry();
        let created = registry.load_or_create_for_document("doc-1", Some("  ")).await.unwrap();
        assert_eq!(created.project_name, UNTITLED_PRESENTATION);

        let again = registry.load_or_create_for_document("doc-1", Some("Other")).await.unwrap();
        assert_eq!(again.project_id, created.project_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_opens_of_one_document_share_a_project() {
        let registry = Arc::new(registry());
        let opens: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.load_or_create_for_document("doc-7", Some("Deck")).await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for open in opens {
            ids.push(open.await.unwrap().unwrap().project_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn weekly_context_only_on_input_day_and_once() {
        let registry = registry();
        let project = registry.create("Weekly", None).await.unwrap();

        // 2026-03-02 is a Monday, 2026-03-03 a Tuesday.
        let monday = at(2026, 3, 2);
        let tuesday = at(2026, 3, 3);
        assert_eq!(registry.ensure_weekly_context(&project.project_id, tuesday).await.unwrap(), None);

        let created = registry
            .ensure_weekly_context(&project.project_id, monday)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.status, ContextStatus::Pending);
        assert_eq!(created.date, monday.date_naive());
        assert!(created.id.starts_with("ctx_"));

        assert_eq!(registry.ensure_weekly_context(&project.project_id, monday).await.unwrap(), None);
    }

    #[tokio::test]
    async fn fill_context_updates_prompt() {
        let registry = registry();
        let project = registry.create("Deck", Some("doc-1")).await.unwrap();
        let now = Utc::now();
        let mut project = registry.get(&project.project_id).await.unwrap();
        project.weekly_input_day = now.weekday().num_days_from_sunday() as u8;
        let project = registry.save(project).await.unwrap();

        let context = registry
            .ensure_weekly_context(&project.project_id, now)
            .await
            .unwrap()
            .unwrap();
        registry
            .fill_context(&project.project_id, &context.id, "  Budget approved  ")
            .await
            .unwrap();

        let prompt = registry.context_prompt_for_document("doc-1").await.unwrap();
        assert!(prompt.contains("Budget approved\n\n"));
        assert_eq!(registry.context_prompt_for_document("unlinked").await.unwrap(), "");
    }

    #[tokio::test]
    async fn save_rejects_invalid_weekday() {
        let registry = registry();
        let mut project = registry.create("Deck", None).await.unwrap();
        project.weekly_input_day = 7;
        assert_matches!(registry.save(project).await, Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn maintain_all_creates_and_cleans() {
        let registry = registry();
        let project = registry.create("Deck", None).await.unwrap();

        let monday = at(2026, 3, 2);
        let mut stored = registry.get(&project.project_id).await.unwrap();
        let stale = monday - Duration::days(25);
        stored
            .external_contexts
            .push(ctx("stale", stale.date_naive(), ContextStatus::Pending, Some(stale)));
        // Bypass save so the stale entry reaches the table uncompressed.
        let mut table = BTreeMap::new();
        table.insert(stored.project_id.clone(), stored);
        save_record(registry.store.as_ref(), PROJECTS_KEY, &table).await.unwrap();

        let report = registry.maintain_all(monday).await.unwrap();
        assert_eq!(
            report,
            MaintenanceReport { projects: 1, contexts_created: 1, pending_removed: 1 }
        );
        let after = registry.get(&project.project_id).await.unwrap();
        assert_eq!(after.external_contexts.len(), 1);
        assert_eq!(after.external_contexts[0].date, monday.date_naive());
    }
}
