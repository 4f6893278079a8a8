//! Client for the external assistant service (summaries, task extraction,
//! tagging, auto-scheduling).
//!
//! Requests are single-shot POSTs with a JSON body. When the service is not
//! configured or a call fails for any reason, a deterministic local fallback
//! is returned instead, so callers always have a value to show.

use chrono::{DateTime, Duration, Timelike, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

use crate::adapters::{AdapterError, ApiEvent, ApiTask, ScheduleSuggestion};
use crate::config::AssistantConfig;
use crate::models::Task;
use crate::utils::excerpt;

const SUMMARY_FALLBACK_CHARS: usize = 200;
const MAX_EXTRACTED_TASKS: usize = 10;
const MAX_TAGS: usize = 5;
const DEFAULT_SLOT_MINUTES: u32 = 30;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Assistant service is not configured")]
    NotConfigured,
    #[error("No text provided")]
    EmptyInput,
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Assistant service returned {status}: {body}")]
    StatusError { status: u16, body: String },
    #[error("Unusable response: {0}")]
    AdapterError(#[from] AdapterError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub value: T,
    pub source: ReplySource,
}

impl<T> Reply<T> {
    fn remote(value: T) -> Self {
        Self { value, source: ReplySource::Remote }
    }

    fn fallback(value: T) -> Self {
        Self { value, source: ReplySource::Fallback }
    }
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct ScheduleRequest {
    tasks: Vec<ApiTask>,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Deserialize)]
struct TasksResponse {
    tasks: Vec<ApiTask>,
}

#[derive(Deserialize)]
struct TagsResponse {
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct ScheduleResponse {
    suggestions: Vec<ApiEvent>,
}

struct Endpoint {
    http: reqwest::blocking::Client,
    base_url: String,
    api_token: Option<String>,
}

pub struct AssistantClient {
    endpoint: Option<Endpoint>,
}

impl AssistantClient {
    /// Build a client from configuration. Without a base URL every call uses
    /// the local fallback.
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let Some(base_url) = config.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            tracing::info!("assistant service not configured; using local fallbacks");
            return Ok(Self::offline());
        };
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: Some(Endpoint {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                api_token: config.api_token.clone().filter(|t| !t.is_empty()),
            }),
        })
    }

    pub fn offline() -> Self {
        Self { endpoint: None }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, AssistantError> {
        let endpoint = self.endpoint.as_ref().ok_or(AssistantError::NotConfigured)?;
        let url = format!("{}/{}", endpoint.base_url, path);

        let mut request = endpoint.http.post(&url).json(body);
        if let Some(token) = &endpoint.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AssistantError::StatusError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json()?)
    }

    pub fn try_summarize(&self, text: &str) -> Result<String, AssistantError> {
        let resp: SummaryResponse = self.post("summarize", &TextRequest { text })?;
        Ok(resp.summary)
    }

    pub fn summarize(&self, text: &str) -> Result<Reply<String>, AssistantError> {
        require_text(text)?;
        Ok(with_fallback("summarize", self.try_summarize(text), || fallback_summarize(text)))
    }

    pub fn try_extract_tasks(&self, text: &str) -> Result<Vec<ApiTask>, AssistantError> {
        let resp: TasksResponse = self.post("extract-tasks", &TextRequest { text })?;
        Ok(resp.tasks)
    }

    pub fn extract_tasks(&self, text: &str) -> Result<Reply<Vec<ApiTask>>, AssistantError> {
        require_text(text)?;
        Ok(with_fallback("extract-tasks", self.try_extract_tasks(text), || {
            fallback_extract_tasks(text)
        }))
    }

    pub fn try_generate_tags(&self, text: &str) -> Result<Vec<String>, AssistantError> {
        let resp: TagsResponse = self.post("generate-tags", &TextRequest { text })?;
        Ok(resp.tags)
    }

    pub fn generate_tags(&self, text: &str) -> Result<Reply<Vec<String>>, AssistantError> {
        require_text(text)?;
        Ok(with_fallback("generate-tags", self.try_generate_tags(text), || fallback_tags(text)))
    }

    pub fn try_suggest_schedule(&self, tasks: &[Task]) -> Result<Vec<ScheduleSuggestion>, AssistantError> {
        let body = ScheduleRequest {
            tasks: tasks.iter().map(ApiTask::from).collect(),
        };
        let resp: ScheduleResponse = self.post("auto-schedule", &body)?;
        let suggestions = resp
            .suggestions
            .into_iter()
            .map(ApiEvent::into_suggestion)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(suggestions)
    }

    pub fn suggest_schedule(&self, tasks: &[Task], now: DateTime<Utc>) -> Reply<Vec<ScheduleSuggestion>> {
        with_fallback("auto-schedule", self.try_suggest_schedule(tasks), || {
            fallback_schedule(tasks, now)
        })
    }
}

fn require_text(text: &str) -> Result<(), AssistantError> {
    if text.trim().is_empty() {
        return Err(AssistantError::EmptyInput);
    }
    Ok(())
}

fn with_fallback<T>(
    operation: &str,
    result: Result<T, AssistantError>,
    fallback: impl FnOnce() -> T,
) -> Reply<T> {
    match result {
        Ok(value) => Reply::remote(value),
        Err(AssistantError::NotConfigured) => Reply::fallback(fallback()),
        Err(e) => {
            tracing::warn!(operation, error = %e, "assistant call failed; using local fallback");
            Reply::fallback(fallback())
        }
    }
}

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid regex"));

static TASK_LINE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\s*[-*•]\s*(.+)",
        r"^\s*\d+\.\s*(.+)",
        r"(?i)(?:TODO|to-do|할일|태스크|작업)\s*:?\s*(.+)",
        // Korean action words ("must do", "prepare", "handle", ...) followed by the task
        r"(?:해야|할|해|하자|진행|처리|완료|작업|준비)\s*(.+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").expect("valid regex"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z'-]{3,}").expect("valid regex"));

const STOP_WORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "could", "does", "from", "have", "into",
    "just", "like", "make", "more", "most", "much", "must", "need", "only", "over", "should",
    "some", "such", "than", "that", "their", "them", "then", "there", "these", "they", "this",
    "very", "want", "were", "what", "when", "where", "which", "while", "will", "with", "would",
    "your",
];

/// First sentence plus the last complete one; short inputs are truncated
pub fn fallback_summarize(text: &str) -> String {
    let sentences: Vec<&str> = SENTENCE_END.split(text).collect();
    if sentences.len() >= 3 {
        return format!(
            "{}. {}.",
            sentences[0].trim(),
            sentences[sentences.len() - 2].trim()
        );
    }
    excerpt(text, SUMMARY_FALLBACK_CHARS)
}

/// Bullet, numbered, `TODO:` / `할일:` marked and Korean action-word lines,
/// at most ten. The first matching pattern wins per line.
pub fn fallback_extract_tasks(text: &str) -> Vec<ApiTask> {
    text.lines()
        .filter_map(|line| {
            TASK_LINE_PATTERNS
                .iter()
                .find_map(|re| re.captures(line))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|title| title.chars().count() > 3)
        .take(MAX_EXTRACTED_TASKS)
        .map(|title| ApiTask {
            title,
            priority: Some("medium".to_string()),
            ..Default::default()
        })
        .collect()
}

/// Hashtags first, then the most frequent longer words
pub fn fallback_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for caps in HASHTAG.captures_iter(text) {
        let tag = caps[1].to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    // (count, first position) per word
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, m) in WORD.find_iter(text).enumerate() {
        let word = m.as_str().to_lowercase();
        if STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        counts.entry(word).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by_key(|(_, (count, pos))| (Reverse(*count), *pos));

    for (word, _) in ranked {
        if tags.len() >= MAX_TAGS {
            break;
        }
        if !tags.contains(&word) {
            tags.push(word);
        }
    }
    tags.truncate(MAX_TAGS);
    tags
}

/// Pack open tasks back-to-back from the next full hour, highest priority
/// first, then earliest due date
pub fn fallback_schedule(tasks: &[Task], now: DateTime<Utc>) -> Vec<ScheduleSuggestion> {
    let mut open: Vec<&Task> = tasks.iter().filter(|t| !t.completed).collect();
    open.sort_by_key(|t| (Reverse(t.priority), t.due_date.is_none(), t.due_date));

    let hour_start = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let mut cursor = hour_start + Duration::hours(1);

    open.into_iter()
        .map(|task| {
            let minutes = task.estimated_time.filter(|m| *m > 0).unwrap_or(DEFAULT_SLOT_MINUTES);
            let start = cursor;
            let end = start + Duration::minutes(i64::from(minutes));
            cursor = end;
            ScheduleSuggestion {
                task_id: Some(task.id.clone()),
                title: task.title.clone(),
                start,
                end,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, Priority};
    use chrono::TimeZone;

    #[test]
    fn summary_takes_first_and_last_sentence() {
        let text = "Ship the release. Fix the flaky test. Write the changelog.";
        assert_eq!(fallback_summarize(text), "Ship the release. Write the changelog.");
    }

    #[test]
    fn short_summary_is_truncated() {
        let long = "x".repeat(250);
        let summary = fallback_summarize(&long);
        assert_eq!(summary.chars().count(), 203);
        assert!(summary.ends_with("..."));
        assert_eq!(fallback_summarize("one line"), "one line");
    }

    #[test]
    fn extracts_bullets_numbers_and_todos() {
        let text = "Notes from call\n- email the vendor\n2. book a room\nTODO: renew passport\n* ok\nrandom text";
        let titles: Vec<String> = fallback_extract_tasks(text).into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["email the vendor", "book a room", "renew passport"]);
    }

    #[test]
    fn extracts_korean_markers_and_action_words() {
        let text = "회의록\n할일: 보고서 제출하기\n태스크 디자인 검토\n회의 준비 자료 만들기\n점심";
        let titles: Vec<String> = fallback_extract_tasks(text).into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["보고서 제출하기", "디자인 검토", "자료 만들기"]);
    }

    #[test]
    fn extraction_is_capped() {
        let text: String = (0..20).map(|i| format!("- task number {}\n", i)).collect();
        assert_eq!(fallback_extract_tasks(&text).len(), MAX_EXTRACTED_TASKS);
    }

    #[test]
    fn tags_prefer_hashtags_then_frequency() {
        let text = "#Rust release planning: release notes, release blog, planning doc";
        let tags = fallback_tags(text);
        assert_eq!(tags[0], "rust");
        assert_eq!(tags[1], "release");
        assert_eq!(tags[2], "planning");
        assert!(tags.len() <= MAX_TAGS);
    }

    #[test]
    fn schedule_packs_by_priority_from_next_hour() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 20, 0).unwrap();
        let mut low = NewTask::new("low");
        low.priority = Priority::Low;
        let mut high = NewTask::new("high");
        high.priority = Priority::High;
        high.estimated_time = Some(90);
        let mut done = NewTask::new("done").into_task(now);
        done.completed = true;
        let tasks = vec![low.into_task(now), high.into_task(now), done];

        let plan = fallback_schedule(&tasks, now);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].title, "high");
        assert_eq!(plan[0].start, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(plan[1].start, Utc.with_ymd_and_hms(2024, 1, 1, 11, 30, 0).unwrap());
        assert_eq!(plan[1].end - plan[1].start, Duration::minutes(30));
    }

    #[test]
    fn offline_client_falls_back() {
        let client = AssistantClient::offline();
        let reply = client.summarize("A. B. C.").unwrap();
        assert_eq!(reply.source, ReplySource::Fallback);
        assert!(matches!(client.summarize("  "), Err(AssistantError::EmptyInput)));
    }

    #[test]
    fn unreachable_service_falls_back() {
        let config = AssistantConfig {
            base_url: Some("http://127.0.0.1:9".into()),
            api_token: Some("placeholder".into()),
            timeout_secs: 2,
        };
        let client = AssistantClient::new(&config).unwrap();
        assert!(client.is_configured());
        let reply = client.extract_tasks("- call the bank").unwrap();
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.value[0].title, "call the bank");
    }
}
