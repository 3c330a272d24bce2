//! Conversation bookkeeping over the collaborator's flat log rows.
//!
//! The log store is owned by `llm`; conversations are rebuilt on demand by grouping
//! rows on `conversation_id` and ordering them by `datetime_utc`.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// One prompt/response row from `llm logs list --json`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub datetime_utc: Option<String>,
}

/// One entry of `GET /api/conversations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub model: Option<String>,
    pub last_prompt: String,
    pub latest: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A rendered chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Parse `datetime_utc` as written by `llm` (naive ISO 8601, optionally with an offset).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Total order on timestamps: unparseable values first (lexically), then by parsed time,
/// ties broken on the raw text.
fn compare_timestamps(a: &str, b: &str) -> Ordering {
    (parse_timestamp(a), a).cmp(&(parse_timestamp(b), b))
}

fn compare_optional(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_timestamps(a, b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Group rows into one summary per conversation id, most recently active first, at most `limit` entries.
/// Rows without a conversation id are skipped. The newest row supplies model, last prompt and timestamp.
pub fn summarize(rows: &[LogRow], limit: usize) -> Vec<ConversationSummary> {
    let mut out: Vec<ConversationSummary> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let Some(cid) = row.conversation_id.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };
        let i = *index.entry(cid.to_string()).or_insert_with(|| {
            out.push(ConversationSummary {
                conversation_id: cid.to_string(),
                model: row.model.clone(),
                last_prompt: row.prompt.clone().unwrap_or_default(),
                latest: row.datetime_utc.clone(),
                count: 0,
            });
            out.len() - 1
        });
        let summary = &mut out[i];
        summary.count += 1;
        if let Some(ts) = row.datetime_utc.as_deref() {
            let newer = match summary.latest.as_deref() {
                Some(latest) => compare_timestamps(ts, latest) == Ordering::Greater,
                None => true,
            };
            if newer {
                summary.latest = Some(ts.to_string());
                summary.last_prompt = row.prompt.clone().unwrap_or_default();
                summary.model = row.model.clone();
            }
        }
    }
    out.sort_by(|a, b| compare_optional(b.latest.as_deref(), a.latest.as_deref()));
    out.truncate(limit);
    out
}

/// Stable sort oldest first.
pub fn sort_chronologically(rows: &mut [LogRow]) {
    rows.sort_by(|a, b| compare_optional(a.datetime_utc.as_deref(), b.datetime_utc.as_deref()));
}

/// Rebuild alternating turns: each row yields a user turn from `prompt` then an assistant turn from `response`,
/// skipping whichever is missing or empty.
pub fn turns(rows: &[LogRow]) -> Vec<Turn> {
    let mut out = Vec::with_capacity(rows.len() * 2);
    for row in rows {
        if let Some(p) = row.prompt.as_deref().filter(|p| !p.is_empty()) {
            out.push(Turn {
                role: Role::User,
                content: p.to_string(),
            });
        }
        if let Some(r) = row.response.as_deref().filter(|r| !r.is_empty()) {
            out.push(Turn {
                role: Role::Assistant,
                content: r.to_string(),
            });
        }
    }
    out
}

/// Find the conversation a just-sent message created: the newest row whose prompt equals `message`
/// and whose timestamp is not before `since`. Rows with unparsable timestamps are not excluded by `since`.
pub fn resolve_new_conversation(
    rows: &[LogRow],
    message: &str,
    since: Option<NaiveDateTime>,
) -> Option<String> {
    let message = message.trim();
    rows.iter()
        .filter(|r| r.prompt.as_deref().map(str::trim) == Some(message))
        .filter(|r| match (since, r.datetime_utc.as_deref().and_then(parse_timestamp)) {
            (Some(since), Some(ts)) => ts >= since,
            _ => true,
        })
        .filter(|r| r.conversation_id.as_deref().map(|c| !c.is_empty()).unwrap_or(false))
        .max_by(|a, b| compare_optional(a.datetime_utc.as_deref(), b.datetime_utc.as_deref()))
        .and_then(|r| r.conversation_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cid: Option<&str>, ts: &str, prompt: Option<&str>, response: Option<&str>) -> LogRow {
        LogRow {
            model: Some("test-model".to_string()),
            prompt: prompt.map(String::from),
            response: response.map(String::from),
            conversation_id: cid.map(String::from),
            datetime_utc: Some(ts.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn deserializes_llm_rows_ignoring_extra_fields() {
        let json = r#"[{"id":"01j","model":"gpt-4o-mini","prompt":"hi","system":null,
            "prompt_json":{},"response":"hello","conversation_id":"01c",
            "duration_ms":12,"datetime_utc":"2024-06-01T10:00:00.123456"}]"#;
        let rows: Vec<LogRow> = serde_json::from_str(json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].conversation_id.as_deref(), Some("01c"));
        assert_eq!(rows[0].response.as_deref(), Some("hello"));
    }

    #[test]
    fn summarize_groups_and_orders_by_latest() {
        let rows = vec![
            row(Some("a"), "2024-06-01T10:00:00", Some("a1"), Some("r")),
            row(Some("b"), "2024-06-01T11:00:00", Some("b1"), Some("r")),
            row(None, "2024-06-01T12:00:00", Some("loose"), Some("r")),
            row(Some("a"), "2024-06-01T12:30:00", Some("a2"), Some("r")),
        ];
        let summaries = summarize(&rows, 50);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].conversation_id, "a");
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].last_prompt, "a2");
        assert_eq!(summaries[0].latest.as_deref(), Some("2024-06-01T12:30:00"));
        assert_eq!(summaries[1].conversation_id, "b");
        assert_eq!(summaries[1].count, 1);
    }

    #[test]
    fn summarize_keeps_newest_even_when_rows_arrive_newest_first() {
        let rows = vec![
            row(Some("a"), "2024-06-01T12:00:00.5", Some("newest"), None),
            row(Some("a"), "2024-06-01T09:00:00", Some("oldest"), None),
        ];
        let summaries = summarize(&rows, 10);
        assert_eq!(summaries[0].last_prompt, "newest");
        assert_eq!(summaries[0].count, 2);
    }

    #[test]
    fn summarize_respects_limit_and_is_repeatable() {
        let rows: Vec<LogRow> = (0..5)
            .map(|i| row(Some(&format!("c{}", i)), &format!("2024-06-01T1{}:00:00", i), Some("p"), None))
            .collect();
        let first = summarize(&rows, 3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].conversation_id, "c4");
        assert_eq!(first, summarize(&rows, 3));
    }

    #[test]
    fn sort_chronologically_is_non_decreasing() {
        let mut rows = vec![
            row(Some("a"), "2024-06-01T12:00:00", Some("third"), None),
            row(Some("a"), "2024-06-01T10:00:00", Some("first"), None),
            row(Some("a"), "2024-06-01T11:00:00", Some("second"), None),
        ];
        sort_chronologically(&mut rows);
        let prompts: Vec<_> = rows.iter().map(|r| r.prompt.clone().unwrap()).collect();
        assert_eq!(prompts, vec!["first", "second", "third"]);
    }

    #[test]
    fn timestamp_order_is_total_with_unparseable_values() {
        let values = [
            "2024-06-01T10:00:00",
            "2024-06-01 09:00:00",
            "2024-06-01T10:00:00+00:00",
            "zzz",
            "1999",
            "2024-06-01T08:00:00.5",
        ];
        for a in values {
            for b in values {
                assert_eq!(compare_timestamps(a, b), compare_timestamps(b, a).reverse());
                for c in values {
                    if compare_timestamps(a, b) != Ordering::Greater
                        && compare_timestamps(b, c) != Ordering::Greater
                    {
                        assert_ne!(compare_timestamps(a, c), Ordering::Greater, "{a} {b} {c}");
                    }
                }
            }
        }

        let mut rows: Vec<LogRow> = values
            .iter()
            .map(|&ts| row(Some("a"), ts, Some(ts), None))
            .collect();
        rows.push(LogRow {
            prompt: Some("none".to_string()),
            ..Default::default()
        });
        sort_chronologically(&mut rows);
        let prompts: Vec<_> = rows.iter().map(|r| r.prompt.clone().unwrap()).collect();
        assert_eq!(
            prompts,
            vec![
                "none",
                "1999",
                "zzz",
                "2024-06-01T08:00:00.5",
                "2024-06-01 09:00:00",
                "2024-06-01T10:00:00",
                "2024-06-01T10:00:00+00:00",
            ]
        );
    }

    #[test]
    fn turns_alternate_prompt_then_response() {
        let rows = vec![
            row(Some("a"), "2024-06-01T10:00:00", Some("hi"), Some("hello")),
            row(Some("a"), "2024-06-01T10:01:00", None, Some("tool output")),
            row(Some("a"), "2024-06-01T10:02:00", Some("bye"), None),
        ];
        let t = turns(&rows);
        let roles: Vec<Role> = t.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Assistant, Role::User]
        );
        assert_eq!(t[0].content, "hi");
        assert_eq!(t[3].content, "bye");
    }

    #[test]
    fn resolve_new_conversation_matches_message_after_since() {
        let since = parse_timestamp("2024-06-01T11:00:00");
        let rows = vec![
            row(Some("old"), "2024-06-01T10:00:00", Some("hello"), Some("r")),
            row(Some("other"), "2024-06-01T11:30:00", Some("different"), Some("r")),
            row(Some("new"), "2024-06-01T11:05:00", Some("hello\n"), Some("r")),
        ];
        assert_eq!(
            resolve_new_conversation(&rows, "hello", since).as_deref(),
            Some("new")
        );
        assert_eq!(resolve_new_conversation(&rows, "missing", since), None);
    }

    #[test]
    fn parses_llm_timestamp_formats() {
        assert!(parse_timestamp("2024-06-01T10:00:00.123456").is_some());
        assert!(parse_timestamp("2024-06-01T10:00:00").is_some());
        assert!(parse_timestamp("2024-06-01T10:00:00+00:00").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }
}
