use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// A student's response to one question: a picked choice or free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Choice(String),
    Text(String),
}

impl AnswerValue {
    pub fn choice_id(&self) -> Option<&str> {
        match self {
            AnswerValue::Choice(id) => Some(id),
            AnswerValue::Text(_) => None,
        }
    }

    pub fn answer_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(text) => Some(text),
            AnswerValue::Choice(_) => None,
        }
    }
}

pub type AnswerMap = BTreeMap<String, AnswerValue>;

/// In-memory answers of the current attempt, last write wins per question.
///
/// `revision` bumps on every edit so writers can tell whether a snapshot is stale.
#[derive(Debug, Clone, Default)]
pub struct AnswerDraft {
    entries: HashMap<String, AnswerValue>,
    revision: u64,
}

impl AnswerDraft {
    pub fn from_saved(saved: AnswerMap) -> Self {
        Self {
            entries: saved.into_iter().collect(),
            revision: 0,
        }
    }

    pub fn record(&mut self, question_id: impl Into<String>, value: AnswerValue) {
        self.entries.insert(question_id.into(), value);
        self.revision += 1;
    }

    pub fn get(&self, question_id: &str) -> Option<&AnswerValue> {
        self.entries.get(question_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> AnswerMap {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// One queued or in-flight attempt to persist a draft snapshot.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub session_id: Uuid,
    pub answers: AnswerMap,
    pub revision: u64,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingWrite {
    pub fn new(session_id: Uuid, answers: AnswerMap, revision: u64, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            answers,
            revision,
            attempt: 0,
            enqueued_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionAnswerRow {
    pub question_id: String,
    pub choice_id: Option<String>,
    pub answer_text: Option<String>,
}

impl SessionAnswerRow {
    pub fn into_entry(self) -> Option<(String, AnswerValue)> {
        let value = match (self.choice_id, self.answer_text) {
            (Some(choice), _) => AnswerValue::Choice(choice),
            (None, Some(text)) => AnswerValue::Text(text),
            (None, None) => return None,
        };
        Some((self.question_id, value))
    }
}
