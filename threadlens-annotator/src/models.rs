//! Core data model for the annotation pipeline
//!
//! - [`SourceEvent`]: raw interaction event, owned upstream (read-only here)
//! - [`WorkItem`]: transient unit of work computed fresh by each run
//! - [`AnnotationRecord`]: append-only judgment keyed by (natural key, contract version)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw customer-interaction event as stored by the upstream ingester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub thread_id: String,
    pub message_id: String,
    pub body_text: Option<String>,
    pub event_ts: DateTime<Utc>,
}

/// Stable business identifier an annotation is keyed on.
///
/// Ordering is by thread id, then message id, which is the selection order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NaturalKey {
    Thread {
        thread_id: String,
    },
    Message {
        thread_id: String,
        message_id: String,
    },
}

impl NaturalKey {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        NaturalKey::Thread {
            thread_id: thread_id.into(),
        }
    }

    pub fn message(thread_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        NaturalKey::Message {
            thread_id: thread_id.into(),
            message_id: message_id.into(),
        }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            NaturalKey::Thread { thread_id } | NaturalKey::Message { thread_id, .. } => thread_id,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            NaturalKey::Thread { .. } => None,
            NaturalKey::Message { message_id, .. } => Some(message_id),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Thread { thread_id } => write!(f, "{}", thread_id),
            NaturalKey::Message {
                thread_id,
                message_id,
            } => write!(f, "{}/{}", thread_id, message_id),
        }
    }
}

/// Which columns make up the natural key of a destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// `thread_id`
    Thread,
    /// `thread_id` + `message_id`
    Message,
}

/// Unit of work selected for annotation; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: NaturalKey,
    pub last_message_body: String,
    pub previous_message_body: Option<String>,
    /// Status assigned by the upstream rule-based classifier, if any
    pub heuristic_status: Option<String>,
}

impl WorkItem {
    /// Work item for a single message with no surrounding context
    pub fn message(key: NaturalKey, body: impl Into<String>) -> Self {
        Self {
            key,
            last_message_body: body.into(),
            previous_message_body: None,
            heuristic_status: None,
        }
    }
}

/// Model confidence, guaranteed finite and within [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// A judgment that passed the task's output contract
#[derive(Debug, Clone, PartialEq)]
pub struct Validated<J> {
    pub judgment: J,
    pub confidence: Confidence,
}

/// Append-only derived judgment, written once per (natural key, contract version)
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord<J> {
    pub key: NaturalKey,
    pub judgment: J,
    pub confidence: Confidence,
    pub contract_version: String,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
}
