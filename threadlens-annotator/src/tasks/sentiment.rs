//! Customer sentiment scoring of the latest message in each thread

use super::{AnnotationTask, TaskKind};
use crate::models::{AnnotationRecord, KeyShape, Validated, WorkItem};
use crate::prompt::{self, RenderedPrompt};
use crate::store::{AnnotationRow, CandidateUniverse, Destination};
use crate::validate::{self, ValidationError};
use serde_json::Value;
use threadlens_common::db::{ColumnDefinition, SqlValue, TableSchema};

pub const DEFAULT_CONTRACT_VERSION: &str = "sentiment_v0.2";
pub const DESTINATION_TABLE: &str = "message_sentiment";

const PROMPT_TEMPLATE: &str = r#"
You are a strict sentiment classifier.

Task:
Given the email text, return JSON with:
- sentiment: an integer between 1 and 5
- confidence: number between 0 and 1

Sentiment Scale:
1 – Happy: The customer expresses satisfaction, appreciation, or a clearly positive experience.
2 – Bit Irritated: The customer shows mild annoyance or impatience without strong emotional distress.
3 – Moderately Concerned: The customer expresses concern or worry that has not escalated into frustration or anger.
4 – Anger: The customer shows clear frustration or anger, often using strong or confrontational language.
5 – Frustrated: The customer is extremely upset, indicating repeated issues, delays, or severe dissatisfaction.

Rules:
- Choose the sentiment score (1-5) that best matches the customer's emotional state.
- Use 3 if the sentiment is truly mixed or unclear.
- Confidence reflects your certainty in the classification (0.0 to 1.0).
- Output MUST be valid JSON only. No extra text.

OUTPUT FORMAT:
{"sentiment": 1, "confidence": 0.0}

Email text:
{{email_text}}
"#;

/// Five-point customer sentiment scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentimentScore {
    Happy = 1,
    BitIrritated = 2,
    ModeratelyConcerned = 3,
    Anger = 4,
    Frustrated = 5,
}

impl SentimentScore {
    pub fn from_score(score: i64) -> Option<Self> {
        match score {
            1 => Some(Self::Happy),
            2 => Some(Self::BitIrritated),
            3 => Some(Self::ModeratelyConcerned),
            4 => Some(Self::Anger),
            5 => Some(Self::Frustrated),
            _ => None,
        }
    }

    pub fn score(self) -> i64 {
        self as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Happy => "Happy",
            Self::BitIrritated => "Bit Irritated",
            Self::ModeratelyConcerned => "Moderately Concerned",
            Self::Anger => "Anger",
            Self::Frustrated => "Frustrated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentJudgment {
    pub sentiment: SentimentScore,
}

/// Scores the latest message of every thread
#[derive(Debug, Clone)]
pub struct SentimentTask {
    contract_version: String,
}

impl SentimentTask {
    pub fn new(contract_version: impl Into<String>) -> Self {
        Self {
            contract_version: contract_version.into(),
        }
    }
}

impl Default for SentimentTask {
    fn default() -> Self {
        Self::new(DEFAULT_CONTRACT_VERSION)
    }
}

impl AnnotationTask for SentimentTask {
    type Judgment = SentimentJudgment;

    fn kind(&self) -> TaskKind {
        TaskKind::Sentiment
    }

    fn contract_version(&self) -> &str {
        &self.contract_version
    }

    fn universe(&self) -> CandidateUniverse {
        CandidateUniverse::LatestMessagePerThread
    }

    fn destination(&self) -> Destination {
        Destination {
            schema: TableSchema::new(
                DESTINATION_TABLE,
                vec![
                    ColumnDefinition::new("message_id", "TEXT").not_null(),
                    ColumnDefinition::new("thread_id", "TEXT").not_null(),
                    ColumnDefinition::new("sentiment", "INTEGER")
                        .not_null()
                        .check("sentiment BETWEEN 1 AND 5"),
                    ColumnDefinition::new("confidence", "REAL")
                        .not_null()
                        .check("confidence BETWEEN 0.0 AND 1.0"),
                    ColumnDefinition::new("contract_version", "TEXT").not_null(),
                    ColumnDefinition::new("model_name", "TEXT").not_null(),
                    ColumnDefinition::new("created_at", "TEXT").not_null(),
                ],
            ),
            key_shape: KeyShape::Message,
        }
    }

    fn render_prompt(&self, item: &WorkItem) -> RenderedPrompt {
        prompt::render(PROMPT_TEMPLATE, &[("email_text", &item.last_message_body)])
    }

    fn validate(&self, payload: &Value) -> Result<Validated<SentimentJudgment>, ValidationError> {
        let object = validate::as_object(payload)?;

        let score = validate::integer_in_range(object, "sentiment", 1, 5, "1-5")?;
        let sentiment = SentimentScore::from_score(score).ok_or(ValidationError::OutOfRange {
            field: "sentiment",
            value: score.to_string(),
            range: "1-5",
        })?;
        let confidence = validate::confidence(object)?;

        Ok(Validated {
            judgment: SentimentJudgment { sentiment },
            confidence,
        })
    }

    fn encode_row(&self, record: &AnnotationRecord<SentimentJudgment>) -> AnnotationRow {
        let message_id = match record.key.message_id() {
            Some(id) => SqlValue::from(id),
            None => SqlValue::Null,
        };

        AnnotationRow {
            key: record.key.clone(),
            values: vec![
                message_id,
                SqlValue::from(record.key.thread_id()),
                SqlValue::Integer(record.judgment.sentiment.score()),
                SqlValue::Real(record.confidence.value()),
                SqlValue::from(record.contract_version.as_str()),
                SqlValue::from(record.model_name.as_str()),
                SqlValue::Text(record.created_at.to_rfc3339()),
            ],
        }
    }

    fn progress_interval(&self) -> usize {
        20
    }
}
