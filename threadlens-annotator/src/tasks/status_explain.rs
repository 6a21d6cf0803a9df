//! Thread status explanation
//!
//! For every thread with a heuristic status, asks the oracle whether the thread
//! is open or closed, who owns the next action, and why.

use super::{AnnotationTask, TaskKind};
use crate::models::{AnnotationRecord, KeyShape, Validated, WorkItem};
use crate::prompt::{self, RenderedPrompt};
use crate::store::{AnnotationRow, CandidateUniverse, Destination};
use crate::validate::{self, Categorical, ValidationError};
use serde_json::Value;
use threadlens_common::db::{ColumnDefinition, SqlValue, TableSchema};

pub const DEFAULT_CONTRACT_VERSION: &str = "thread_state_v0.1";
pub const DESTINATION_TABLE: &str = "thread_state_explain";

/// Heuristic status assumed when the upstream classifier gave none
const DEFAULT_HEURISTIC_STATUS: &str = "open";
const NO_PREVIOUS_MESSAGE: &str = "N/A";

const PROMPT_TEMPLATE: &str = r#"You are analyzing an email thread to determine its status and next action owner.

OUTPUT FORMAT (respond with ONLY this JSON, no preamble):
{
  "thread_status": "open|closed",
  "next_action_owner": "org|customer|none",
  "status_reason": "Brief explanation in 1-2 sentences",
  "confidence": 0.0-1.0
}

DECISION RULES:
1. thread_status:
   - "open" if awaiting response, unresolved issue, or pending action
   - "closed" if resolved, no further action needed, or explicit closure

2. next_action_owner:
   - "org" if customer is waiting for organization's response/action
   - "customer" if organization is waiting for customer's response/info
   - "none" if no action needed or thread is closed

3. Priority indicators:
   - Questions → open, action on responder
   - "Thanks/resolved/all set" → likely closed
   - Requests for info → open, action on recipient
   - Confirmations after resolution → closed
   - Follow-up promises ("I'll check and get back") → open, action on promiser

4. confidence:
   - 1.0: explicit closure/clear question
   - 0.7-0.9: strong indicators present
   - 0.4-0.6: ambiguous but reasonable inference
   - <0.4: very unclear, default to keeping open

INPUTS:
Heuristic status: {{heuristic_status}}
Previous message: {{previous_message}}
Last message: {{last_message}}

Respond with ONLY the JSON object, no markdown backticks, no explanation."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    Open,
    Closed,
}

impl Categorical for ThreadStatus {
    const DOMAIN: &'static [Self] = &[ThreadStatus::Open, ThreadStatus::Closed];

    fn label(self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Closed => "closed",
        }
    }
}

/// Party expected to act next on a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionOwner {
    Org,
    Customer,
    None,
}

impl Categorical for ActionOwner {
    const DOMAIN: &'static [Self] = &[ActionOwner::Org, ActionOwner::Customer, ActionOwner::None];

    fn label(self) -> &'static str {
        match self {
            ActionOwner::Org => "org",
            ActionOwner::Customer => "customer",
            ActionOwner::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusJudgment {
    pub thread_status: ThreadStatus,
    pub next_action_owner: ActionOwner,
    /// At most [`validate::MAX_RATIONALE_CHARS`] characters
    pub status_reason: String,
}

/// Explains the state of every thread carrying a heuristic status
#[derive(Debug, Clone)]
pub struct StatusExplainTask {
    contract_version: String,
}

impl StatusExplainTask {
    pub fn new(contract_version: impl Into<String>) -> Self {
        Self {
            contract_version: contract_version.into(),
        }
    }
}

impl Default for StatusExplainTask {
    fn default() -> Self {
        Self::new(DEFAULT_CONTRACT_VERSION)
    }
}

impl AnnotationTask for StatusExplainTask {
    type Judgment = StatusJudgment;

    fn kind(&self) -> TaskKind {
        TaskKind::StatusExplain
    }

    fn contract_version(&self) -> &str {
        &self.contract_version
    }

    fn universe(&self) -> CandidateUniverse {
        CandidateUniverse::ThreadsWithHeuristicStatus
    }

    fn destination(&self) -> Destination {
        Destination {
            schema: TableSchema::new(
                DESTINATION_TABLE,
                vec![
                    ColumnDefinition::new("thread_id", "TEXT").not_null(),
                    ColumnDefinition::new("thread_status", "TEXT")
                        .not_null()
                        .check("thread_status IN ('open', 'closed')"),
                    ColumnDefinition::new("next_action_owner", "TEXT")
                        .not_null()
                        .check("next_action_owner IN ('org', 'customer', 'none')"),
                    ColumnDefinition::new("status_reason", "TEXT").not_null(),
                    ColumnDefinition::new("confidence", "REAL")
                        .not_null()
                        .check("confidence BETWEEN 0.0 AND 1.0"),
                    ColumnDefinition::new("contract_version", "TEXT").not_null(),
                    ColumnDefinition::new("model_name", "TEXT").not_null(),
                    ColumnDefinition::new("created_at", "TEXT").not_null(),
                ],
            ),
            key_shape: KeyShape::Thread,
        }
    }

    fn render_prompt(&self, item: &WorkItem) -> RenderedPrompt {
        let heuristic_status = item
            .heuristic_status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_HEURISTIC_STATUS);
        let previous_message = item
            .previous_message_body
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_PREVIOUS_MESSAGE);

        prompt::render(
            PROMPT_TEMPLATE,
            &[
                ("heuristic_status", heuristic_status),
                ("previous_message", previous_message),
                ("last_message", &item.last_message_body),
            ],
        )
    }

    fn validate(&self, payload: &Value) -> Result<Validated<StatusJudgment>, ValidationError> {
        let object = validate::as_object(payload)?;

        let thread_status = validate::categorical::<ThreadStatus>(object, "thread_status")?;
        let next_action_owner = validate::categorical::<ActionOwner>(object, "next_action_owner")?;
        let status_reason = validate::rationale(object, "status_reason")?;
        let confidence = validate::confidence(object)?;

        Ok(Validated {
            judgment: StatusJudgment {
                thread_status,
                next_action_owner,
                status_reason,
            },
            confidence,
        })
    }

    fn encode_row(&self, record: &AnnotationRecord<StatusJudgment>) -> AnnotationRow {
        AnnotationRow {
            key: record.key.clone(),
            values: vec![
                SqlValue::from(record.key.thread_id()),
                SqlValue::from(record.judgment.thread_status.label()),
                SqlValue::from(record.judgment.next_action_owner.label()),
                SqlValue::from(record.judgment.status_reason.as_str()),
                SqlValue::Real(record.confidence.value()),
                SqlValue::from(record.contract_version.as_str()),
                SqlValue::from(record.model_name.as_str()),
                SqlValue::Text(record.created_at.to_rfc3339()),
            ],
        }
    }

    fn progress_interval(&self) -> usize {
        10
    }
}
