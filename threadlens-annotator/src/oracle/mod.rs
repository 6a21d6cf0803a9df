//! Oracle Client
//!
//! Calls the external text-generation service and turns its free-form reply
//! into a validated judgment, masking transient unreliability with bounded
//! retries.
//!
//! One attempt = generate → extract JSON → validate against the task contract.
//! Each of those steps failing is a transient [`AttemptError`]; after the retry
//! policy is exhausted the call ends in a [`TerminalOracleFailure`].

pub mod extract;
pub mod gemini;
pub mod retry;

pub use extract::{extract_json_object, ExtractError};
pub use gemini::GeminiClient;
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper, MAX_RETRIES};

use crate::models::Validated;
use crate::prompt::RenderedPrompt;
use crate::tasks::AnnotationTask;
use crate::validate::ValidationError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure to obtain any text from the oracle
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleTransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Transient failure of a single attempt
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptError {
    #[error("Oracle transport failed: {0}")]
    Transport(#[from] OracleTransportError),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("JSON extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("Contract violation: {0}")]
    Validation(#[from] ValidationError),
}

/// Retries exhausted for one work item
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Oracle call failed after {attempts} attempts: {last_cause}")]
pub struct TerminalOracleFailure {
    pub attempts: u32,
    pub last_cause: AttemptError,
}

/// External generative text service
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Model identifier stored with every record
    fn model_name(&self) -> &str;

    /// Generate a reply for `prompt`; `Ok(None)` when the reply carried no text
    async fn generate(&self, prompt: &str) -> Result<Option<String>, OracleTransportError>;
}

/// Oracle plus retry policy; one validated judgment per call
#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn Oracle>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn Oracle>, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            oracle,
            policy,
            sleeper,
        }
    }

    pub fn model_name(&self) -> &str {
        self.oracle.model_name()
    }

    /// Obtain a contract-valid judgment for `prompt`
    pub async fn annotate<T: AnnotationTask + ?Sized>(
        &self,
        task: &T,
        prompt: &RenderedPrompt,
    ) -> Result<Validated<T::Judgment>, TerminalOracleFailure> {
        let operation = format!("{} annotate", task.kind());

        retry::retry_with_backoff(&operation, &self.policy, self.sleeper.as_ref(), move |_attempt| async move {
            let text = self
                .oracle
                .generate(&prompt.text)
                .await?
                .filter(|t| !t.trim().is_empty())
                .ok_or(AttemptError::EmptyResponse)?;

            let payload = extract_json_object(&text)?;
            let validated = task.validate(&payload)?;
            Ok::<_, AttemptError>(validated)
        })
        .await
    }
}
