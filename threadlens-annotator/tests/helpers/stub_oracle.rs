//! Stub oracle keyed on prompt content

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use threadlens_annotator::oracle::{Oracle, OracleTransportError};

/// Replies with the first rule whose marker occurs in the prompt, else the fallback
pub struct KeyedOracle {
    rules: Vec<(String, String)>,
    fallback: String,
    calls: AtomicU32,
}

impl KeyedOracle {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.into(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn when(mut self, marker: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((marker.into(), reply.into()));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for KeyedOracle {
    fn model_name(&self) -> &str {
        "stub-model"
    }

    async fn generate(&self, prompt: &str) -> Result<Option<String>, OracleTransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Some(reply))
    }
}
