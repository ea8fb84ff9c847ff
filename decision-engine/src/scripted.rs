//! Replays canned model turns for paper runs and tests

use crate::llm::{CompletionRequest, LlmClient, LlmResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

/// What to answer once the script has been used up
#[derive(Debug, Clone)]
enum WhenExhausted {
    Close,
    RepeatLast,
    Fail(String),
}

/// Pops one scripted response per call.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<LlmResponse>>,
    last: Mutex<Option<LlmResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    exhausted: WhenExhausted,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    /// Answers "No further actions." after the script ends.
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            exhausted: WhenExhausted::Close,
            delay: None,
        }
    }

    /// Keep replaying the final response forever.
    pub fn repeating(responses: Vec<LlmResponse>) -> Self {
        Self {
            exhausted: WhenExhausted::RepeatLast,
            ..Self::new(responses)
        }
    }

    /// Every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(Vec::new()).then_fail(message)
    }

    /// Fail every call made after the script ends.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.exhausted = WhenExhausted::Fail(message.into());
        self
    }

    /// Sleep before answering, to exercise call timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<LlmResponse> {
        self.requests.lock().await.push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().await.pop_front();
        let mut last = self.last.lock().await;
        if let Some(response) = next {
            *last = Some(response.clone());
            return Ok(response);
        }

        match &self.exhausted {
            WhenExhausted::Close => Ok(LlmResponse::text("No further actions.")),
            WhenExhausted::RepeatLast => Ok(last.clone().unwrap_or_default()),
            WhenExhausted::Fail(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}
