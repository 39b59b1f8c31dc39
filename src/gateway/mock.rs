use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::provider::{AiProvider, ProviderError};

type Responder = Box<dyn Fn(&str) -> Result<String, ProviderError> + Send + Sync>;

/// Provider double that replays queued answers, then falls back to a responder.
pub struct ScriptedProvider {
    model: String,
    scripted: Mutex<VecDeque<Result<String, ProviderError>>>,
    responder: Option<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            model: "scripted-model".to_string(),
            scripted: Mutex::new(VecDeque::new()),
            responder: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every unscripted prompt with `f(prompt)`.
    pub fn with_responder(
        f: impl Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(f)),
            ..Self::new()
        }
    }

    pub fn push_ok(&self, text: impl Into<String>) {
        self.lock_scripted().push_back(Ok(text.into()));
    }

    pub fn push_err(&self, err: ProviderError) {
        self.lock_scripted().push_back(Err(err));
    }

    /// Number of outbound calls that reached this provider.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_scripted(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, ProviderError>>> {
        self.scripted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        if let Some(next) = self.lock_scripted().pop_front() {
            return next;
        }
        match &self.responder {
            Some(f) => f(prompt),
            None => Err(ProviderError::Permanent("no scripted response left".into())),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
