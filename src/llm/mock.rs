//! Scripted backend for unit tests

use super::GenerationBackend;
use crate::error::ProviderError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Replies are routed by a substring of the system prompt. The last reply
/// of a route repeats once its queue runs dry.
pub(crate) struct ScriptedBackend {
    name: String,
    routes: Mutex<Vec<(String, VecDeque<String>)>>,
    calls: Mutex<Vec<(Option<String>, String)>>,
}

impl ScriptedBackend {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            routes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn on(self, system_contains: &str, replies: &[&str]) -> Self {
        self.routes.lock().push((
            system_contains.to_string(),
            replies.iter().map(|r| r.to_string()).collect(),
        ));
        self
    }

    /// (system prompt, prompt) of every call so far
    pub(crate) fn calls(&self) -> Vec<(Option<String>, String)> {
        self.calls.lock().clone()
    }

    pub(crate) fn calls_matching(&self, system_contains: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(system, _)| system.as_deref().is_some_and(|s| s.contains(system_contains)))
            .count()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .push((system_prompt.map(str::to_string), prompt.to_string()));

        let system = system_prompt.unwrap_or_default();
        let mut routes = self.routes.lock();
        let queue = routes
            .iter_mut()
            .find(|(key, _)| system.contains(key.as_str()))
            .map(|(_, queue)| queue)
            .ok_or_else(|| ProviderError::EmptyResponse {
                backend: self.name.clone(),
            })?;

        let reply = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
        reply.ok_or_else(|| ProviderError::EmptyResponse {
            backend: self.name.clone(),
        })
    }
}
