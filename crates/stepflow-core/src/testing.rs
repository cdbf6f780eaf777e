//! In-process model service double for tests (`testing` feature).
//!
//! Replies are scripted per model name and consumed in order. When a
//! model's script is empty the service echoes `"[<model>] <prompt>"`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::workflow::model_service::{ModelService, ModelServiceError};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Transient(String),
    Fatal(String),
    Panic(String),
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, VecDeque<Reply>>,
    delays: HashMap<String, Duration>,
    gates: HashMap<String, Arc<Semaphore>>,
    calls: Vec<(String, String)>,
}

#[derive(Default)]
pub struct ScriptedModelService {
    script: Mutex<Script>,
}

impl ScriptedModelService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut script)
    }

    fn push(&self, model: &str, reply: Reply) {
        self.with_script(|s| {
            s.replies
                .entry(model.to_string())
                .or_default()
                .push_back(reply)
        });
    }

    pub fn reply(&self, model: &str, text: impl Into<String>) {
        self.push(model, Reply::Text(text.into()));
    }

    pub fn fail_transient(&self, model: &str, detail: impl Into<String>) {
        self.push(model, Reply::Transient(detail.into()));
    }

    pub fn fail_fatal(&self, model: &str, detail: impl Into<String>) {
        self.push(model, Reply::Fatal(detail.into()));
    }

    /// The next call for `model` panics, taking its run task down with it.
    pub fn panic_on(&self, model: &str, message: impl Into<String>) {
        self.push(model, Reply::Panic(message.into()));
    }

    /// Every call for `model` sleeps this long before answering.
    pub fn set_delay(&self, model: &str, delay: Duration) {
        self.with_script(|s| s.delays.insert(model.to_string(), delay));
    }

    /// Calls for `model` block until the returned semaphore gets a permit
    /// (one permit releases one call).
    pub fn gate(&self, model: &str) -> Arc<Semaphore> {
        self.with_script(|s| {
            s.gates
                .entry(model.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(0)))
                .clone()
        })
    }

    /// Every `(model, prompt)` pair received, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.with_script(|s| s.calls.clone())
    }

    pub fn call_count(&self, model: &str) -> usize {
        self.with_script(|s| s.calls.iter().filter(|(m, _)| m == model).count())
    }
}

#[async_trait]
impl ModelService for ScriptedModelService {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelServiceError> {
        let (delay, gate) = self.with_script(|s| {
            s.calls.push((model.to_string(), prompt.to_string()));
            (s.delays.get(model).copied(), s.gates.get(model).cloned())
        });

        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.with_script(|s| s.replies.get_mut(model).and_then(|q| q.pop_front()));
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Transient(detail)) => Err(ModelServiceError::Transient(detail)),
            Some(Reply::Fatal(detail)) => Err(ModelServiceError::Fatal(detail)),
            Some(Reply::Panic(message)) => panic!("{}", message),
            None => Ok(format!("[{}] {}", model, prompt)),
        }
    }
}
