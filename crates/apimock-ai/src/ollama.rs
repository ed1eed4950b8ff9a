//! Ollama backend: a local model server reached over HTTP.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::GenerationError;
use crate::model::{Availability, LanguageModel, ModelSession, PromptRequest};

/// A model served by Ollama (`/api/tags`, `/api/pull`, `/api/chat`).
///
/// A requested download runs as a background pull; until the model shows up
/// in `/api/tags` it reports `Downloading`, and `Unavailable` once the pull
/// has failed.
pub struct OllamaModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    pull: Arc<Mutex<PullState>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PullState {
    Idle,
    Pulling,
    Failed(String),
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

/// One line of the streamed `/api/pull` reply.
#[derive(Debug, Deserialize)]
struct PullStatus {
    #[serde(default)]
    status: String,
    error: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    format: &'a Value,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

impl OllamaModel {
    /// `base_url` should be like `http://localhost:11434`.
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            pull: Arc::new(Mutex::new(PullState::Idle)),
        }
    }

    fn pull_state(&self) -> MutexGuard<'_, PullState> {
        lock(&self.pull)
    }

    fn has_model(&self, tags: &TagsResponse) -> bool {
        tags.models.iter().any(|tag| {
            tag.name == self.model
                || tag
                    .name
                    .strip_prefix(self.model.as_str())
                    .is_some_and(|rest| rest.starts_with(':'))
        })
    }
}

fn lock(state: &Mutex<PullState>) -> MutexGuard<'_, PullState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drain every complete line from `pending`, leaving a trailing partial line.
fn take_lines(pending: &mut Vec<u8>) -> Vec<PullStatus> {
    let Some(last) = pending.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = pending.drain(..=last).collect();
    complete
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .filter_map(|line| serde_json::from_slice(line).ok())
        .collect()
}

/// Read the rest of a pull stream; `Err` carries the first reported error.
async fn follow_pull(mut resp: reqwest::Response, mut pending: Vec<u8>) -> Result<(), String> {
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                pending.extend_from_slice(&chunk);
                if let Some(error) = take_lines(&mut pending).into_iter().find_map(|l| l.error) {
                    return Err(error);
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GenerationError::Server {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn availability(&self) -> Result<Availability, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        debug!(url = %url, "listing local models");
        let resp = check(self.client.get(&url).send().await?).await?;
        let tags: TagsResponse = resp.json().await?;

        if self.has_model(&tags) {
            *self.pull_state() = PullState::Idle;
            return Ok(Availability::Available);
        }
        Ok(match &*self.pull_state() {
            PullState::Idle => Availability::Downloadable,
            PullState::Pulling => Availability::Downloading,
            PullState::Failed(reason) => {
                debug!(model = %self.model, %reason, "earlier pull failed");
                Availability::Unavailable
            }
        })
    }

    /// Start a streamed pull and return once the server has reported its
    /// first status line. The rest of the stream is followed in the
    /// background.
    async fn request_download(&self) -> Result<(), GenerationError> {
        let url = format!("{}/api/pull", self.base_url);
        info!(url = %url, model = %self.model, "pulling model");
        let body = PullRequest {
            model: &self.model,
            stream: true,
        };
        let mut resp = check(self.client.post(&url).json(&body).send().await?).await?;

        let mut pending = Vec::new();
        loop {
            let Some(chunk) = resp.chunk().await? else {
                debug!(model = %self.model, "pull finished immediately");
                return Ok(());
            };
            pending.extend_from_slice(&chunk);
            let lines = take_lines(&mut pending);
            if let Some(error) = lines.iter().find_map(|l| l.error.clone()) {
                *self.pull_state() = PullState::Failed(error.clone());
                return Err(GenerationError::Backend(error));
            }
            if let Some(line) = lines.last() {
                debug!(model = %self.model, status = %line.status, "pull started");
                break;
            }
        }

        *self.pull_state() = PullState::Pulling;
        let state = Arc::clone(&self.pull);
        let model = self.model.clone();
        tokio::spawn(async move {
            let next = match follow_pull(resp, pending).await {
                Ok(()) => {
                    info!(model = %model, "model pull finished");
                    PullState::Idle
                }
                Err(reason) => {
                    warn!(model = %model, %reason, "model pull failed");
                    PullState::Failed(reason)
                }
            };
            *lock(&state) = next;
        });
        Ok(())
    }

    async fn create_session(
        &self,
        system_prompt: &str,
    ) -> Result<Arc<dyn ModelSession>, GenerationError> {
        Ok(Arc::new(OllamaSession {
            client: self.client.clone(),
            chat_url: format!("{}/api/chat", self.base_url),
            model: self.model.clone(),
            system_prompt: system_prompt.to_string(),
        }))
    }
}

struct OllamaSession {
    client: reqwest::Client,
    chat_url: String,
    model: String,
    system_prompt: String,
}

#[async_trait]
impl ModelSession for OllamaSession {
    async fn prompt(&self, request: &PromptRequest) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            stream: false,
            format: &request.response_constraint,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.instruction,
                },
            ],
        };

        debug!(url = %self.chat_url, model = %self.model, "sending chat request");
        let resp = check(self.client.post(&self.chat_url).json(&body).send().await?).await?;
        let reply: ChatResponse = resp.json().await?;
        Ok(reply.message.content)
    }

    async fn destroy(&self) {
        debug!(model = %self.model, "session closed");
    }
}
