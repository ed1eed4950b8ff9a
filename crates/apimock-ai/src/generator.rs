//! Mock generator: readiness tracking, prompting and cancellation.

use std::fmt;
use std::sync::Arc;

use apimock_core::template::strip_for_schema;
use apimock_core::{derive_schema, extract_annotation_hints, sanitize_generated_output};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::{Availability, LanguageModel, ModelSession, PromptRequest};
use crate::prompt::{SYSTEM_PROMPT, build_instruction};
use crate::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    NotProbed,
    Downloading,
    Unsupported,
    DownloadFailed,
    SessionFailed,
    Destroyed,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotProbed => "model has not been probed",
            Self::Downloading => "model is still downloading",
            Self::Unsupported => "model is not supported here",
            Self::DownloadFailed => "model download could not be started",
            Self::SessionFailed => "model session could not be created",
            Self::Destroyed => "generator was destroyed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Unprobed,
    Ready,
    Downloading,
    Unavailable(UnavailableReason),
}

impl Readiness {
    fn unavailable_reason(self) -> UnavailableReason {
        match self {
            Readiness::Unprobed | Readiness::Ready => UnavailableReason::NotProbed,
            Readiness::Downloading => UnavailableReason::Downloading,
            Readiness::Unavailable(reason) => reason,
        }
    }
}

struct State {
    readiness: Readiness,
    session: Option<Arc<dyn ModelSession>>,
    /// Token of the in-flight call, tagged with its sequence number.
    in_flight: Option<(u64, CancellationToken)>,
    next_call: u64,
}

/// Fills annotated templates through a [`LanguageModel`].
///
/// Call [`probe`](Self::probe) first; [`generate`](Self::generate) refuses to
/// run unless the last probe left the generator `Ready`.
pub struct MockGenerator<M> {
    model: M,
    state: Mutex<State>,
}

impl<M: LanguageModel> MockGenerator<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            state: Mutex::new(State {
                readiness: Readiness::Unprobed,
                session: None,
                in_flight: None,
                next_call: 0,
            }),
        }
    }

    pub async fn readiness(&self) -> Readiness {
        self.state.lock().await.readiness
    }

    /// Check the model and, when it is available, open a session.
    ///
    /// A model that can be fetched gets a download request and reports
    /// `Downloading`.
    pub async fn probe(&self) -> Readiness {
        let readiness = match self.model.availability().await {
            Ok(Availability::Available) => match self.model.create_session(SYSTEM_PROMPT).await {
                Ok(session) => {
                    self.replace_session(Some(session)).await;
                    Readiness::Ready
                }
                Err(e) => {
                    warn!(error = %e, "could not create model session");
                    Readiness::Unavailable(UnavailableReason::SessionFailed)
                }
            },
            Ok(Availability::Downloading) => Readiness::Downloading,
            Ok(Availability::Downloadable) => match self.model.request_download().await {
                Ok(()) => Readiness::Downloading,
                Err(e) => {
                    warn!(error = %e, "model download request failed");
                    Readiness::Unavailable(UnavailableReason::DownloadFailed)
                }
            },
            Ok(Availability::Unavailable) => Readiness::Unavailable(UnavailableReason::Unsupported),
            Err(e) => {
                warn!(error = %e, "model availability check failed");
                Readiness::Unavailable(UnavailableReason::Unsupported)
            }
        };

        self.state.lock().await.readiness = readiness;
        info!(?readiness, "probed language model");
        readiness
    }

    /// Fill `template` once and return the cleaned value tree.
    ///
    /// Starting a call replaces the cancellation token of any earlier call, so
    /// [`cancel`](Self::cancel) only ever reaches the most recent one.
    pub async fn generate(&self, template: &str) -> Result<Value, GenerationError> {
        if template.trim().is_empty() {
            return Err(GenerationError::EmptyInput);
        }

        let (call, token, session) = {
            let mut state = self.state.lock().await;
            let session = match (&state.readiness, &state.session) {
                (Readiness::Ready, Some(session)) => Arc::clone(session),
                (readiness, _) => {
                    return Err(GenerationError::CapabilityUnavailable(
                        readiness.unavailable_reason(),
                    ));
                }
            };
            let call = state.next_call;
            state.next_call += 1;
            let token = CancellationToken::new();
            state.in_flight = Some((call, token.clone()));
            (call, token, session)
        };

        let request = PromptRequest {
            instruction: build_instruction(&extract_annotation_hints(template)),
            response_constraint: derive_schema(&strip_for_schema(template)).to_json(),
        };
        debug!(call, instruction_len = request.instruction.len(), "prompting model");

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(GenerationError::Cancelled),
            raw = session.prompt(&request) => raw,
        };

        {
            let mut state = self.state.lock().await;
            if state.in_flight.as_ref().is_some_and(|(id, _)| *id == call) {
                state.in_flight = None;
            }
        }

        let raw = outcome?;
        let tree = sanitize_generated_output(&raw).map_err(GenerationError::MalformedJson)?;
        info!(call, "generated mock body");
        Ok(tree)
    }

    /// Abort the in-flight call, if any. Returns whether one was cancelled.
    pub async fn cancel(&self) -> bool {
        match self.state.lock().await.in_flight.take() {
            Some((call, token)) => {
                token.cancel();
                debug!(call, "generation cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel any in-flight call, close the session and refuse further use
    /// until the next probe.
    pub async fn destroy(&self) {
        self.cancel().await;
        self.replace_session(None).await;
        self.state.lock().await.readiness = Readiness::Unavailable(UnavailableReason::Destroyed);
        info!("generator destroyed");
    }

    async fn replace_session(&self, session: Option<Arc<dyn ModelSession>>) {
        let previous = std::mem::replace(&mut self.state.lock().await.session, session);
        if let Some(previous) = previous {
            previous.destroy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    const TEMPLATE: &str = r#"{
        "@ResponseStatus": /* req, xs:object, note:status carrier */,
        "ResponseStatus": {"ErrorCode": 0, "ErrorModule": 0},
        "DeviceName": "" /* req, xs:string, note:display name */
    }"#;

    #[derive(Default)]
    struct SessionLog {
        requests: std::sync::Mutex<Vec<PromptRequest>>,
        destroyed: AtomicBool,
        started: Notify,
    }

    struct ScriptedSession {
        reply: Option<String>,
        log: Arc<SessionLog>,
    }

    #[async_trait]
    impl ModelSession for ScriptedSession {
        async fn prompt(&self, request: &PromptRequest) -> Result<String, GenerationError> {
            self.log.requests.lock().unwrap().push(request.clone());
            self.log.started.notify_one();
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => std::future::pending().await,
            }
        }

        async fn destroy(&self) {
            self.log.destroyed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedModel {
        availability: Availability,
        download_ok: bool,
        reply: Option<String>,
        log: Arc<SessionLog>,
    }

    impl ScriptedModel {
        fn available(reply: Option<&str>) -> Self {
            Self {
                availability: Availability::Available,
                download_ok: true,
                reply: reply.map(str::to_string),
                log: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn availability(&self) -> Result<Availability, GenerationError> {
            Ok(self.availability)
        }

        async fn request_download(&self) -> Result<(), GenerationError> {
            if self.download_ok {
                Ok(())
            } else {
                Err(GenerationError::Backend("no network".into()))
            }
        }

        async fn create_session(
            &self,
            _system_prompt: &str,
        ) -> Result<Arc<dyn ModelSession>, GenerationError> {
            Ok(Arc::new(ScriptedSession {
                reply: self.reply.clone(),
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[tokio::test]
    async fn probe_outcomes() {
        let generator = MockGenerator::new(ScriptedModel::available(Some("{}")));
        assert_eq!(generator.readiness().await, Readiness::Unprobed);
        assert_eq!(generator.probe().await, Readiness::Ready);

        let mut model = ScriptedModel::available(None);
        model.availability = Availability::Downloading;
        assert_eq!(MockGenerator::new(model).probe().await, Readiness::Downloading);

        let mut model = ScriptedModel::available(None);
        model.availability = Availability::Downloadable;
        assert_eq!(MockGenerator::new(model).probe().await, Readiness::Downloading);

        let mut model = ScriptedModel::available(None);
        model.availability = Availability::Downloadable;
        model.download_ok = false;
        assert_eq!(
            MockGenerator::new(model).probe().await,
            Readiness::Unavailable(UnavailableReason::DownloadFailed)
        );

        let mut model = ScriptedModel::available(None);
        model.availability = Availability::Unavailable;
        assert_eq!(
            MockGenerator::new(model).probe().await,
            Readiness::Unavailable(UnavailableReason::Unsupported)
        );
    }

    #[tokio::test]
    async fn generate_requires_ready() {
        let generator = MockGenerator::new(ScriptedModel::available(Some("{}")));
        assert!(matches!(
            generator.generate(TEMPLATE).await,
            Err(GenerationError::CapabilityUnavailable(UnavailableReason::NotProbed))
        ));

        let mut model = ScriptedModel::available(None);
        model.availability = Availability::Downloading;
        let generator = MockGenerator::new(model);
        generator.probe().await;
        assert!(matches!(
            generator.generate(TEMPLATE).await,
            Err(GenerationError::CapabilityUnavailable(UnavailableReason::Downloading))
        ));
    }

    #[tokio::test]
    async fn empty_template_rejected() {
        let generator = MockGenerator::new(ScriptedModel::available(Some("{}")));
        generator.probe().await;
        assert!(matches!(
            generator.generate("  \n").await,
            Err(GenerationError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn generate_sanitizes_model_output() {
        let reply = "```json\n{\"@ResponseStatus\": \"x\", \"ResponseStatus\": {\"ErrorCode\": 7, \"ErrorModule\": 3}, \"DeviceName\": \"gate-01\", \" \": 1}\n```";
        let model = ScriptedModel::available(Some(reply));
        let log = Arc::clone(&model.log);
        let generator = MockGenerator::new(model);
        generator.probe().await;

        let tree = generator.generate(TEMPLATE).await.unwrap();
        assert_eq!(
            tree,
            json!({
                "ResponseStatus": {"ErrorCode": 0, "ErrorModule": 0},
                "DeviceName": "gate-01"
            })
        );

        let requests = log.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.instruction.contains("/* xs:string, note:display name */"));
        assert!(!request.instruction.contains("req,"));
        assert_eq!(
            request.response_constraint["required"],
            json!(["ResponseStatus", "DeviceName"])
        );
    }

    #[tokio::test]
    async fn malformed_output_propagates() {
        let generator = MockGenerator::new(ScriptedModel::available(Some("sorry, I can't")));
        generator.probe().await;
        assert!(matches!(
            generator.generate(TEMPLATE).await,
            Err(GenerationError::MalformedJson(_))
        ));
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_call() {
        let model = ScriptedModel::available(None);
        let log = Arc::clone(&model.log);
        let generator = Arc::new(MockGenerator::new(model));
        generator.probe().await;
        assert!(!generator.cancel().await);

        let task = {
            let generator = Arc::clone(&generator);
            tokio::spawn(async move { generator.generate(TEMPLATE).await })
        };
        log.started.notified().await;
        assert!(generator.cancel().await);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(GenerationError::Cancelled)));
        assert!(!generator.cancel().await);
    }

    #[tokio::test]
    async fn destroy_closes_session() {
        let model = ScriptedModel::available(Some("{}"));
        let log = Arc::clone(&model.log);
        let generator = MockGenerator::new(model);
        generator.probe().await;

        generator.destroy().await;
        assert!(log.destroyed.load(Ordering::SeqCst));
        assert_eq!(
            generator.readiness().await,
            Readiness::Unavailable(UnavailableReason::Destroyed)
        );
        assert!(matches!(
            generator.generate(TEMPLATE).await,
            Err(GenerationError::CapabilityUnavailable(UnavailableReason::Destroyed))
        ));
    }
}
