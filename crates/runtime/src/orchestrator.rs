//! Turn orchestrator — the end-to-end pipeline for one user turn.
//!
//! Given a question it resolves the tenant, serializes against concurrent
//! turns for the same chat, enforces the interaction limit and the credit
//! floor, probes the response cache, assembles the prompt, drives the
//! streaming model call, and on completion applies the credit debit,
//! persists memory and the counter, stores the cache entry, and emits the
//! terminal event.  Failed turns persist nothing and debit nothing: a
//! debit whose turn cannot be persisted is refunded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use lexgate_cache::{response_key, CacheKeyConfig, MemoryTtlCache, NoopCache, ResponseCache};
use lexgate_config::{AppConfig, TokenUsage};
use lexgate_credits::CreditManager;
use lexgate_instance::{load_instance_files, InstanceRegistry};
use lexgate_llm::{
    build_tools, policy_prefix, LlmClient, LlmError, StreamNotice, StreamOutcome, StreamRequest,
};
use lexgate_memory::{InteractionStatus, MemoryStore, MessageRole};
use lexgate_normative::{CitationResolver, NormativeStore, ResolverConfig};
use lexgate_prompt::{build_context, serialize_input, ContextInputs, Message, Role};
use lexgate_tools::{NavigateWebTool, ToolRegistry};

use crate::error::GatewayError;
use crate::events::{CachedTurn, CreditSummary, TurnEvent};
use crate::gate::TurnGate;

/// Characters of a text attachment included as an inline preview.
const ATTACHMENT_PREVIEW_CHARS: usize = 500;

/// Seam between the orchestrator and the streaming adapter, so turns can be
/// driven by a scripted model in tests.
#[async_trait]
pub trait TurnModel: Send + Sync {
    async fn stream(
        &self,
        request: &StreamRequest,
        registry: &ToolRegistry,
        deadline: Duration,
        notice_tx: &mpsc::Sender<StreamNotice>,
    ) -> Result<StreamOutcome, LlmError>;
}

#[async_trait]
impl TurnModel for LlmClient {
    async fn stream(
        &self,
        request: &StreamRequest,
        registry: &ToolRegistry,
        deadline: Duration,
        notice_tx: &mpsc::Sender<StreamNotice>,
    ) -> Result<StreamOutcome, LlmError> {
        LlmClient::stream(self, request, registry, deadline, notice_tx).await
    }
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub question: String,
    pub user_id: String,
    pub chat_id: String,
    /// Tenant binding; the process default applies when absent.
    pub instance_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

pub struct TurnOrchestrator {
    config: AppConfig,
    registry: InstanceRegistry,
    memory: MemoryStore,
    cache: Arc<dyn ResponseCache>,
    credits: Arc<CreditManager>,
    model: Arc<dyn TurnModel>,
    normative: Option<Arc<dyn NormativeStore>>,
    gate: TurnGate,
}

impl TurnOrchestrator {
    pub fn new(
        config: AppConfig,
        model: Arc<dyn TurnModel>,
        normative: Option<Arc<dyn NormativeStore>>,
    ) -> Self {
        let cache: Arc<dyn ResponseCache> = if config.cache.enabled {
            Arc::new(MemoryTtlCache::new())
        } else {
            Arc::new(NoopCache)
        };
        let registry = InstanceRegistry::new(&config.paths.instances_root);
        let memory = MemoryStore::new(&config.paths.memory_root);
        let credits = CreditManager::new(&config.paths.users_root, config.pricing.clone());
        Self {
            config,
            registry,
            memory,
            cache,
            credits,
            model,
            normative,
            gate: TurnGate::new(),
        }
    }

    /// Swap the cache backend (e.g. a remote store, or no-op in tests).
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn credits(&self) -> &Arc<CreditManager> {
        &self.credits
    }

    /// Run one turn, emitting `TurnEvent`s over `event_tx`.  The terminal
    /// event is exactly one of `Done` or `Error`; the returned `Result`
    /// mirrors it for programmatic callers.
    #[instrument(
        skip(self, request, event_tx),
        fields(turn_id = %Uuid::new_v4(), user = %request.user_id, chat = %request.chat_id)
    )]
    pub async fn run_stream(
        &self,
        request: TurnRequest,
        event_tx: mpsc::Sender<TurnEvent>,
    ) -> Result<(), GatewayError> {
        let result = self.execute_turn(&request, &event_tx).await;
        if let Err(err) = &result {
            warn!(code = err.code(), error = %err, "turn failed");
            let _ = event_tx
                .send(TurnEvent::Error {
                    message: err.user_message("es"),
                    code: err.code().to_string(),
                })
                .await;
        }
        result
    }

    async fn execute_turn(
        &self,
        request: &TurnRequest,
        event_tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), GatewayError> {
        let instance_id = request
            .instance_id
            .as_deref()
            .unwrap_or(&self.config.server.default_instance);
        let tenant = self.registry.load(instance_id)?;
        let streaming = tenant.config.api_mode.eq_ignore_ascii_case("streaming");
        let locale = tenant.config.context.locale.clone();
        let mem = tenant.config.memory.clone();

        // Serialize turns for this (user, chat); released on drop.
        let _gate = self.gate.acquire(&request.user_id, &request.chat_id).await;

        // Interaction limit: refused turns are terminal but not errors.
        let status = self.memory.interaction_status(
            &request.user_id,
            &request.chat_id,
            mem.max_chat_interactions,
            mem.warning_threshold,
        );
        if status.limit_reached {
            info!(current = status.current, "interaction limit reached; refusing turn");
            let message = GatewayError::InteractionLimitReached {
                current: status.current,
                max: status.max,
            }
            .user_message(&locale);
            let _ = event_tx.send(TurnEvent::Delta { content: message }).await;
            let _ = event_tx
                .send(TurnEvent::Done {
                    usage: TokenUsage::default(),
                    interaction_status: status,
                    credit_consumption: CreditSummary::zero(),
                    normative_annex: Vec::new(),
                    url_validation: None,
                    from_cache: false,
                })
                .await;
            return Ok(());
        }

        // Credit floor before any provider spend.
        self.credits.check_floor(&request.user_id).await?;
        let user = self.credits.load_user(&request.user_id);

        // Cache probe: a hit synthesizes the stored turn at zero cost.
        let cache_config = CacheKeyConfig {
            model: tenant.config.model.clone(),
            api_mode: tenant.config.api_mode.clone(),
            retrieval_enabled: tenant.config.tools.retrieval_enabled,
            web_search_enabled: tenant.config.tools.web_search_enabled,
        };
        let cache_key = response_key(&request.question, &request.user_id, &cache_config);
        if let Some(blob) = self.cache.get(&cache_key).await {
            match serde_json::from_str::<CachedTurn>(&blob) {
                Ok(cached) => {
                    info!("response cache hit; no provider call");
                    let _ = event_tx
                        .send(TurnEvent::Delta { content: cached.text.clone() })
                        .await;
                    let _ = event_tx
                        .send(TurnEvent::Done {
                            usage: cached.usage,
                            interaction_status: cached.interaction_status,
                            credit_consumption: CreditSummary::zero(),
                            normative_annex: cached.normative_annex,
                            url_validation: None,
                            from_cache: true,
                        })
                        .await;
                    return Ok(());
                }
                Err(err) => warn!(%err, "unreadable cache entry ignored"),
            }
        }

        // One-time silent initialization entry for fresh chats.
        if let Some(init) = &tenant.initialization_message {
            if self.memory.load_context(&request.user_id, &request.chat_id).is_empty() {
                self.memory
                    .record_initialization(&request.user_id, &request.chat_id, init)?;
            }
        }

        // System prompt = tenant identity + dynamic context.
        let files = load_instance_files(&tenant.dir, &tenant.config.instance_files);
        let context = build_context(&ContextInputs {
            settings: &tenant.config.context,
            display_name: user.display_name.as_deref(),
            general_context: user.general_context.as_deref(),
            instance_files: &files,
            now: chrono::Utc::now(),
        });
        let mut system_prompt = tenant.system_prompt.clone();
        if !context.is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(&context);
        }

        // Rolling history window.
        let window = mem.max_history.saturating_mul(2);
        let history: Vec<Message> = self
            .memory
            .load_context(&request.user_id, &request.chat_id)
            .iter()
            .filter_map(|entry| match entry.role {
                MessageRole::User => Some(Message::new(Role::User, entry.content.clone())),
                MessageRole::Assistant => {
                    Some(Message::new(Role::Assistant, entry.content.clone()))
                }
                _ => None,
            })
            .collect();
        let history = if history.len() > window {
            history[history.len() - window..].to_vec()
        } else {
            history
        };

        let user_message = compose_user_message(
            &request.question,
            &request.attachments,
            tenant.config.tools.retrieval_enabled,
        );

        let mut input = serialize_input(None, &system_prompt, &history, &user_message);
        if let Some(prefix) = policy_prefix(&tenant.config.tools) {
            input = format!("{prefix}\n\n{input}");
        }

        // Registry first: the derived tool list renders the registry's
        // enabled function tools, and enablement mirrors the tenant flag.
        let mut tools = ToolRegistry::default();
        match NavigateWebTool::new(tenant.config.tools.web_navigation.clone()) {
            Ok(tool) => {
                tools.register(Box::new(tool));
                tools.set_enabled("navigate_web", tenant.config.tools.web_navigation.enabled);
            }
            Err(err) => warn!(%err, "navigate_web unavailable for this turn"),
        }

        let derived = build_tools(&tenant.config.tools, &tools);
        let stream_request = StreamRequest {
            model: tenant.config.model.clone(),
            input,
            temperature: tenant.config.temperature,
            max_tokens: tenant.config.max_tokens,
            tools: derived.tools,
            include_retrieval_results: derived.include_retrieval_results,
            validate_urls: tenant.config.tools.url_validation_enabled,
        };

        // Forward adapter notices to the client while the call is in flight.
        // Buffered tenants get the full text as a single delta afterwards.
        let (notice_tx, mut notice_rx) = mpsc::channel::<StreamNotice>(128);
        let forward_tx = event_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notice) = notice_rx.recv().await {
                match notice {
                    StreamNotice::Delta(content) => {
                        if streaming {
                            let _ = forward_tx.send(TurnEvent::Delta { content }).await;
                        }
                    }
                    StreamNotice::Status(message) => {
                        let _ = forward_tx.send(TurnEvent::Status { message }).await;
                    }
                }
            }
        });

        let deadline = Duration::from_secs(self.config.llm.turn_deadline_secs);
        let outcome = self
            .model
            .stream(&stream_request, &tools, deadline, &notice_tx)
            .await;
        drop(notice_tx);
        let _ = forwarder.await;
        let outcome = outcome?;

        if !streaming && !outcome.text.is_empty() {
            let _ = event_tx
                .send(TurnEvent::Delta { content: outcome.text.clone() })
                .await;
        }

        // Normative annex from the final text.
        let annex: Vec<Value> = match &self.normative {
            Some(store) => {
                let resolver = CitationResolver::new(
                    Arc::clone(store),
                    ResolverConfig {
                        verification_directive: tenant
                            .config
                            .citation_verification_directive
                            .clone(),
                        ..Default::default()
                    },
                );
                match resolver.process(&outcome.text) {
                    Ok(Some(views)) => {
                        debug!(entries = views.user_view.len(), "normative annex produced");
                        views.user_view
                    }
                    Ok(None) => Vec::new(),
                    Err(err) => {
                        warn!(%err, "citation resolution failed; continuing without annex");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        // A turn persists iff its debit applied: debit first, refund when
        // persistence fails.  Either failure is terminal and leaves no
        // partial state.
        let debit = self
            .credits
            .debit(&request.user_id, &tenant.config.model, &outcome.usage)
            .await?;

        let persisted = self
            .memory
            .save_turn(
                &request.user_id,
                &request.chat_id,
                &request.question,
                &outcome.text,
                outcome.usage,
                if annex.is_empty() { None } else { Some(Value::Array(annex.clone())) },
                mem.max_history,
            )
            .and_then(|_| {
                let turns = self.memory.load_turn_count(&request.user_id, &request.chat_id) + 1;
                self.memory
                    .save_turn_count(&request.user_id, &request.chat_id, turns)
                    .map(|_| turns)
            });
        let turns = match persisted {
            Ok(turns) => turns,
            Err(err) => {
                if let Err(refund_err) =
                    self.credits.refund(&request.user_id, debit.credits).await
                {
                    warn!(%refund_err, "refund after failed persistence also failed");
                }
                return Err(err.into());
            }
        };
        let status =
            InteractionStatus::compute(turns, mem.max_chat_interactions, mem.warning_threshold);
        let credit_consumption = CreditSummary::from(&debit);

        // Cache store is best-effort.
        let cached = CachedTurn {
            text: outcome.text.clone(),
            usage: outcome.usage,
            interaction_status: status,
            normative_annex: annex.clone(),
        };
        if let Ok(blob) = serde_json::to_string(&cached) {
            self.cache
                .set(&cache_key, blob, Duration::from_secs(self.config.cache.ttl_secs))
                .await;
        }

        let _ = event_tx
            .send(TurnEvent::Done {
                usage: outcome.usage,
                interaction_status: status,
                credit_consumption,
                normative_annex: annex,
                url_validation: outcome.url_validation,
                from_cache: false,
            })
            .await;
        info!(tokens = outcome.usage.total_tokens, turns, "turn completed");
        Ok(())
    }
}

fn is_text_like(mime: &str) -> bool {
    let mime = mime.to_lowercase();
    mime.starts_with("text/") || mime.contains("json") || mime.contains("xml")
}

/// Question plus attachment previews.  Text attachments ride along as short
/// previews when retrieval is on (the full content goes to the per-user
/// temporary retrieval store out of band); everything else becomes a
/// reference marker.
fn compose_user_message(
    question: &str,
    attachments: &[Attachment],
    retrieval_enabled: bool,
) -> String {
    if attachments.is_empty() {
        return question.to_string();
    }
    let mut out = String::from(question);
    for attachment in attachments {
        if retrieval_enabled && is_text_like(&attachment.mime) {
            debug!(
                filename = %attachment.filename,
                "attachment forwarded to the per-user retrieval store"
            );
            let preview: String = attachment
                .content
                .chars()
                .take(ATTACHMENT_PREVIEW_CHARS)
                .collect();
            out.push_str(&format!(
                "\n\n=== Adjunto: {} ===\n{preview}",
                attachment.filename
            ));
        } else {
            out.push_str(&format!(
                "\n\n[Adjunto: {} ({})]",
                attachment.filename, attachment.mime
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_like_mimes() {
        assert!(is_text_like("text/plain"));
        assert!(is_text_like("application/json"));
        assert!(is_text_like("application/xml"));
        assert!(!is_text_like("application/pdf"));
        assert!(!is_text_like("image/png"));
    }

    #[test]
    fn attachments_preview_only_with_retrieval() {
        let attachments = vec![Attachment {
            filename: "contrato.txt".to_string(),
            mime: "text/plain".to_string(),
            content: "cláusula primera".to_string(),
        }];

        let with = compose_user_message("pregunta", &attachments, true);
        assert!(with.contains("=== Adjunto: contrato.txt ==="));
        assert!(with.contains("cláusula primera"));

        let without = compose_user_message("pregunta", &attachments, false);
        assert!(without.contains("[Adjunto: contrato.txt (text/plain)]"));
        assert!(!without.contains("cláusula primera"));
    }

    #[test]
    fn non_text_attachment_is_a_marker() {
        let attachments = vec![Attachment {
            filename: "escritura.pdf".to_string(),
            mime: "application/pdf".to_string(),
            content: String::new(),
        }];
        let message = compose_user_message("pregunta", &attachments, true);
        assert!(message.contains("[Adjunto: escritura.pdf (application/pdf)]"));
    }

    #[test]
    fn long_preview_is_truncated() {
        let attachments = vec![Attachment {
            filename: "largo.txt".to_string(),
            mime: "text/plain".to_string(),
            content: "x".repeat(2_000),
        }];
        let message = compose_user_message("p", &attachments, true);
        let preview_len = message.split("===\n").nth(1).unwrap().chars().count();
        assert_eq!(preview_len, ATTACHMENT_PREVIEW_CHARS);
    }
}
