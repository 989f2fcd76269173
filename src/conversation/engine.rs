// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Conversation state machine.
//!
//! Dialogue state and bounded counters live in the key-value store under
//! `conversation:{id}`, so a session can be inspected (or resumed) from
//! outside the actor. The engine advances on transcribed turns routed by
//! confidence, escalates after repeated clarifications or silences, and caps
//! the total number of bot turns.

use std::sync::Arc;

use tracing::debug;

use crate::conversation::completeness::CompletenessGate;
use crate::conversation::router::{ConfidenceRouter, RouteAction};
use crate::conversation::{DialogState, InputQuality};
use crate::services::{ChatMessage, LlmService, ServiceError, Transcription};
use crate::session::{SessionStore, StoreError};
use crate::utils::now_epoch_secs;

/// Errors from conversation operations.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Result of advancing the dialogue on a transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Dialogue state after the transition.
    pub state: DialogState,
    /// Canned response to speak, or empty when the LLM should reply.
    pub response: String,
    /// Whether the session should end after the response plays.
    pub should_end: bool,
    /// Routing action taken for the transcription.
    pub action: RouteAction,
}

/// Default persona for reply generation.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly, professional voice assistant. \
Speak in short, clear, natural spoken-language sentences. \
Ask only one question at a time and keep responses brief and voice-friendly.";

fn conversation_key(id: &str) -> String {
    format!("conversation:{}", id)
}

/// Store-backed dialogue state machine with confidence routing and a
/// linguistic-completeness gate.
pub struct ConversationEngine {
    store: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmService>,
    gate: CompletenessGate,
    router: ConfidenceRouter,
    system_prompt: String,
    max_clarifications: u32,
    max_silence_prompts: u32,
    max_turns: u32,
    key_ttl_secs: i64,
}

impl ConversationEngine {
    /// Create an engine over the given store and LLM backend.
    pub fn new(store: Arc<dyn SessionStore>, llm: Arc<dyn LlmService>) -> Self {
        Self {
            store,
            gate: CompletenessGate::new(Arc::clone(&llm)),
            llm,
            router: ConfidenceRouter::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_clarifications: 2,
            max_silence_prompts: 2,
            max_turns: 20,
            key_ttl_secs: 660,
        }
    }

    /// Builder method: set the reply-generation persona.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Builder method: set the confidence router.
    pub fn with_router(mut self, router: ConfidenceRouter) -> Self {
        self.router = router;
        self
    }

    /// Builder method: set the bot-turn cap.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Builder method: set the TTL applied to conversation keys.
    pub fn with_key_ttl(mut self, seconds: i64) -> Self {
        self.key_ttl_secs = seconds;
        self
    }

    /// Maximum number of bot turns before the conversation ends.
    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    // -- Store-backed state --------------------------------------------------

    /// Initialize conversation state for a new session.
    pub async fn initialize(&self, id: &str) -> Result<(), ConversationError> {
        let now = now_epoch_secs().to_string();
        let key = conversation_key(id);
        self.store
            .hash_set(
                &key,
                &[
                    ("state", DialogState::Init.as_str().to_string()),
                    ("turn_count", "0".to_string()),
                    ("clarification_count", "0".to_string()),
                    ("silence_prompts", "0".to_string()),
                    ("last_user_input", String::new()),
                    ("pending_prefix", String::new()),
                    ("created_at", now.clone()),
                    ("updated_at", now),
                ],
            )
            .await?;
        self.store.expire(&key, self.key_ttl_secs).await?;
        Ok(())
    }

    /// Current dialogue state, or `None` for an unknown or drifted record.
    pub async fn get_state(&self, id: &str) -> Result<Option<DialogState>, ConversationError> {
        let raw = self.store.hash_get(&conversation_key(id), "state").await?;
        Ok(raw.as_deref().and_then(DialogState::parse))
    }

    /// Overwrite the dialogue state.
    pub async fn update_state(&self, id: &str, state: DialogState) -> Result<(), ConversationError> {
        self.store
            .hash_set(
                &conversation_key(id),
                &[
                    ("state", state.as_str().to_string()),
                    ("updated_at", now_epoch_secs().to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Read a bounded counter.
    pub async fn get_counter(&self, id: &str, field: &str) -> Result<u32, ConversationError> {
        let raw = self.store.hash_get(&conversation_key(id), field).await?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0))
    }

    /// Increment a bounded counter, returning the new value.
    async fn increment(&self, id: &str, field: &str) -> Result<u32, ConversationError> {
        let next = self.get_counter(id, field).await? + 1;
        self.store
            .hash_set(&conversation_key(id), &[(field, next.to_string())])
            .await?;
        Ok(next)
    }

    /// Bump the silence-prompt counter (used for nudges too).
    pub async fn increment_silence_prompt(&self, id: &str) -> Result<u32, ConversationError> {
        self.increment(id, "silence_prompts").await
    }

    /// Record the transcribed prefix of an incomplete turn.
    pub async fn set_pending_prefix(&self, id: &str, prefix: &str) -> Result<(), ConversationError> {
        self.store
            .hash_set(
                &conversation_key(id),
                &[("pending_prefix", prefix.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Take (read and clear) the pending prefix.
    pub async fn take_pending_prefix(&self, id: &str) -> Result<String, ConversationError> {
        let prefix = self
            .store
            .hash_get(&conversation_key(id), "pending_prefix")
            .await?
            .unwrap_or_default();
        if !prefix.is_empty() {
            self.set_pending_prefix(id, "").await?;
        }
        Ok(prefix)
    }

    // -- Canned prompts ------------------------------------------------------

    /// Greeting spoken when the channel opens.
    pub fn greeting(&self) -> &'static str {
        "Hello! How can I help you today?"
    }

    /// Escalation message when understanding keeps failing.
    pub fn error_message(&self) -> &'static str {
        "I'm having trouble understanding you. Let me connect you to a human \
         representative who can assist you better."
    }

    /// Escalating prompt for the nth consecutive silence.
    pub fn silence_prompt(&self, count: u32) -> &'static str {
        match count {
            0 | 1 => "I'm listening. Please go ahead and speak.",
            2 => "I'm still here. Please tell me how I can help you.",
            _ => "I didn't hear anything. If you need assistance, please speak now \
                  or I'll end this call.",
        }
    }

    /// Long silence, no speech yet.
    pub fn nudge_message(&self) -> &'static str {
        "Are you still there?"
    }

    /// The user is pausing a lot during an incomplete wait.
    pub fn comfort_message(&self) -> &'static str {
        "Take your time, I'm listening."
    }

    /// Incomplete thought; encourage the user to continue.
    pub fn continuation_cue(&self) -> &'static str {
        "Mm-hmm… go on."
    }

    /// Farewell for a normally ended conversation.
    pub fn goodbye(&self) -> &'static str {
        "Thank you for calling. Have a great day!"
    }

    /// Apology used when an adapter fails twice.
    pub fn recovery_message(&self) -> &'static str {
        "I'm sorry, I'm having a little trouble right now. Could you say that again?"
    }

    // -- Classification ------------------------------------------------------

    /// Classify input quality from the text and its routing action.
    pub fn input_quality(&self, text: &str, action: RouteAction) -> InputQuality {
        if !text.chars().any(|c| c.is_alphanumeric()) {
            InputQuality::Empty
        } else if action == RouteAction::Reject {
            InputQuality::Unclear
        } else {
            InputQuality::Clear
        }
    }

    /// Whether `text` is a linguistically complete thought.
    ///
    /// Bounded to at most one LLM arbitration call; pass
    /// `allow_arbitration = false` to keep the check purely rule-based.
    pub async fn check_completeness(&self, text: &str, allow_arbitration: bool) -> bool {
        self.gate.is_complete(text, allow_arbitration).await
    }

    /// Route a transcription without advancing any state.
    pub fn route(&self, transcription: &Transcription) -> RouteAction {
        self.router.route(transcription)
    }

    // -- State machine -------------------------------------------------------

    /// Record that a captured turn is being transcribed.
    pub async fn begin_processing(&self, id: &str) -> Result<(), ConversationError> {
        self.update_state(id, DialogState::Processing).await
    }

    /// Advance the dialogue without a routed transcription.
    ///
    /// Drives the `INIT -> GREETING -> LISTENING` opening, the silence-prompt
    /// ladder, and the `RESPONDING -> LISTENING`/`END` bookkeeping after a
    /// reply has been dispatched. Returns `(state, response, should_end)`.
    pub async fn process_turn_transition(
        &self,
        id: &str,
        user_text: Option<&str>,
    ) -> Result<(DialogState, String, bool), ConversationError> {
        let current = match self.get_state(id).await? {
            Some(state) => state,
            None => {
                self.initialize(id).await?;
                DialogState::Init
            }
        };
        let text = user_text.map(str::trim).unwrap_or_default();

        let result = match current {
            DialogState::Init => {
                self.update_state(id, DialogState::Greeting).await?;
                (DialogState::Greeting, self.greeting().to_string(), false)
            }
            DialogState::Greeting => {
                self.update_state(id, DialogState::Listening).await?;
                (DialogState::Listening, String::new(), false)
            }
            DialogState::Listening | DialogState::Clarifying => {
                if text.is_empty() {
                    self.silence_ladder(id).await?
                } else {
                    self.store
                        .hash_set(
                            &conversation_key(id),
                            &[("last_user_input", text.to_string())],
                        )
                        .await?;
                    self.update_state(id, DialogState::Processing).await?;
                    (DialogState::Processing, String::new(), false)
                }
            }
            DialogState::Processing => {
                if text.chars().any(|c| c.is_alphanumeric()) {
                    self.update_state(id, DialogState::Responding).await?;
                    (DialogState::Responding, String::new(), false)
                } else {
                    self.silence_ladder(id).await?
                }
            }
            DialogState::Responding => {
                let turns = self.increment(id, "turn_count").await?;
                if turns >= self.max_turns {
                    self.update_state(id, DialogState::End).await?;
                    (
                        DialogState::End,
                        "Thank you for the conversation. Have a great day!".to_string(),
                        true,
                    )
                } else {
                    self.update_state(id, DialogState::Listening).await?;
                    (DialogState::Listening, String::new(), false)
                }
            }
            DialogState::Error => {
                self.update_state(id, DialogState::End).await?;
                (DialogState::End, String::new(), true)
            }
            DialogState::End => (DialogState::End, String::new(), true),
        };

        debug!(
            from = current.as_str(),
            to = result.0.as_str(),
            "dialogue transition"
        );
        Ok(result)
    }

    /// Advance the dialogue on a routed transcription.
    ///
    /// Rejected input asks for a repeat, barely usable input asks for
    /// confirmation, and accepted input with content moves the dialogue to
    /// `RESPONDING` so the caller can generate the reply.
    pub async fn process_transcription(
        &self,
        id: &str,
        transcription: &Transcription,
    ) -> Result<TurnOutcome, ConversationError> {
        let action = self.router.route(transcription);

        match action {
            RouteAction::Reject => {
                let (state, response, should_end) = self
                    .clarification(id, self.router.clarification_message(transcription.confidence))
                    .await?;
                Ok(TurnOutcome {
                    state,
                    response,
                    should_end,
                    action,
                })
            }
            RouteAction::Clarify => {
                // Keep the text so a confirmation can refer back to it, but
                // do not spend a turn against the LLM.
                self.store
                    .hash_set(
                        &conversation_key(id),
                        &[("last_user_input", transcription.text.clone())],
                    )
                    .await?;
                let (state, response, should_end) = self
                    .clarification(id, self.router.clarification_message(transcription.confidence))
                    .await?;
                Ok(TurnOutcome {
                    state,
                    response,
                    should_end,
                    action,
                })
            }
            RouteAction::Accept | RouteAction::AcceptSoft => {
                if matches!(
                    self.get_state(id).await?,
                    Some(DialogState::Listening) | Some(DialogState::Clarifying)
                ) {
                    self.update_state(id, DialogState::Processing).await?;
                }
                self.store
                    .hash_set(
                        &conversation_key(id),
                        &[("last_user_input", transcription.text.clone())],
                    )
                    .await?;

                match self.input_quality(&transcription.text, action) {
                    InputQuality::Empty => {
                        let (state, response, should_end) = self.silence_ladder(id).await?;
                        Ok(TurnOutcome {
                            state,
                            response,
                            should_end,
                            action,
                        })
                    }
                    InputQuality::Unclear | InputQuality::Clear => {
                        self.update_state(id, DialogState::Responding).await?;
                        Ok(TurnOutcome {
                            state: DialogState::Responding,
                            response: String::new(),
                            should_end: false,
                            action,
                        })
                    }
                }
            }
        }
    }

    /// Generate a reply for accepted user text over the given history.
    pub async fn generate_reply(
        &self,
        history: &[ChatMessage],
        user_text: &str,
    ) -> Result<String, ServiceError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(user_text));
        self.llm.reply(&messages).await
    }

    // -- Private helpers -----------------------------------------------------

    /// Empty input: prompt the user, ending the call after repeated silence.
    async fn silence_ladder(
        &self,
        id: &str,
    ) -> Result<(DialogState, String, bool), ConversationError> {
        let count = self.increment(id, "silence_prompts").await?;
        if count > self.max_silence_prompts {
            self.update_state(id, DialogState::End).await?;
            Ok((DialogState::End, self.goodbye().to_string(), true))
        } else {
            self.update_state(id, DialogState::Listening).await?;
            Ok((
                DialogState::Listening,
                self.silence_prompt(count).to_string(),
                false,
            ))
        }
    }

    /// Unusable input: ask again, escalating to a human after repeats.
    async fn clarification(
        &self,
        id: &str,
        message: &str,
    ) -> Result<(DialogState, String, bool), ConversationError> {
        let count = self.increment(id, "clarification_count").await?;
        if count > self.max_clarifications {
            self.update_state(id, DialogState::Error).await?;
            Ok((DialogState::Error, self.error_message().to_string(), true))
        } else {
            let message = if count >= 2 {
                "I'm still having trouble understanding. Could you speak more clearly?"
            } else {
                message
            };
            self.update_state(id, DialogState::Clarifying).await?;
            Ok((DialogState::Clarifying, message.to_string(), false))
        }
    }
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("max_clarifications", &self.max_clarifications)
            .field("max_silence_prompts", &self.max_silence_prompts)
            .field("max_turns", &self.max_turns)
            .finish()
    }
}
