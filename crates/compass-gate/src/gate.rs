//! The authorization gate.
//!
//! The sole boundary through which any externally-effecting tool call is
//! validated, scored for confidence, and executed or deferred to a human.
//! Per-call pipeline: validate headers, check the replay guard, validate the
//! body, authorize against the allowlist, score, write the pre-flight effect
//! row, branch on the verdict, and finalize the row exactly once.
//!
//! The pre-flight write happens before any execution attempt: a crash
//! between action and audit write would otherwise produce an untraceable
//! external effect. The effect ledger is the sole source of truth for "what
//! did this agent actually do," so a row is never left dangling — every
//! failure path completes it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use compass_core::config::GateConfig;
use compass_core::events::DomainEvent;
use compass_core::types::{Effect, EffectStatus, Proposal, Timestamp, Verdict};
use compass_storage::{Database, EffectRepository, ProposalRepository};

use crate::error::GateError;
use crate::executor::{ExecutionMode, ToolExecutor};
use crate::registry::{parse_scopes, EffectClass, Scope, ToolId, ToolListing, ToolRegistry};
use crate::replay::ReplayGuard;
use crate::scoring::score_call;
use crate::types::{AuthorizedCall, GateCallBody, GateCallStatus, GateHeaders, GateResponse};

/// The authorization gate.
pub struct Gate {
    credential: String,
    config: GateConfig,
    registry: ToolRegistry,
    replay: Arc<dyn ReplayGuard>,
    effects: EffectRepository,
    proposals: ProposalRepository,
    executor: Arc<dyn ToolExecutor>,
    events: broadcast::Sender<DomainEvent>,
}

impl Gate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        credential: String,
        config: GateConfig,
        registry: ToolRegistry,
        replay: Arc<dyn ReplayGuard>,
        executor: Arc<dyn ToolExecutor>,
        events: broadcast::Sender<DomainEvent>,
    ) -> Self {
        Self {
            credential,
            config,
            registry,
            replay,
            effects: EffectRepository::new(Arc::clone(&db)),
            proposals: ProposalRepository::new(db),
            executor,
            events,
        }
    }

    /// Read-only allowlist listing. No side effects.
    pub fn list_tools(&self) -> Vec<ToolListing> {
        self.registry.list()
    }

    pub fn list_effects(&self, limit: u32) -> Result<Vec<Effect>, GateError> {
        Ok(self.effects.list(limit)?)
    }

    pub fn get_effect(&self, id: Uuid) -> Result<Option<Effect>, GateError> {
        Ok(self.effects.get(id)?)
    }

    pub fn list_pending_proposals(&self, limit: u32) -> Result<Vec<Proposal>, GateError> {
        Ok(self.proposals.list_pending(limit)?)
    }

    /// Approve a held proposal for downstream pickup. Returns `false` if the
    /// proposal was already approved.
    pub fn approve_proposal(&self, id: Uuid) -> Result<bool, GateError> {
        if self.proposals.get(id)?.is_none() {
            return Err(GateError::MalformedBody(format!("unknown proposal: {}", id)));
        }
        Ok(self.proposals.approve(id)?)
    }

    /// Handle one gate call end to end.
    ///
    /// Errors are pre-ledger rejections (bad credential, replay, malformed
    /// call); everything after the pre-flight write resolves to a
    /// `GateResponse`, including denials and executor failures.
    pub async fn handle_call(
        &self,
        headers: &GateHeaders,
        body: &GateCallBody,
    ) -> Result<GateResponse, GateError> {
        // Steps 1-3 reject before any ledger write.
        self.validate_headers(headers)?;
        let scopes = parse_scopes(&headers.scope)?;

        if !self.replay.register(&headers.nonce, Timestamp::now()) {
            tracing::warn!(agent = %headers.agent, nonce = %headers.nonce, "replayed nonce rejected");
            return Err(GateError::ReplayedNonce);
        }

        validate_body(body)?;

        // Step 4-5: authorize against the allowlist and score.
        let (verdict, confidence, reason, tool_id) = self.authorize(body, &scopes);

        // Step 6: the pre-flight write, unconditionally before any execution
        // attempt. Denied calls are recorded too — the audit trail covers
        // every decision.
        let effect = Effect {
            id: Uuid::new_v4(),
            call_id: body.call_id.clone(),
            agent: headers.agent.clone(),
            tool: body.tool.clone(),
            scope: headers.scope.clone(),
            intent: body.intent.clone(),
            confidence,
            verdict,
            reason: reason.clone(),
            status: EffectStatus::Proposed,
            created_at: Timestamp::now(),
            completed_at: None,
        };
        self.effects.create(&effect)?;

        tracing::info!(
            effect_id = %effect.id,
            call_id = %body.call_id,
            agent = %headers.agent,
            tool = %body.tool,
            verdict = %verdict,
            confidence,
            "gate decision recorded"
        );
        let _ = self.events.send(DomainEvent::EffectRecorded {
            effect_id: effect.id,
            call_id: body.call_id.clone(),
            tool: body.tool.clone(),
            verdict,
            confidence,
            timestamp: Timestamp::now(),
        });

        // Steps 7-8: branch on the verdict. Any failure past this point is
        // converted into a structured denial and the effect row is still
        // completed.
        match self
            .dispatch(&effect, verdict, confidence, &reason, tool_id, headers, body, &scopes)
            .await
        {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::error!(effect_id = %effect.id, error = %err, "gate dispatch failed");
                self.finalize(effect.id, EffectStatus::Failed);
                Ok(GateResponse {
                    call_id: body.call_id.clone(),
                    status: GateCallStatus::Denied,
                    proposal_id: None,
                    confidence,
                    reason: Some(format!("internal error: {}", err)),
                    result: None,
                    audit_ref: Some(effect.id),
                })
            }
        }
    }

    fn validate_headers(&self, headers: &GateHeaders) -> Result<(), GateError> {
        if headers.credential.is_empty() {
            return Err(GateError::MissingHeader("x-compass-credential"));
        }
        if headers.credential != self.credential {
            return Err(GateError::BadCredential);
        }
        if headers.agent.is_empty() {
            return Err(GateError::MissingHeader("x-compass-agent"));
        }
        if headers.nonce.is_empty() {
            return Err(GateError::MissingHeader("x-compass-nonce"));
        }
        if headers.nonce.len() < 8 {
            return Err(GateError::MalformedHeader {
                name: "x-compass-nonce",
                reason: "nonce must be at least 8 characters".to_string(),
            });
        }
        let skew = (Timestamp::now().0 - headers.timestamp).abs();
        if skew > self.config.timestamp_skew_secs {
            return Err(GateError::StaleTimestamp {
                skew_secs: self.config.timestamp_skew_secs,
            });
        }
        Ok(())
    }

    /// Resolve the tool, check scopes, and score. Unknown tools and missing
    /// scopes yield a deny verdict rather than a pre-ledger rejection, so
    /// the decision still lands in the ledger.
    fn authorize(
        &self,
        body: &GateCallBody,
        scopes: &BTreeSet<Scope>,
    ) -> (Verdict, f64, String, Option<ToolId>) {
        let tool_id = match body.tool.parse::<ToolId>() {
            Ok(id) => id,
            Err(_) => {
                return (
                    Verdict::Deny,
                    0.0,
                    format!("tool not in allowlist: {}", body.tool),
                    None,
                );
            }
        };

        let spec = self.registry.get(tool_id);
        if !scopes.is_superset(&spec.scopes) {
            let missing: Vec<String> = spec
                .scopes
                .difference(scopes)
                .map(|s| s.to_string())
                .collect();
            return (
                Verdict::Deny,
                0.0,
                format!("caller scope does not cover: {}", missing.join(", ")),
                Some(tool_id),
            );
        }

        let report = score_call(spec, &body.intent, &body.inputs);
        let verdict = if report.score >= self.config.allow_threshold {
            Verdict::Allow
        } else if report.score < self.config.deny_threshold {
            Verdict::Deny
        } else {
            Verdict::RequireHuman
        };
        (verdict, report.score, report.reason, Some(tool_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        effect: &Effect,
        verdict: Verdict,
        confidence: f64,
        reason: &str,
        tool_id: Option<ToolId>,
        headers: &GateHeaders,
        body: &GateCallBody,
        scopes: &BTreeSet<Scope>,
    ) -> Result<GateResponse, GateError> {
        match verdict {
            Verdict::Deny => {
                self.finalize(effect.id, EffectStatus::Denied);
                Ok(GateResponse {
                    call_id: body.call_id.clone(),
                    status: GateCallStatus::Denied,
                    proposal_id: None,
                    confidence,
                    reason: Some(reason.to_string()),
                    result: None,
                    audit_ref: Some(effect.id),
                })
            }

            Verdict::RequireHuman => {
                // Only known tools score into this band; unknown tools are
                // denied with tool_id = None.
                let Some(tool_id) = tool_id else {
                    return Err(GateError::MalformedBody(
                        "require_human verdict without a resolved tool".to_string(),
                    ));
                };
                let spec = self.registry.get(tool_id);

                if spec.effect == EffectClass::Propose {
                    // Side-effect-free preview producing a held proposal.
                    let call = authorized_call(tool_id, headers, body, scopes);
                    let outcome = self.executor.execute(&call, ExecutionMode::Preview).await?;
                    let proposal = self.proposals.create(
                        effect.id,
                        &body.tool,
                        &outcome.summary,
                        &outcome.artifacts,
                    )?;

                    tracing::info!(
                        proposal_id = %proposal.id,
                        effect_id = %effect.id,
                        tool = %body.tool,
                        "proposal held for human approval"
                    );
                    let _ = self.events.send(DomainEvent::ProposalCreated {
                        proposal_id: proposal.id,
                        effect_id: effect.id,
                        tool: body.tool.clone(),
                        timestamp: Timestamp::now(),
                    });

                    self.finalize(effect.id, EffectStatus::RequireHuman);
                    Ok(GateResponse {
                        call_id: body.call_id.clone(),
                        status: GateCallStatus::Proposed,
                        proposal_id: Some(proposal.id),
                        confidence,
                        reason: Some(reason.to_string()),
                        result: Some(outcome),
                        audit_ref: Some(effect.id),
                    })
                } else {
                    // No artifact for non-propose tools: the caller is told
                    // confirmation is required.
                    self.finalize(effect.id, EffectStatus::RequireHuman);
                    Ok(GateResponse {
                        call_id: body.call_id.clone(),
                        status: GateCallStatus::Proposed,
                        proposal_id: None,
                        confidence,
                        reason: Some(format!("human confirmation required: {}", reason)),
                        result: None,
                        audit_ref: Some(effect.id),
                    })
                }
            }

            Verdict::Allow => {
                let Some(tool_id) = tool_id else {
                    return Err(GateError::MalformedBody(
                        "allow verdict without a resolved tool".to_string(),
                    ));
                };
                let call = authorized_call(tool_id, headers, body, scopes);
                let outcome = self.executor.execute(&call, ExecutionMode::Live).await?;

                self.finalize(effect.id, EffectStatus::Executed);
                Ok(GateResponse {
                    call_id: body.call_id.clone(),
                    status: GateCallStatus::Executed,
                    proposal_id: None,
                    confidence,
                    reason: None,
                    result: Some(outcome),
                    audit_ref: Some(effect.id),
                })
            }
        }
    }

    /// Complete the effect row. Best-effort: the `completed_at IS NULL`
    /// guard in the repository keeps this exactly-once even if both the
    /// dispatch path and the error path reach it.
    fn finalize(&self, effect_id: Uuid, status: EffectStatus) {
        match self.effects.complete(effect_id, status) {
            Ok(true) => {
                let _ = self.events.send(DomainEvent::EffectCompleted {
                    effect_id,
                    status,
                    timestamp: Timestamp::now(),
                });
            }
            Ok(false) => {
                tracing::debug!(effect_id = %effect_id, "effect already completed");
            }
            Err(e) => {
                tracing::error!(effect_id = %effect_id, error = %e, "effect completion write failed");
            }
        }
    }
}

fn validate_body(body: &GateCallBody) -> Result<(), GateError> {
    if body.call_id.is_empty() {
        return Err(GateError::MalformedBody("call_id is required".to_string()));
    }
    if body.tool.is_empty() {
        return Err(GateError::MalformedBody("tool is required".to_string()));
    }
    if body.intent.is_empty() {
        return Err(GateError::MalformedBody("intent is required".to_string()));
    }
    if body.inputs.is_null() {
        return Err(GateError::MalformedBody("inputs are required".to_string()));
    }
    Ok(())
}

fn authorized_call(
    tool: ToolId,
    headers: &GateHeaders,
    body: &GateCallBody,
    scopes: &BTreeSet<Scope>,
) -> AuthorizedCall {
    AuthorizedCall {
        call_id: body.call_id.clone(),
        agent: headers.agent.clone(),
        tool,
        intent: body.intent.clone(),
        inputs: body.inputs.clone(),
        scopes: scopes.clone(),
    }
}
