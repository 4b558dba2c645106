//! Agent runtime adapter.
//!
//! One stable `run` operation over the model backend's tool-use loop. All
//! production code drives agents through this adapter; provider wire-format
//! differences stay below the [`LlmClient`](crate::llm::LlmClient) trait.
//! Every model call and tool dispatch is recorded as a span and honors the
//! request's cancellation token.

pub mod spans;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::{Agent, ToolInvocation};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::llm::{ChatMessage, LlmClient, TokenUsage};
use crate::memory::SharedMemory;
use crate::trace::TraceEmitter;

use spans::{SpanCollector, SpanRecord};

/// Explicit request-scoped state threaded through every component. No
/// process-wide mutable state participates in request handling.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub workspace_id: String,
    pub memory: Arc<SharedMemory>,
    pub cancel: CancellationToken,
    pub spans: SpanCollector,
    pub trace: TraceEmitter,
}

impl RequestContext {
    pub fn new(workspace_id: impl Into<String>, cache_capacity: u64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            memory: Arc::new(SharedMemory::new(cache_capacity)),
            cancel: CancellationToken::new(),
            spans: SpanCollector::new(),
            trace: TraceEmitter::new(),
        }
    }

    /// Same request state with an empty trace. Used when a blocked debate
    /// falls back to the semantic flow and must not leave a second root in
    /// the returned topology.
    pub fn with_fresh_trace(&self) -> Self {
        Self {
            trace: TraceEmitter::new(),
            ..self.clone()
        }
    }
}

/// Record of one tool dispatch within a run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    /// First 200 chars of the tool output.
    pub output_preview: String,
}

/// Outcome of one agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentRunResult {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
    pub spans: Vec<SpanRecord>,
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    max_tool_turns: usize,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, max_tool_turns: usize) -> Self {
        Self {
            llm,
            max_tool_turns: max_tool_turns.max(1),
        }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// Execute a tool-use loop for `agent` until the model stops calling
    /// tools or the turn budget is exhausted. Cancellation aborts between
    /// suspension points; spans recorded during the run are merged into the
    /// request collector on every exit path.
    pub async fn run(
        &self,
        agent: &Agent,
        prompt: &str,
        ctx: &RequestContext,
        parent_span: Option<&str>,
    ) -> OrchestratorResult<AgentRunResult> {
        let run_spans = SpanCollector::new();
        let run_span = run_spans.start(&format!("agent:{}", agent.name), parent_span);
        let run_span_id = run_span.id.clone();

        let outcome = self
            .run_inner(agent, prompt, ctx, &run_spans, &run_span_id)
            .await;

        run_spans.finish(
            run_span,
            json!({
                "agent": agent.name,
                "database": agent.database,
                "ok": outcome.is_ok(),
            }),
        );
        let recorded = run_spans.snapshot();
        ctx.spans.extend(recorded.clone());

        outcome.map(|mut result| {
            result.spans = recorded;
            result
        })
    }

    async fn run_inner(
        &self,
        agent: &Agent,
        prompt: &str,
        ctx: &RequestContext,
        run_spans: &SpanCollector,
        run_span_id: &str,
    ) -> OrchestratorResult<AgentRunResult> {
        let tool_defs = agent.tool_definitions();
        let mut messages = vec![ChatMessage::user(prompt)];
        let mut usage = TokenUsage::default();
        let mut tool_calls = Vec::new();

        for _ in 0..self.max_tool_turns {
            let model_span = run_spans.start("model.chat", Some(run_span_id));
            let turn = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    run_spans.finish(model_span, json!({"cancelled": true}));
                    return Err(cancelled(agent));
                }
                result = self.llm.chat_with_tools(&agent.instructions, &messages, &tool_defs) => {
                    match result {
                        Ok(turn) => turn,
                        Err(err) => {
                            run_spans.finish(model_span, json!({"error": err.to_string()}));
                            return Err(OrchestratorError::Tool(format!(
                                "{}: model call failed: {err}",
                                agent.name
                            )));
                        }
                    }
                }
            };
            run_spans.finish(
                model_span,
                json!({"tool_calls": turn.tool_calls.len(), "output_tokens": turn.usage.output_tokens}),
            );
            usage.add(turn.usage);

            if turn.tool_calls.is_empty() {
                return Ok(AgentRunResult {
                    text: turn.text,
                    tool_calls,
                    usage,
                    spans: Vec::new(),
                });
            }

            messages.push(ChatMessage::assistant_with_calls(
                turn.text.clone(),
                turn.tool_calls.clone(),
            ));

            for call in turn.tool_calls {
                let tool = agent.tool(&call.name).ok_or_else(|| {
                    OrchestratorError::Tool(format!("{}: unknown tool '{}'", agent.name, call.name))
                })?;

                let tool_span = run_spans.start(&format!("tool:{}", call.name), Some(run_span_id));
                let tool_span_id = tool_span.id.clone();
                let invocation = ToolInvocation {
                    arguments: call.arguments.clone(),
                    memory: Arc::clone(&ctx.memory),
                    cancel: ctx.cancel.clone(),
                    spans: run_spans.clone(),
                    parent_span: Some(tool_span_id.clone()),
                };
                let output = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {
                        run_spans.finish(tool_span, json!({"cancelled": true}));
                        return Err(cancelled(agent));
                    }
                    result = tool.invoke(invocation) => {
                        match result {
                            Ok(output) => output,
                            Err(err) => {
                                run_spans.finish(tool_span, json!({"error": err.to_string()}));
                                // A database going down mid-run is a readiness
                                // event, not a tool defect.
                                if let Some(crate::graph::GraphError::Unreachable(msg)) =
                                    err.downcast_ref::<crate::graph::GraphError>()
                                {
                                    return Err(OrchestratorError::Unreachable(msg.clone()));
                                }
                                return Err(OrchestratorError::Tool(format!(
                                    "{}: tool '{}' failed: {err}",
                                    agent.name, call.name
                                )));
                            }
                        }
                    }
                };
                run_spans.finish(
                    tool_span,
                    json!({"tool": call.name, "output_chars": output.len()}),
                );

                tool_calls.push(ToolCallRecord {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    output_preview: preview(&output),
                });
                messages.push(ChatMessage::tool_result(&call, output));
            }
        }

        // Turn budget exhausted with tools still being requested.
        Err(OrchestratorError::Tool(format!(
            "{}: tool budget exhausted after {} turns",
            agent.name, self.max_tool_turns
        )))
    }
}

fn cancelled(agent: &Agent) -> OrchestratorError {
    OrchestratorError::Timeout {
        scope: format!("agent {}", agent.name),
        trace_steps: Vec::new(),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
