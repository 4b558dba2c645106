//! Semantic flow: Resolver -> Router -> Specialist(s) -> Answer generation.
//!
//! Emits the linear trace chain `RESOLVE -> ROUTE -> SPECIALIST -> ANSWER`.
//! The hybrid route runs both specialists in sequence, chaining the second
//! SPECIALIST step under the first. Specialists execute their Cypher through
//! the database-bound agents' `query_db` tool, which keeps every call inside
//! the closure binding and the shared-memory cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::resolver::{EntityOverride, SemanticContext, SemanticEntityResolver};
use super::router::{QueryRouter, Route};
use crate::agents::{Agent, AgentPool, ToolInvocation};
use crate::error::OrchestratorResult;
use crate::runtime::{AgentRuntime, RequestContext};
use crate::trace::StepType;

/// Rows returned per specialist query.
const RESULT_LIMIT: usize = 20;
/// Records forwarded to answer generation.
const ANSWER_RECORD_CAP: usize = 20;

const ANSWER_INSTRUCTIONS: &str = "\
You compose the final answer for a knowledge-graph question-answering system. \
You receive the question, the selected route, resolved entities, and the \
specialist findings. Base the answer strictly on the findings: name the \
entities and relationships you used, and state plainly when nothing relevant \
was found. Be concise and factual.";

/// Output of one specialist pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistReport {
    pub mode: String,
    pub summary: String,
    pub records: Vec<Value>,
}

/// Result of the semantic flow.
#[derive(Debug, Clone)]
pub struct SemanticRun {
    pub answer: String,
    pub route: Route,
    pub semantic_context: SemanticContext,
    pub lpg: Option<SpecialistReport>,
    pub rdf: Option<SpecialistReport>,
}

/// Orchestrates the resolver, router, specialists, and answer agent.
pub struct SemanticFlow {
    resolver: SemanticEntityResolver,
    router: QueryRouter,
    runtime: Arc<AgentRuntime>,
    pool: Arc<AgentPool>,
}

impl SemanticFlow {
    pub fn new(
        resolver: SemanticEntityResolver,
        router: QueryRouter,
        runtime: Arc<AgentRuntime>,
        pool: Arc<AgentPool>,
    ) -> Self {
        Self {
            resolver,
            router,
            runtime,
            pool,
        }
    }

    pub async fn run(
        &self,
        question: &str,
        databases: &[String],
        overrides: &[EntityOverride],
        ctx: &RequestContext,
    ) -> OrchestratorResult<SemanticRun> {
        let semantic_context = self.resolver.resolve(question, databases, overrides).await;
        let resolve_step = ctx.trace.root(
            StepType::Resolve,
            "SemanticResolver",
            "semantic",
            "Entity extraction and disambiguation completed.",
            json!({
                "entities": semantic_context.entities,
                "unresolved_entities": semantic_context.unresolved_entities,
                "overrides_applied": semantic_context.overrides_applied.keys().collect::<Vec<_>>(),
            }),
        )?;

        let route = self.router.route(question).await;
        let route_step = ctx.trace.child(
            &resolve_step,
            StepType::Route,
            "RouterAgent",
            "semantic",
            &format!("Question routed to {route}."),
            json!({"route": route}),
        )?;
        tracing::info!(%route, "semantic flow routed");

        let mut previous_step = route_step;
        let mut lpg = None;
        let mut rdf = None;

        if matches!(route, Route::Lpg | Route::Hybrid) {
            let report = self.run_lpg(databases, &semantic_context, ctx).await;
            previous_step = ctx.trace.child(
                &previous_step,
                StepType::Specialist,
                "LPGAgent",
                "semantic",
                &report.summary,
                json!({"mode": report.mode, "records": report.records.len()}),
            )?;
            lpg = Some(report);
        }

        if matches!(route, Route::Rdf | Route::Hybrid) {
            let report = self.run_rdf(databases, &semantic_context, ctx).await;
            previous_step = ctx.trace.child(
                &previous_step,
                StepType::Specialist,
                "RDFAgent",
                "semantic",
                &report.summary,
                json!({"mode": report.mode, "records": report.records.len()}),
            )?;
            rdf = Some(report);
        }

        let answer = self
            .generate_answer(question, route, &semantic_context, &lpg, &rdf, ctx)
            .await?;
        ctx.trace.child(
            &previous_step,
            StepType::Answer,
            "AnswerGenerationAgent",
            "semantic",
            &preview(&answer),
            json!({}),
        )?;

        Ok(SemanticRun {
            answer,
            route,
            semantic_context,
            lpg,
            rdf,
        })
    }

    /// Expand pinned entities through their LPG neighborhoods; with nothing
    /// resolved, fall back to a label distribution overview.
    async fn run_lpg(
        &self,
        databases: &[String],
        context: &SemanticContext,
        ctx: &RequestContext,
    ) -> SpecialistReport {
        let top = context.top_matches(3);
        if top.is_empty() {
            let records = self
                .per_database(
                    databases,
                    "MATCH (n)\nRETURN labels(n)[0] AS label, count(*) AS count\nORDER BY count DESC\nLIMIT 10",
                    Value::Null,
                    ctx,
                )
                .await;
            return SpecialistReport {
                mode: "lpg".to_string(),
                summary: "No resolved entity. Returned graph label distribution.".to_string(),
                records,
            };
        }

        let query = "\
MATCH (n)
WHERE elementId(n) = toString($node_id)
OPTIONAL MATCH (n)-[r]-(m)
RETURN coalesce(n.name, n.title, n.id, n.uri, elementId(n)) AS entity,
       labels(n) AS labels,
       collect(
         DISTINCT {
           type: type(r),
           target: coalesce(m.name, m.title, m.id, m.uri, elementId(m)),
           target_labels: labels(m)
         }
       )[0..$limit] AS neighbors
LIMIT 1";
        let mut records = Vec::new();
        for candidate in top {
            let rows = self
                .query_via_agent(
                    &candidate.database,
                    query,
                    json!({"node_id": candidate.node_id, "limit": RESULT_LIMIT as i64}),
                    ctx,
                )
                .await;
            for row in rows {
                records.push(json!({
                    "database": candidate.database,
                    "question_entity": candidate.question_entity,
                    "entity": row.get("entity"),
                    "labels": row.get("labels"),
                    "neighbors": row.get("neighbors"),
                }));
            }
        }
        SpecialistReport {
            mode: "lpg".to_string(),
            summary: "Resolved entities were expanded through LPG neighborhoods.".to_string(),
            records,
        }
    }

    /// Match RDF-flavored resources by URI or name signals; with no entity,
    /// fall back to an RDF label overview.
    async fn run_rdf(
        &self,
        databases: &[String],
        context: &SemanticContext,
        ctx: &RequestContext,
    ) -> SpecialistReport {
        if let Some(entity) = context.entities.first() {
            let query = "\
MATCH (n)
WHERE (
    any(lbl IN labels(n) WHERE toLower(lbl) IN ['resource', 'class', 'ontology', 'individual'])
    OR n.uri IS NOT NULL
)
  AND any(key IN ['uri', 'name', 'title', 'id']
      WHERE n[key] IS NOT NULL
        AND toLower(toString(n[key])) CONTAINS toLower($query))
RETURN labels(n) AS labels,
       coalesce(n.uri, n.name, n.title, n.id, elementId(n)) AS resource,
       n.name AS name
LIMIT $limit";
            let records = self
                .per_database(
                    databases,
                    query,
                    json!({"query": entity, "limit": RESULT_LIMIT as i64}),
                    ctx,
                )
                .await;
            if !records.is_empty() {
                return SpecialistReport {
                    mode: "rdf".to_string(),
                    summary: "Matched RDF-like resources using URI/name signals.".to_string(),
                    records,
                };
            }
        }

        let overview = "\
MATCH (n)
WHERE any(lbl IN labels(n) WHERE toLower(lbl) IN ['resource', 'class', 'ontology', 'individual'])
   OR n.uri IS NOT NULL
RETURN labels(n)[0] AS label, count(*) AS count
ORDER BY count DESC
LIMIT 10";
        SpecialistReport {
            mode: "rdf".to_string(),
            summary: "No RDF resource match found. Returned RDF label overview.".to_string(),
            records: self.per_database(databases, overview, Value::Null, ctx).await,
        }
    }

    async fn generate_answer(
        &self,
        question: &str,
        route: Route,
        context: &SemanticContext,
        lpg: &Option<SpecialistReport>,
        rdf: &Option<SpecialistReport>,
        ctx: &RequestContext,
    ) -> OrchestratorResult<String> {
        let answer_agent = Agent::new("AnswerGenerationAgent", None, ANSWER_INSTRUCTIONS, vec![]);
        let prompt = build_answer_prompt(question, route, context, lpg, rdf);
        let result = self.runtime.run(&answer_agent, &prompt, ctx, None).await?;
        Ok(result.text)
    }

    /// Run one query on every target database, tagging rows with the source
    /// database. Per-database failures are skipped, not fatal.
    async fn per_database(
        &self,
        databases: &[String],
        query: &str,
        params: Value,
        ctx: &RequestContext,
    ) -> Vec<Value> {
        let mut records = Vec::new();
        for db in databases {
            for row in self.query_via_agent(db, query, params.clone(), ctx).await {
                let mut tagged = serde_json::Map::new();
                tagged.insert("database".to_string(), json!(db));
                if let Value::Object(row) = row {
                    tagged.extend(row);
                }
                records.push(Value::Object(tagged));
            }
        }
        records
    }

    /// Execute Cypher through the database agent's closure-bound tool so the
    /// call shares the request cache and cannot cross databases.
    async fn query_via_agent(
        &self,
        database: &str,
        query: &str,
        params: Value,
        ctx: &RequestContext,
    ) -> Vec<Value> {
        let Some(agent) = self.pool.agent(database) else {
            tracing::debug!(database, "no agent available, skipping");
            return Vec::new();
        };
        let Some(tool) = agent.tool("query_db") else {
            return Vec::new();
        };
        let invocation = ToolInvocation {
            arguments: json!({"query": query, "params": params}),
            memory: Arc::clone(&ctx.memory),
            cancel: ctx.cancel.clone(),
            spans: ctx.spans.clone(),
            parent_span: None,
        };
        match tool.invoke(invocation).await {
            Ok(output) => serde_json::from_str::<Vec<Value>>(&output).unwrap_or_default(),
            Err(err) => {
                tracing::warn!(database, %err, "specialist query failed");
                Vec::new()
            }
        }
    }
}

fn build_answer_prompt(
    question: &str,
    route: Route,
    context: &SemanticContext,
    lpg: &Option<SpecialistReport>,
    rdf: &Option<SpecialistReport>,
) -> String {
    let mut sections = vec![
        format!("Question: {question}"),
        format!("Route: {route}"),
        format!(
            "Resolved entities: {}",
            serde_json::to_string(&context.top_matches(5)).unwrap_or_else(|_| "[]".to_string())
        ),
    ];
    if !context.unresolved_entities.is_empty() {
        sections.push(format!(
            "Unresolved entities: {}",
            context.unresolved_entities.join(", ")
        ));
    }
    if !context.overrides_applied.is_empty() {
        sections.push(format!(
            "Pinned by caller: {}",
            context
                .overrides_applied
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    for report in [lpg, rdf].into_iter().flatten() {
        let capped: Vec<&Value> = report.records.iter().take(ANSWER_RECORD_CAP).collect();
        sections.push(format!(
            "{} findings ({}): {}",
            report.mode.to_uppercase(),
            report.summary,
            serde_json::to_string(&capped).unwrap_or_else(|_| "[]".to_string())
        ));
    }
    sections.push("Compose the final answer.".to_string());
    sections.join("\n\n")
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_prompt_mentions_route_and_findings() {
        let context = SemanticContext::default();
        let lpg = Some(SpecialistReport {
            mode: "lpg".to_string(),
            summary: "expanded".to_string(),
            records: vec![json!({"entity": "ACME"})],
        });
        let prompt = build_answer_prompt("Who supplies ACME?", Route::Lpg, &context, &lpg, &None);
        assert!(prompt.contains("Route: lpg"));
        assert!(prompt.contains("LPG findings"));
        assert!(prompt.contains("ACME"));
    }
}
