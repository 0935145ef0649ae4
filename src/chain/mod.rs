//! Multi-step tool orchestration with conditions, argument templating,
//! and best-effort rollback.
//!
//! A chain is an ordered sequence of dispatches through the engine. Steps
//! read prior results from an accumulating context; a required step's
//! failure triggers reverse-order compensation, an optional step's failure
//! is recorded and skipped over. Chains never persist state: a context
//! lives and dies with one invocation.

pub mod catalog;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::dispatch::Engine;
use crate::error::EngineError;
use crate::types::{AccessToken, DispatchResult, Role, TenantRecord};

pub use catalog::ChainCatalog;

/// Argument template: builds a step's argument map from the chain input and
/// the results accumulated so far.
pub type ArgTemplate =
    Arc<dyn Fn(&Value, &ChainContext) -> Result<Value, EngineError> + Send + Sync>;

/// Step guard: decides from the context whether a step runs.
pub type StepCondition = Arc<dyn Fn(&ChainContext) -> bool + Send + Sync>;

/// Rollback argument builder; returning `None` skips the compensation.
pub type RollbackArgs = Arc<dyn Fn(&ChainContext) -> Option<Value> + Send + Sync>;

/// Dynamic step generator, run once per invocation before validation.
pub type StepGenerator =
    Arc<dyn Fn(&Value) -> Result<Vec<ChainStep>, EngineError> + Send + Sync>;

/// A step's argument source.
#[derive(Clone)]
pub enum StepArgs {
    /// A fixed argument map.
    Literal(Value),
    /// A template over (input, context).
    Template(ArgTemplate),
}

impl StepArgs {
    fn evaluate(&self, input: &Value, context: &ChainContext) -> Result<Value, EngineError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Template(template) => template(input, context),
        }
    }
}

/// One step of a chain.
#[derive(Clone)]
pub struct ChainStep {
    /// Step id, unique within the chain.
    pub id: String,
    /// Tool the step dispatches.
    pub tool: String,
    /// Argument source.
    pub args: StepArgs,
    /// Whether a failure aborts the chain (with rollback).
    pub required: bool,
    /// Optional guard; a false result skips the step.
    pub condition: Option<StepCondition>,
}

/// One compensation entry, evaluated in reverse declaration order.
#[derive(Clone)]
pub struct RollbackStep {
    /// Tool the compensation dispatches.
    pub tool: String,
    /// Builds the compensation arguments; `None` skips it.
    pub args: RollbackArgs,
    /// Optional guard; a false result skips the compensation.
    pub condition: Option<StepCondition>,
}

/// A named chain definition. Immutable after catalog construction.
#[derive(Clone)]
pub struct ChainDefinition {
    /// Chain name as invoked by callers.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Minimum role (by rank) allowed to run the chain.
    pub required_role: Role,
    /// Policy family the chain belongs to, for display and audit grouping.
    pub policy_name: String,
    /// Static steps; empty for dynamic chains.
    pub steps: Vec<ChainStep>,
    /// Compensations, declared forward, executed in reverse.
    pub rollback: Vec<RollbackStep>,
    /// Whether steps come from the generator instead of `steps`.
    pub dynamic: bool,
    /// Step generator for dynamic chains.
    pub generator: Option<StepGenerator>,
}

/// Append-only per-invocation map of step id → dispatch result.
#[derive(Default)]
pub struct ChainContext {
    entries: BTreeMap<String, DispatchResult>,
}

impl ChainContext {
    fn insert(&mut self, id: &str, result: DispatchResult) {
        self.entries.insert(id.to_owned(), result);
    }

    /// The raw result of a prior step.
    pub fn get(&self, id: &str) -> Option<&DispatchResult> {
        self.entries.get(id)
    }

    /// The `Ok` payload of a prior step, when it succeeded.
    pub fn ok_value(&self, id: &str) -> Option<&Value> {
        match self.entries.get(id) {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// Whether a prior step ran and succeeded.
    pub fn succeeded(&self, id: &str) -> bool {
        matches!(self.entries.get(id), Some(Ok(_)))
    }

    /// Walk into a prior step's `Ok` payload by object keys.
    pub fn value_at(&self, id: &str, path: &[&str]) -> Option<&Value> {
        let mut current = self.ok_value(id)?;
        for key in path {
            current = current.get(key)?;
        }
        Some(current)
    }

    /// Export the context for callers: `{"ok": value}` or `{"error": {...}}`
    /// per step.
    pub fn to_json(&self) -> Value {
        let map = self
            .entries
            .iter()
            .map(|(id, result)| {
                let rendered = match result {
                    Ok(value) => serde_json::json!({ "ok": value }),
                    Err(e) => serde_json::json!({ "error": e.to_json() }),
                };
                (id.clone(), rendered)
            })
            .collect();
        Value::Object(map)
    }

    /// Only the successful step payloads, keyed by step id.
    pub fn ok_results(&self) -> Value {
        let map = self
            .entries
            .iter()
            .filter_map(|(id, result)| match result {
                Ok(value) => Some((id.clone(), value.clone())),
                Err(_) => None,
            })
            .collect();
        Value::Object(map)
    }
}

/// Status of one execution-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step dispatched and returned `Ok`.
    Completed,
    /// The step's condition evaluated false.
    Skipped,
    /// The step failed (dispatch error or argument generation error).
    Error,
}

/// One entry of a chain's execution log.
#[derive(Debug, Clone, Serialize)]
pub struct StepLogEntry {
    /// Step id (rollback entries are prefixed with `rollback:`).
    pub id: String,
    /// Tool the entry refers to.
    pub tool: String,
    /// Arguments the step dispatched with, when it got that far.
    pub args: Option<Value>,
    /// Outcome of the entry.
    pub status: StepStatus,
    /// Dispatch wall-clock time, when the step dispatched.
    pub execution_time_ms: Option<u64>,
    /// Entry creation time.
    pub timestamp: DateTime<Utc>,
    /// Error rendering for failed entries.
    pub error: Option<String>,
    /// Skip reason for skipped entries.
    pub reason: Option<String>,
}

impl StepLogEntry {
    fn skipped(step: &ChainStep) -> Self {
        Self {
            id: step.id.clone(),
            tool: step.tool.clone(),
            args: None,
            status: StepStatus::Skipped,
            execution_time_ms: None,
            timestamp: Utc::now(),
            error: None,
            reason: Some("condition_not_met".to_owned()),
        }
    }
}

/// A completed chain invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ChainRun {
    /// The chain that ran.
    pub chain_name: String,
    /// The input the caller supplied.
    pub input: Value,
    /// Full context export (every step's result).
    pub context: Value,
    /// Successful step payloads keyed by step id.
    pub results: Value,
    /// Ordered log of every step and compensation.
    pub execution_log: Vec<StepLogEntry>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// A failed chain invocation with its full diagnostic state.
#[derive(Debug, Clone, Serialize)]
pub struct ChainFailure {
    /// The failure, as an engine error (`ChainStepFailed`,
    /// `ChainValidationError`, or `EmptyChain`).
    #[serde(serialize_with = "serialize_error")]
    pub error: EngineError,
    /// The required step that failed, when one did.
    pub failed_step: Option<String>,
    /// The failing step's underlying error.
    #[serde(serialize_with = "serialize_opt_error")]
    pub step_error: Option<Box<EngineError>>,
    /// Context export at failure time.
    pub context: Value,
    /// Successful step payloads at failure time.
    pub results: Value,
    /// Ordered log up to and including the failure and any compensation.
    pub execution_log: Vec<StepLogEntry>,
    /// Whether the rollback procedure ran.
    pub rolled_back: bool,
}

fn serialize_error<S: serde::Serializer>(e: &EngineError, s: S) -> Result<S::Ok, S::Error> {
    e.to_json().serialize(s)
}

fn serialize_opt_error<S: serde::Serializer>(
    e: &Option<Box<EngineError>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    e.as_ref().map(|e| e.to_json()).serialize(s)
}

/// Runs chains by dispatching each step through the engine.
pub struct ChainExecutor {
    engine: Arc<Engine>,
    catalog: ChainCatalog,
}

impl ChainExecutor {
    /// Build an executor over an engine and a chain catalog.
    pub fn new(engine: Arc<Engine>, catalog: ChainCatalog) -> Self {
        Self { engine, catalog }
    }

    /// Build an executor with the built-in catalog.
    pub fn with_builtin(engine: Arc<Engine>) -> Self {
        Self::new(engine, ChainCatalog::builtin())
    }

    /// Names of every registered chain, ordered.
    pub fn list_chains(&self) -> Vec<&str> {
        self.catalog.names()
    }

    /// Look up a chain definition.
    pub fn chain(&self, name: &str) -> Option<&ChainDefinition> {
        self.catalog.get(name)
    }

    /// Execute a named chain.
    pub async fn execute_chain(
        &self,
        chain_name: &str,
        input: &Value,
        tenant: &TenantRecord,
        user_id: Option<&str>,
        token: &AccessToken,
    ) -> Result<ChainRun, Box<ChainFailure>> {
        let Some(definition) = self.catalog.get(chain_name) else {
            return Err(validation_failure(
                chain_name,
                vec![format!("unknown chain '{chain_name}'")],
            ));
        };

        let steps = self.resolve_steps(definition, input)?;
        self.validate(definition, &steps, token)?;

        info!(chain = chain_name, steps = steps.len(), "executing chain");

        let mut context = ChainContext::default();
        let mut log: Vec<StepLogEntry> = Vec::new();

        for step in &steps {
            if let Some(condition) = &step.condition {
                if !condition(&context) {
                    log.push(StepLogEntry::skipped(step));
                    continue;
                }
            }

            let args = match step.args.evaluate(input, &context) {
                Ok(args) => args,
                Err(cause) => {
                    let error = EngineError::ArgumentGeneration {
                        step: step.id.clone(),
                        message: cause.to_string(),
                    };
                    log.push(StepLogEntry {
                        id: step.id.clone(),
                        tool: step.tool.clone(),
                        args: None,
                        status: StepStatus::Error,
                        execution_time_ms: None,
                        timestamp: Utc::now(),
                        error: Some(error.to_string()),
                        reason: None,
                    });
                    if step.required {
                        self.run_rollback(definition, &context, tenant, user_id, token, &mut log)
                            .await;
                        return Err(step_failure(definition, step, error, &context, log));
                    }
                    context.insert(&step.id, Err(error));
                    continue;
                }
            };

            let started = Instant::now();
            let result = self
                .engine
                .execute(&step.tool, &args, tenant, user_id, token)
                .await;
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            log.push(StepLogEntry {
                id: step.id.clone(),
                tool: step.tool.clone(),
                args: Some(args),
                status: if result.is_ok() {
                    StepStatus::Completed
                } else {
                    StepStatus::Error
                },
                execution_time_ms: Some(elapsed),
                timestamp: Utc::now(),
                error: result.as_ref().err().map(ToString::to_string),
                reason: None,
            });

            match result {
                Err(error) if step.required => {
                    context.insert(&step.id, Err(error.clone()));
                    self.run_rollback(definition, &context, tenant, user_id, token, &mut log)
                        .await;
                    return Err(step_failure(definition, step, error, &context, log));
                }
                other => context.insert(&step.id, other),
            }
        }

        Ok(ChainRun {
            chain_name: definition.name.clone(),
            input: input.clone(),
            context: context.to_json(),
            results: context.ok_results(),
            execution_log: log,
            completed_at: Utc::now(),
        })
    }

    /// Resolve the step list, running the generator for dynamic chains.
    fn resolve_steps(
        &self,
        definition: &ChainDefinition,
        input: &Value,
    ) -> Result<Vec<ChainStep>, Box<ChainFailure>> {
        if !definition.dynamic {
            return Ok(definition.steps.clone());
        }
        let Some(generator) = &definition.generator else {
            return Err(validation_failure(
                &definition.name,
                vec!["dynamic chain has no step generator".to_owned()],
            ));
        };
        let steps = generator(input).map_err(|e| {
            validation_failure(
                &definition.name,
                vec![format!("step generation failed: {e}")],
            )
        })?;
        if steps.is_empty() {
            return Err(Box::new(ChainFailure {
                error: EngineError::EmptyChain {
                    chain: definition.name.clone(),
                },
                failed_step: None,
                step_error: None,
                context: Value::Object(Default::default()),
                results: Value::Object(Default::default()),
                execution_log: Vec::new(),
                rolled_back: false,
            }));
        }
        Ok(steps)
    }

    /// Pre-flight validation; collects every concrete reason before failing.
    fn validate(
        &self,
        definition: &ChainDefinition,
        steps: &[ChainStep],
        token: &AccessToken,
    ) -> Result<(), Box<ChainFailure>> {
        let mut reasons = Vec::new();

        if steps.is_empty() {
            reasons.push("chain has no steps".to_owned());
        }
        if token.user_role.rank() < definition.required_role.rank() {
            reasons.push(format!(
                "role '{}' is below the chain's required role '{}'",
                token.user_role, definition.required_role
            ));
        }
        for step in steps {
            if !self.engine.registry().contains(&step.tool) {
                reasons.push(format!(
                    "step '{}' references unknown tool '{}'",
                    step.id, step.tool
                ));
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(validation_failure(&definition.name, reasons))
        }
    }

    /// Reverse-order best-effort compensation. Failures are logged entries,
    /// never promoted.
    async fn run_rollback(
        &self,
        definition: &ChainDefinition,
        context: &ChainContext,
        tenant: &TenantRecord,
        user_id: Option<&str>,
        token: &AccessToken,
        log: &mut Vec<StepLogEntry>,
    ) {
        for step in definition.rollback.iter().rev() {
            let applies = step.condition.as_ref().is_none_or(|c| c(context));
            if !applies {
                continue;
            }
            let Some(args) = (step.args)(context) else {
                continue;
            };

            let started = Instant::now();
            let result = self
                .engine
                .execute(&step.tool, &args, tenant, user_id, token)
                .await;
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            if let Err(e) = &result {
                warn!(
                    chain = %definition.name,
                    tool = %step.tool,
                    error = %e,
                    "rollback compensation failed"
                );
            }

            log.push(StepLogEntry {
                id: format!("rollback:{}", step.tool),
                tool: step.tool.clone(),
                args: Some(args),
                status: if result.is_ok() {
                    StepStatus::Completed
                } else {
                    StepStatus::Error
                },
                execution_time_ms: Some(elapsed),
                timestamp: Utc::now(),
                error: result.err().map(|e| e.to_string()),
                reason: None,
            });
        }
    }
}

fn validation_failure(chain: &str, reasons: Vec<String>) -> Box<ChainFailure> {
    Box::new(ChainFailure {
        error: EngineError::ChainValidation {
            chain: chain.to_owned(),
            reasons,
        },
        failed_step: None,
        step_error: None,
        context: Value::Object(Default::default()),
        results: Value::Object(Default::default()),
        execution_log: Vec::new(),
        rolled_back: false,
    })
}

fn step_failure(
    definition: &ChainDefinition,
    step: &ChainStep,
    error: EngineError,
    context: &ChainContext,
    log: Vec<StepLogEntry>,
) -> Box<ChainFailure> {
    Box::new(ChainFailure {
        error: EngineError::ChainStepFailed {
            chain: definition.name.clone(),
            step: step.id.clone(),
            message: error.to_string(),
        },
        failed_step: Some(step.id.clone()),
        step_error: Some(Box::new(error)),
        context: context.to_json(),
        results: context.ok_results(),
        execution_log: log,
        rolled_back: true,
    })
}
