// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-agent
//!
//! Invokes an agent defined by an [`AgentRecord`] and writes the outcome
//! back as an execution record. Engines dispatch through a
//! [`RuntimeHandlerRegistry`] — dynamic module loading has no place in a
//! compiled target, so "entrypoint + function" becomes a lookup in a
//! registry of pre-registered handlers. Once the agent record is loaded,
//! `invoke` never fails: every outcome is an [`AgentResponse`] and the
//! failure, if any, rides in its `status` and `error`.

use async_trait::async_trait;
use chrono::Utc;
use gitgov_bus::{EventBus, GovEvent};
use gitgov_record::{
    AgentEngine, AgentRecord, ExecutionRecord, ExecutionType, RecordType, Signer,
    generate_record_id, seal,
};
use gitgov_store::{RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from agent invocation.
///
/// Only [`AgentError::AgentNotFound`] and [`AgentError::Store`] escape
/// [`AgentRunner::invoke`]; every later failure is folded into the
/// response.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// No agent record exists under the requested ID.
    #[error("agent not found: {agent_id}")]
    AgentNotFound {
        /// The missing agent's ID.
        agent_id: String,
    },

    /// The engine type has no invocation path.
    #[error("unsupported engine type: {kind}")]
    UnsupportedEngineType {
        /// The engine's type tag.
        kind: String,
    },

    /// A local engine names a function its handler does not export.
    #[error("function not exported: {function}")]
    FunctionNotExported {
        /// The missing function.
        function: String,
    },

    /// A local engine is missing both `entrypoint` and `runtime`, or
    /// names an unregistered runtime.
    #[error("local engine misconfigured: {detail}")]
    LocalEngineConfigError {
        /// What is missing.
        detail: String,
    },

    /// A collaborator the engine needs is not wired in.
    #[error("missing dependency: {dependency}")]
    MissingDependency {
        /// Which collaborator.
        dependency: String,
    },

    /// The agent itself failed.
    #[error("agent failed: {detail}")]
    AgentFailed {
        /// Failure detail from the handler or API.
        detail: String,
    },

    /// Reading or writing records failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Execution context and handlers
// ---------------------------------------------------------------------------

/// What a handler receives for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// The agent being invoked.
    pub agent_id: String,
    /// The actor the run is attributed to (caller's, or the agent's own
    /// ID when the caller gave none).
    pub actor_id: String,
    /// The task the run is about.
    pub task_id: String,
    /// Unique run identifier (UUIDv4).
    pub run_id: String,
    /// Caller-supplied input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Executes local-engine runs for one named runtime.
#[async_trait]
pub trait RuntimeHandler: Send + Sync {
    /// Run `function` from `entrypoint` with the given context.
    ///
    /// # Errors
    ///
    /// [`AgentError::FunctionNotExported`] when the function is unknown,
    /// [`AgentError::AgentFailed`] when it runs and fails.
    async fn invoke(
        &self,
        entrypoint: Option<&str>,
        function: &str,
        context: &ExecutionContext,
    ) -> Result<Value, AgentError>;
}

/// Signature of a native agent function.
pub type AgentFn =
    Arc<dyn Fn(ExecutionContext) -> Result<Value, String> + Send + Sync + 'static>;

/// The default runtime: in-process functions registered by name.
///
/// Function keys are `entrypoint::function` when an entrypoint is given
/// at registration, plain `function` otherwise.
#[derive(Default, Clone)]
pub struct NativeRuntime {
    functions: BTreeMap<String, AgentFn>,
}

impl NativeRuntime {
    /// Empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `key`.
    pub fn register<F>(&mut self, key: impl Into<String>, function: F)
    where
        F: Fn(ExecutionContext) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(key.into(), Arc::new(function));
    }
}

#[async_trait]
impl RuntimeHandler for NativeRuntime {
    async fn invoke(
        &self,
        entrypoint: Option<&str>,
        function: &str,
        context: &ExecutionContext,
    ) -> Result<Value, AgentError> {
        let key = match entrypoint {
            Some(entrypoint) => format!("{entrypoint}::{function}"),
            None => function.to_string(),
        };
        let handler = self
            .functions
            .get(&key)
            .or_else(|| self.functions.get(function))
            .ok_or_else(|| AgentError::FunctionNotExported {
                function: key.clone(),
            })?;
        handler(context.clone()).map_err(|detail| AgentError::AgentFailed { detail })
    }
}

/// Named runtime handlers for local engines.
#[derive(Default, Clone)]
pub struct RuntimeHandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn RuntimeHandler>>,
}

/// The runtime name local engines get when they set none.
pub const DEFAULT_RUNTIME: &str = "native";

impl RuntimeHandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the given handler as the `native` default.
    #[must_use]
    pub fn with_native(runtime: NativeRuntime) -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_RUNTIME, Arc::new(runtime));
        registry
    }

    /// Register a handler under a runtime name.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn RuntimeHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Look up a handler by runtime name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn RuntimeHandler>> {
        self.handlers.get(name).cloned()
    }
}

/// Invokes API-engine agents over whatever transport the deployment
/// wires in.
#[async_trait]
pub trait ApiAgentClient: Send + Sync {
    /// Call the agent endpoint.
    ///
    /// # Errors
    ///
    /// [`AgentError::AgentFailed`] with transport or remote detail.
    async fn invoke(
        &self,
        url: &str,
        auth: Option<&str>,
        context: &ExecutionContext,
    ) -> Result<Value, AgentError>;
}

// ---------------------------------------------------------------------------
// Request and response
// ---------------------------------------------------------------------------

/// One agent invocation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// The agent to run.
    pub agent_id: String,
    /// The task the run is about.
    pub task_id: String,
    /// Actor to attribute the run to; defaults to the agent's ID.
    pub actor_id: Option<String>,
    /// Input handed to the agent.
    pub input: Option<Value>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The agent finished and returned output.
    Completed,
    /// The agent (or its plumbing) failed.
    Failed,
}

/// The outcome of one run. Returned for every invocation once the agent
/// record is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// Unique run identifier.
    pub run_id: String,
    /// The agent that ran.
    pub agent_id: String,
    /// Completed or failed.
    pub status: RunStatus,
    /// The execution record written for this run, when one could be
    /// persisted.
    pub execution_record_id: Option<String>,
    /// Agent output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix seconds when the run started.
    pub started_at: i64,
    /// Unix seconds when the run finished.
    pub completed_at: i64,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Loads agent definitions, dispatches engines, and records outcomes.
pub struct AgentRunner {
    agents: Arc<dyn RecordStore>,
    executions: Arc<dyn RecordStore>,
    registry: RuntimeHandlerRegistry,
    api_client: Option<Arc<dyn ApiAgentClient>>,
    signer: Arc<Signer>,
    bus: Option<EventBus>,
}

impl AgentRunner {
    /// Runner over the given stores, signing execution records as
    /// `signer`.
    #[must_use]
    pub fn new(
        agents: Arc<dyn RecordStore>,
        executions: Arc<dyn RecordStore>,
        registry: RuntimeHandlerRegistry,
        signer: Arc<Signer>,
    ) -> Self {
        Self {
            agents,
            executions,
            registry,
            api_client: None,
            signer,
            bus: None,
        }
    }

    /// Wire in an API transport for `api` engines.
    #[must_use]
    pub fn with_api_client(mut self, client: Arc<dyn ApiAgentClient>) -> Self {
        self.api_client = Some(client);
        self
    }

    /// Attach an event bus for run lifecycle events.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run an agent against a task.
    ///
    /// # Errors
    ///
    /// [`AgentError::AgentNotFound`] when the agent record is missing and
    /// [`AgentError::Store`] when the store itself fails. Everything
    /// after a successful load is reported inside the response.
    pub async fn invoke(&self, request: &InvokeRequest) -> Result<AgentResponse, AgentError> {
        let Some(wrapper) = self.agents.get(&request.agent_id).await? else {
            return Err(AgentError::AgentNotFound {
                agent_id: request.agent_id.clone(),
            });
        };
        let agent: AgentRecord = wrapper.decode_payload().map_err(StoreError::from)?;

        let run_id = Uuid::new_v4().to_string();
        let started = Utc::now();
        let context = ExecutionContext {
            agent_id: request.agent_id.clone(),
            actor_id: request
                .actor_id
                .clone()
                .unwrap_or_else(|| request.agent_id.clone()),
            task_id: request.task_id.clone(),
            run_id: run_id.clone(),
            input: request.input.clone(),
        };

        if let Some(bus) = &self.bus {
            bus.publish(GovEvent::AgentStarted {
                agent_id: request.agent_id.clone(),
                run_id: run_id.clone(),
            });
        }

        let outcome = self.dispatch(&agent, &context).await;
        let completed = Utc::now();
        let duration_ms = (completed - started).num_milliseconds().max(0) as u64;

        let (status, output, error) = match outcome {
            Ok(output) => (RunStatus::Completed, Some(output), None),
            Err(err) => (RunStatus::Failed, None, Some(err.to_string())),
        };

        let execution_record_id = match self
            .record_execution(&context, &agent, status, output.as_ref(), error.as_deref(), duration_ms)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(run_id, error = %err, "failed to write execution record");
                None
            }
        };

        if let Some(bus) = &self.bus {
            match status {
                RunStatus::Completed => bus.publish(GovEvent::AgentCompleted {
                    agent_id: request.agent_id.clone(),
                    run_id: run_id.clone(),
                    execution_record_id: execution_record_id.clone().unwrap_or_default(),
                }),
                RunStatus::Failed => bus.publish(GovEvent::AgentError {
                    agent_id: request.agent_id.clone(),
                    run_id: run_id.clone(),
                    error: error.clone().unwrap_or_default(),
                }),
            }
        }

        info!(
            agent = %request.agent_id,
            run_id,
            status = ?status,
            duration_ms,
            "agent run finished"
        );
        Ok(AgentResponse {
            run_id,
            agent_id: request.agent_id.clone(),
            status,
            execution_record_id,
            output,
            error,
            started_at: started.timestamp(),
            completed_at: completed.timestamp(),
            duration_ms,
        })
    }

    async fn dispatch(
        &self,
        agent: &AgentRecord,
        context: &ExecutionContext,
    ) -> Result<Value, AgentError> {
        match &agent.engine {
            AgentEngine::Local {
                runtime,
                entrypoint,
                function,
            } => {
                if runtime.is_none() && entrypoint.is_none() {
                    return Err(AgentError::LocalEngineConfigError {
                        detail: "neither entrypoint nor runtime is set".into(),
                    });
                }
                let runtime_name = runtime.as_deref().unwrap_or(DEFAULT_RUNTIME);
                let handler = self.registry.get(runtime_name).ok_or_else(|| {
                    AgentError::LocalEngineConfigError {
                        detail: format!("no handler registered for runtime {runtime_name}"),
                    }
                })?;
                let function = function.as_deref().unwrap_or("runAgent");
                handler
                    .invoke(entrypoint.as_deref(), function, context)
                    .await
            }
            AgentEngine::Api { url, auth } => {
                // The runner's signer is the identity adapter, so
                // `actor-signature` auth is always satisfiable here; the
                // dependency that can be missing is the transport.
                let client = self
                    .api_client
                    .as_ref()
                    .ok_or(AgentError::MissingDependency {
                        dependency: "api client".into(),
                    })?;
                client.invoke(url, auth.as_deref(), context).await
            }
            AgentEngine::Mcp { .. } => Err(AgentError::UnsupportedEngineType {
                kind: "mcp".into(),
            }),
        }
    }

    async fn record_execution(
        &self,
        context: &ExecutionContext,
        agent: &AgentRecord,
        status: RunStatus,
        output: Option<&Value>,
        error: Option<&str>,
        duration_ms: u64,
    ) -> Result<String, AgentError> {
        let now = Utc::now();
        let slug = format!("run-{}", &context.run_id[..8]);
        let id = generate_record_id(RecordType::Execution, &slug, now)
            .unwrap_or_else(|| format!("{}-exec-run", now.timestamp()));

        let mut metadata = serde_json::Map::new();
        metadata.insert("runId".into(), Value::String(context.run_id.clone()));
        metadata.insert("agentId".into(), Value::String(context.agent_id.clone()));
        metadata.insert(
            "engine".into(),
            serde_json::to_value(&agent.engine).unwrap_or(Value::Null),
        );
        metadata.insert("durationMs".into(), Value::from(duration_ms));
        if let Some(output) = output {
            metadata.insert("output".into(), output.clone());
        }
        if let Some(error) = error {
            metadata.insert("error".into(), Value::String(error.to_string()));
        }

        let (execution_type, result) = match status {
            RunStatus::Completed => (
                ExecutionType::Completion,
                format!("Agent {} completed run {}", context.agent_id, context.run_id),
            ),
            RunStatus::Failed => (
                ExecutionType::Blocker,
                format!(
                    "Agent {} failed: {}",
                    context.agent_id,
                    error.unwrap_or("unknown error")
                ),
            ),
        };

        let execution = ExecutionRecord {
            id: id.clone(),
            task_id: context.task_id.clone(),
            execution_type,
            title: format!("Agent run {}", context.run_id),
            result,
            notes: None,
            references: None,
            metadata: Some(metadata),
        };

        let wrapper = seal(&execution, &self.signer, now).map_err(StoreError::from)?;
        self.executions.put(&id, &wrapper).await?;
        Ok(id)
    }
}
