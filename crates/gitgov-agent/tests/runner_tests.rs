// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent runner tests: engine dispatch, execution records, and events.

use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use gitgov_agent::{
    AgentError, AgentRunner, InvokeRequest, NativeRuntime, RunStatus, RuntimeHandlerRegistry,
};
use gitgov_bus::{EventBus, GovEvent};
use gitgov_record::{
    AgentEngine, AgentRecord, ExecutionRecord, ExecutionType, Signer, seal,
};
use gitgov_store::{FsRecordStore, RecordStore};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    agents: Arc<FsRecordStore>,
    executions: Arc<FsRecordStore>,
    signer: Arc<Signer>,
    bus: EventBus,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let agents = Arc::new(FsRecordStore::new(dir.path().join("agents")));
        let executions = Arc::new(FsRecordStore::new(dir.path().join("executions")));
        let signer = Arc::new(Signer::new(
            "agent:runner",
            SigningKey::generate(&mut OsRng),
        ));
        Self {
            _dir: dir,
            agents,
            executions,
            signer,
            bus: EventBus::new(),
        }
    }

    async fn store_agent(&self, engine: AgentEngine) -> String {
        let agent = AgentRecord {
            id: "1700000000-agent-review".into(),
            engine,
            triggers: vec![],
            knowledge_dependencies: vec![],
            prompt_engine_requirements: BTreeMap::new(),
        };
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let wrapper = seal(&agent, &self.signer, now).unwrap();
        self.agents.put(&agent.id, &wrapper).await.unwrap();
        agent.id
    }

    fn runner(&self, registry: RuntimeHandlerRegistry) -> AgentRunner {
        AgentRunner::new(
            Arc::clone(&self.agents) as Arc<dyn RecordStore>,
            Arc::clone(&self.executions) as Arc<dyn RecordStore>,
            registry,
            Arc::clone(&self.signer),
        )
        .with_bus(self.bus.clone())
    }

    async fn stored_execution(&self, id: &str) -> ExecutionRecord {
        let wrapper = self.executions.get(id).await.unwrap().unwrap();
        wrapper.decode_payload().unwrap()
    }
}

fn request(agent_id: &str) -> InvokeRequest {
    InvokeRequest {
        agent_id: agent_id.into(),
        task_id: "1700000000-task-demo".into(),
        actor_id: None,
        input: Some(serde_json::json!({"question": "status?"})),
    }
}

#[tokio::test]
async fn missing_agent_is_an_error() {
    let fx = Fixture::new();
    let runner = fx.runner(RuntimeHandlerRegistry::default());
    let err = runner
        .invoke(&request("1700000000-agent-ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::AgentNotFound { .. }));
}

#[tokio::test]
async fn local_run_completes_and_records_execution() {
    let fx = Fixture::new();
    let agent_id = fx
        .store_agent(AgentEngine::Local {
            runtime: Some("native".into()),
            entrypoint: None,
            function: Some("review".into()),
        })
        .await;

    let mut native = NativeRuntime::new();
    native.register("review", |ctx| {
        Ok(serde_json::json!({
            "summary": "looks good",
            "echo": ctx.input,
        }))
    });
    let runner = fx.runner(RuntimeHandlerRegistry::with_native(native));
    let mut sub = fx.bus.subscribe();

    let response = runner.invoke(&request(&agent_id)).await.unwrap();
    assert_eq!(response.status, RunStatus::Completed);
    assert_eq!(response.agent_id, agent_id);
    assert!(response.error.is_none());
    assert_eq!(response.output.as_ref().unwrap()["summary"], "looks good");

    // The execution record is a completion carrying run metadata, and the
    // actor fell back to the agent's own ID.
    let execution_id = response.execution_record_id.unwrap();
    let execution = fx.stored_execution(&execution_id).await;
    assert_eq!(execution.execution_type, ExecutionType::Completion);
    assert_eq!(execution.task_id, "1700000000-task-demo");
    let metadata = execution.metadata.unwrap();
    assert_eq!(metadata["runId"], serde_json::json!(response.run_id));
    assert_eq!(metadata["agentId"], serde_json::json!(agent_id));

    // Lifecycle events: started then completed.
    assert!(matches!(
        sub.try_recv(),
        Some(GovEvent::AgentStarted { .. })
    ));
    assert!(matches!(
        sub.try_recv(),
        Some(GovEvent::AgentCompleted { .. })
    ));
}

#[tokio::test]
async fn unexported_function_fails_the_run() {
    let fx = Fixture::new();
    let agent_id = fx
        .store_agent(AgentEngine::Local {
            runtime: Some("native".into()),
            entrypoint: None,
            function: Some("missing".into()),
        })
        .await;

    let runner = fx.runner(RuntimeHandlerRegistry::with_native(NativeRuntime::new()));
    let response = runner.invoke(&request(&agent_id)).await.unwrap();

    assert_eq!(response.status, RunStatus::Failed);
    assert!(response.error.unwrap().contains("function not exported"));

    // Failures are recorded as blockers.
    let execution = fx
        .stored_execution(&response.execution_record_id.unwrap())
        .await;
    assert_eq!(execution.execution_type, ExecutionType::Blocker);
}

#[tokio::test]
async fn local_engine_without_entrypoint_or_runtime_fails() {
    let fx = Fixture::new();
    let agent_id = fx
        .store_agent(AgentEngine::Local {
            runtime: None,
            entrypoint: None,
            function: None,
        })
        .await;

    let runner = fx.runner(RuntimeHandlerRegistry::default());
    let response = runner.invoke(&request(&agent_id)).await.unwrap();
    assert_eq!(response.status, RunStatus::Failed);
    assert!(response.error.unwrap().contains("local engine misconfigured"));
}

#[tokio::test]
async fn default_function_name_is_run_agent() {
    let fx = Fixture::new();
    let agent_id = fx
        .store_agent(AgentEngine::Local {
            runtime: Some("native".into()),
            entrypoint: None,
            function: None,
        })
        .await;

    let mut native = NativeRuntime::new();
    native.register("runAgent", |_ctx| Ok(serde_json::json!("ran")));
    let runner = fx.runner(RuntimeHandlerRegistry::with_native(native));

    let response = runner.invoke(&request(&agent_id)).await.unwrap();
    assert_eq!(response.status, RunStatus::Completed);
}

#[tokio::test]
async fn api_engine_without_client_is_a_missing_dependency() {
    let fx = Fixture::new();
    let agent_id = fx
        .store_agent(AgentEngine::Api {
            url: "https://agents.example/run".into(),
            auth: Some("actor-signature".into()),
        })
        .await;

    let runner = fx.runner(RuntimeHandlerRegistry::default());
    let response = runner.invoke(&request(&agent_id)).await.unwrap();
    assert_eq!(response.status, RunStatus::Failed);
    assert!(response.error.unwrap().contains("missing dependency"));
}

#[tokio::test]
async fn mcp_engine_is_unsupported() {
    let fx = Fixture::new();
    let agent_id = fx
        .store_agent(AgentEngine::Mcp {
            settings: BTreeMap::new(),
        })
        .await;

    let runner = fx.runner(RuntimeHandlerRegistry::default());
    let mut sub = fx.bus.subscribe();
    let response = runner.invoke(&request(&agent_id)).await.unwrap();

    assert_eq!(response.status, RunStatus::Failed);
    assert!(response.error.unwrap().contains("unsupported engine type"));
    assert!(matches!(
        sub.try_recv(),
        Some(GovEvent::AgentStarted { .. })
    ));
    assert!(matches!(sub.try_recv(), Some(GovEvent::AgentError { .. })));
}

#[tokio::test]
async fn caller_actor_id_overrides_agent_fallback() {
    let fx = Fixture::new();
    let agent_id = fx
        .store_agent(AgentEngine::Local {
            runtime: Some("native".into()),
            entrypoint: None,
            function: Some("whoami".into()),
        })
        .await;

    let mut native = NativeRuntime::new();
    native.register("whoami", |ctx| Ok(serde_json::json!(ctx.actor_id)));
    let runner = fx.runner(RuntimeHandlerRegistry::with_native(native));

    let mut req = request(&agent_id);
    req.actor_id = Some("human:alice".into());
    let response = runner.invoke(&req).await.unwrap();
    assert_eq!(response.output.unwrap(), serde_json::json!("human:alice"));

    let req = request(&agent_id);
    let response = runner.invoke(&req).await.unwrap();
    assert_eq!(response.output.unwrap(), serde_json::json!(agent_id));
}
