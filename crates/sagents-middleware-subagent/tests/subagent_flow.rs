//! End-to-end sub-agent delegation: completion and interrupt lifting.

use std::sync::Arc;
use std::time::Duration;

use sagents_contract::agent::AgentConfig;
use sagents_contract::event::{AgentEvent, EventEnvelope};
use sagents_contract::interrupt::{Decision, Interrupt};
use sagents_contract::message::{Message, Role, ToolCall};
use sagents_contract::status::Status;
use sagents_contract::testing::{ScriptedChatModel, ScriptedTurn, StaticTool};
use sagents_middleware_hitl::HumanInTheLoop;
use sagents_middleware_subagent::{SubAgentMiddleware, SubAgentSpec};
use sagents_runtime::{Sagents, WorkerOptions};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

async fn wait_for_status(rx: &mut broadcast::Receiver<EventEnvelope>, target: Status) {
    timeout(Duration::from_secs(10), async {
        loop {
            let envelope = rx.recv().await.expect("event stream open");
            if matches!(
                envelope.event(),
                Some(AgentEvent::StatusChanged { new_status, .. }) if *new_status == target
            ) {
                break;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target}"));
}

/// A child that answers without tools in one turn.
fn plain_spec(subagent_type: &str, reply: &str) -> SubAgentSpec {
    let model = Arc::new(ScriptedChatModel::new("child-model").with_turn(ScriptedTurn::text(reply)));
    SubAgentSpec::new(subagent_type)
        .description("answers directly")
        .base_system_prompt("Answer concisely.")
        .chat_model(model)
}

/// A child that calls an approval-gated tool, then summarizes.
fn gated_spec(subagent_type: &str, summary: &str) -> SubAgentSpec {
    let model = Arc::new(
        ScriptedChatModel::new("child-model")
            .with_turn(ScriptedTurn::tool_calls(
                "",
                vec![ToolCall::new(
                    format!("{subagent_type}-c1"),
                    "write_file",
                    json!({"path": format!("{subagent_type}.txt")}),
                )],
            ))
            .with_turn(ScriptedTurn::text(summary)),
    );
    SubAgentSpec::new(subagent_type)
        .base_system_prompt("Do the work.")
        .tool(Arc::new(StaticTool::new("write_file", "file written")))
        .middleware(HumanInTheLoop::interrupt_on(["write_file"]))
        .chat_model(model)
}

#[tokio::test]
async fn delegation_returns_child_answer_and_stops_the_child() {
    let sagents = Sagents::local();
    let parent_model = Arc::new(
        ScriptedChatModel::new("parent-model")
            .with_turn(ScriptedTurn::tool_calls(
                "",
                vec![ToolCall::new(
                    "c1",
                    "task",
                    json!({"subagent_type": "researcher", "prompt": "find rust history"}),
                )],
            ))
            .with_turn(ScriptedTurn::text("research complete")),
    );
    let middleware = SubAgentMiddleware::new(
        sagents.clone(),
        parent_model.clone(),
        [plain_spec("researcher", "Rust began at Mozilla.")],
    );
    let config = AgentConfig::builder("parent-1", parent_model)
        .middleware(middleware.entry())
        .build()
        .unwrap();

    let handle = sagents
        .start_agent(config, WorkerOptions::default())
        .await
        .unwrap()
        .into_handle();
    let mut rx = handle.subscribe();

    handle.add_message(Message::user("delegate")).unwrap();
    wait_for_status(&mut rx, Status::Idle).await;

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.messages.len(), 4);
    assert_eq!(state.messages[2].role, Role::Tool);
    assert_eq!(
        state.messages[2].results()[0].content,
        "Rust began at Mozilla."
    );

    // The finished child was stopped and deregistered.
    timeout(Duration::from_secs(2), async {
        while sagents.count_agents() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("child stopped");
}

#[tokio::test]
async fn parallel_child_interrupts_resume_in_fifo_order() {
    let sagents = Sagents::local();
    let parent_model = Arc::new(
        ScriptedChatModel::new("parent-model")
            .with_turn(ScriptedTurn::tool_calls(
                "",
                vec![
                    ToolCall::new(
                        "c1",
                        "task",
                        json!({"subagent_type": "researcher", "prompt": "research"}),
                    ),
                    ToolCall::new(
                        "c2",
                        "task",
                        json!({"subagent_type": "coder", "prompt": "code"}),
                    ),
                ],
            ))
            .with_turn(ScriptedTurn::text("all delegated work done")),
    );
    let middleware = SubAgentMiddleware::new(
        sagents.clone(),
        parent_model.clone(),
        [
            gated_spec("researcher", "research written"),
            gated_spec("coder", "code written"),
        ],
    );
    let config = AgentConfig::builder("parent-2", parent_model)
        .middleware(middleware.entry())
        .build()
        .unwrap();

    let handle = sagents
        .start_agent(config, WorkerOptions::default())
        .await
        .unwrap()
        .into_handle();
    let mut rx = handle.subscribe();

    handle.add_message(Message::user("delegate both")).unwrap();
    wait_for_status(&mut rx, Status::Interrupted).await;

    let state = handle.get_state().await.unwrap();
    {
        let record = state.interrupt_data.as_ref().expect("interrupt record");
        let Interrupt::SubAgent(ref signal) = record.current else {
            panic!("expected a sub-agent interrupt");
        };
        assert_eq!(signal.sub_agent_id, "sub-researcher");
        assert_eq!(signal.subagent_type, "researcher");
        assert_eq!(signal.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(record.pending_interrupts.len(), 1);
        // The child's own action requests are visible through the signal.
        assert_eq!(record.current.action_requests()[0].tool_name, "write_file");
    }

    handle.resume(vec![Decision::Approve]).await.unwrap();
    wait_for_status(&mut rx, Status::Interrupted).await;

    let state = handle.get_state().await.unwrap();
    {
        let record = state.interrupt_data.as_ref().expect("interrupt record");
        let Interrupt::SubAgent(ref signal) = record.current else {
            panic!("expected a sub-agent interrupt");
        };
        assert_eq!(signal.sub_agent_id, "sub-coder");
        assert!(record.pending_interrupts.is_empty());
    }

    handle.resume(vec![Decision::Approve]).await.unwrap();
    wait_for_status(&mut rx, Status::Idle).await;

    let state = handle.get_state().await.unwrap();
    assert!(state.interrupt_data.is_none());
    assert_eq!(state.messages.len(), 4);
    let results = state.messages[2].results();
    assert_eq!(results[0].content, "research written");
    assert_eq!(results[1].content, "code written");
    assert_eq!(
        state.messages[3].content,
        "all delegated work done"
    );
}

#[tokio::test]
async fn unknown_subagent_type_becomes_an_error_result() {
    let sagents = Sagents::local();
    let parent_model = Arc::new(
        ScriptedChatModel::new("parent-model")
            .with_turn(ScriptedTurn::tool_calls(
                "",
                vec![ToolCall::new(
                    "c1",
                    "task",
                    json!({"subagent_type": "ghost", "prompt": "boo"}),
                )],
            ))
            .with_turn(ScriptedTurn::text("understood")),
    );
    let middleware = SubAgentMiddleware::new(
        sagents.clone(),
        parent_model.clone(),
        [plain_spec("researcher", "unused")],
    );
    let config = AgentConfig::builder("parent-3", parent_model)
        .middleware(middleware.entry())
        .build()
        .unwrap();

    let handle = sagents
        .start_agent(config, WorkerOptions::default())
        .await
        .unwrap()
        .into_handle();
    let mut rx = handle.subscribe();

    handle.add_message(Message::user("summon a ghost")).unwrap();
    wait_for_status(&mut rx, Status::Idle).await;

    let state = handle.get_state().await.unwrap();
    let result = &state.messages[2].results()[0];
    assert!(result.is_error);
    assert!(result.content.contains("ghost"));
}
