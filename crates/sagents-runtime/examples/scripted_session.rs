//! Drive one agent through a HITL pause with a scripted model.
//!
//! ```sh
//! cargo run -p sagents-runtime --example scripted_session
//! ```

use std::sync::Arc;

use sagents_contract::message::ToolCall;
use sagents_contract::testing::{ScriptedChatModel, ScriptedTurn, StaticTool};
use sagents_middleware_hitl::HumanInTheLoop;
use sagents_runtime::prelude::*;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sagents = Sagents::local();

    let model = Arc::new(
        ScriptedChatModel::new("scripted")
            .with_turn(ScriptedTurn::tool_calls(
                "",
                vec![ToolCall::new(
                    "call_1",
                    "write_file",
                    json!({"path": "hello.txt", "content": "hi"}),
                )],
            ))
            .with_turn(ScriptedTurn::text("Wrote hello.txt for you.")),
    );

    let config = AgentConfig::builder("demo-1", model)
        .base_system_prompt("You are a careful assistant.")
        .tool(Arc::new(StaticTool::new("write_file", "file written")))
        .middleware(HumanInTheLoop::interrupt_on(["write_file"]))
        .build()?;

    let agent = sagents
        .start_agent(config, WorkerOptions::default())
        .await?
        .into_handle();
    let mut events = agent.subscribe();

    agent.add_message(Message::user("write hello.txt"))?;

    while let Ok(envelope) = events.recv().await {
        let Some(event) = envelope.event() else {
            continue;
        };
        println!("[{}] {}", envelope.agent, event.kind());
        match event {
            AgentEvent::StatusChanged {
                new_status: Status::Interrupted,
                ..
            } => {
                println!("  -> approving the held tool call");
                agent.resume(vec![Decision::Approve]).await?;
            }
            AgentEvent::StatusChanged {
                new_status: Status::Idle,
                ..
            } => break,
            _ => {}
        }
    }

    let state = agent.get_state().await?;
    println!(
        "final reply: {}",
        state
            .last_assistant_message()
            .map(|m| m.content.as_str())
            .unwrap_or("<none>")
    );
    Ok(())
}
