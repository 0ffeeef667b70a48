//! Model streaming: one logical chat call with delta/usage fan-out.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use sagents_contract::event::{AgentEvent, EventSink};
use sagents_contract::message::Message;
use sagents_contract::middleware::ModelCallbacks;
use sagents_contract::model::{ChatModel, ChatModelError, ChatRequest, ChatStreamEvent, TokenUsage};

use crate::cancel::{await_or_cancel, CancelAware, RunCancellationToken};

pub(crate) struct StreamOutcome {
    pub message: Message,
    pub usage: Option<TokenUsage>,
}

/// Drive one model attempt to completion, publishing deltas, identified
/// tool calls, and usage as they arrive. `announced` accumulates the call
/// ids already published so tool execution does not re-announce them.
pub(crate) async fn stream_turn(
    model: &dyn ChatModel,
    request: ChatRequest,
    events: &Arc<dyn EventSink>,
    callbacks: &[ModelCallbacks],
    announced: &mut HashSet<String>,
    token: &RunCancellationToken,
) -> Result<CancelAware<StreamOutcome>, ChatModelError> {
    let mut stream = match await_or_cancel(token, model.chat_stream(request)).await {
        CancelAware::Cancelled => return Ok(CancelAware::Cancelled),
        CancelAware::Value(result) => result?,
    };

    let mut usage_published = false;
    loop {
        let next = match await_or_cancel(token, stream.next()).await {
            CancelAware::Cancelled => return Ok(CancelAware::Cancelled),
            CancelAware::Value(next) => next,
        };
        let Some(event) = next else {
            return Err(ChatModelError::InvalidResponse(
                "stream ended without a completion event".to_string(),
            ));
        };
        match event? {
            ChatStreamEvent::TextDelta { delta } => {
                for cb in callbacks {
                    if let Some(ref on_delta) = cb.on_delta {
                        on_delta(&delta);
                    }
                }
                events.publish(AgentEvent::LlmDeltas {
                    deltas: vec![delta],
                });
            }
            ChatStreamEvent::ToolCallIdentified { call } => {
                if announced.insert(call.call_id.clone()) {
                    events.publish(AgentEvent::ToolCallIdentified {
                        tool: (&call).into(),
                    });
                }
            }
            ChatStreamEvent::Usage { usage } => {
                for cb in callbacks {
                    if let Some(ref on_usage) = cb.on_usage {
                        on_usage(&usage);
                    }
                }
                events.publish(AgentEvent::LlmTokenUsage { usage });
                usage_published = true;
            }
            ChatStreamEvent::Completed { message, usage } => {
                // Announce any calls the provider never surfaced mid-stream.
                for call in message.calls() {
                    if announced.insert(call.call_id.clone()) {
                        events.publish(AgentEvent::ToolCallIdentified { tool: call.into() });
                    }
                }
                if let Some(ref usage) = usage {
                    if !usage_published {
                        for cb in callbacks {
                            if let Some(ref on_usage) = cb.on_usage {
                                on_usage(usage);
                            }
                        }
                        events.publish(AgentEvent::LlmTokenUsage {
                            usage: usage.clone(),
                        });
                    }
                }
                for cb in callbacks {
                    if let Some(ref on_message) = cb.on_message {
                        on_message(&message);
                    }
                }
                return Ok(CancelAware::Value(StreamOutcome { message, usage }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagents_contract::message::ToolCall;
    use sagents_contract::testing::{CollectingSink, ScriptedChatModel, ScriptedTurn};
    use serde_json::json;

    #[tokio::test]
    async fn deltas_precede_usage_and_tool_calls_are_announced_once() {
        let model = ScriptedChatModel::new("mock").with_turn(ScriptedTurn::tool_calls(
            "checking",
            vec![ToolCall::new("c1", "search", json!({}))],
        ));
        let sink = CollectingSink::new();
        let events: Arc<dyn EventSink> = sink.clone();
        let mut announced = HashSet::new();
        let token = RunCancellationToken::new();

        let out = stream_turn(
            &model,
            ChatRequest::new("", vec![]),
            &events,
            &[],
            &mut announced,
            &token,
        )
        .await
        .unwrap();

        let CancelAware::Value(outcome) = out else {
            panic!("unexpected cancellation");
        };
        assert!(outcome.message.has_tool_calls());
        assert!(announced.contains("c1"));
        let identified = sink
            .kinds()
            .iter()
            .filter(|k| **k == "tool_call_identified")
            .count();
        assert_eq!(identified, 1);
    }

    #[tokio::test]
    async fn text_turn_publishes_deltas_and_single_usage() {
        let model = ScriptedChatModel::new("mock").with_turn(ScriptedTurn::text("hello there"));
        let sink = CollectingSink::new();
        let events: Arc<dyn EventSink> = sink.clone();
        let mut announced = HashSet::new();
        let token = RunCancellationToken::new();

        stream_turn(
            &model,
            ChatRequest::new("", vec![]),
            &events,
            &[],
            &mut announced,
            &token,
        )
        .await
        .unwrap();

        let kinds = sink.kinds();
        assert!(kinds.contains(&"llm_deltas"));
        assert_eq!(kinds.iter().filter(|k| **k == "llm_token_usage").count(), 1);
    }
}
