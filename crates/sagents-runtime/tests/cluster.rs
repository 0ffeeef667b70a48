//! Clustered-mode tests: replicated ownership and node transfer.

use std::sync::Arc;
use std::time::Duration;

use sagents_contract::agent::AgentConfig;
use sagents_contract::event::AgentEvent;
use sagents_contract::message::Message;
use sagents_contract::status::Status;
use sagents_contract::testing::{ScriptedChatModel, ScriptedTurn};
use sagents_runtime::{
    ClusterTransport, InProcessCluster, MemoryAgentPersistence, RuntimeConfig, Sagents,
    WorkerOptions,
};
use tokio::time::timeout;

fn agent_config(id: &str, reply: Option<&str>) -> AgentConfig {
    let model = ScriptedChatModel::new("mock");
    if let Some(reply) = reply {
        model.push_turn(ScriptedTurn::text(reply));
    }
    AgentConfig::builder(id, Arc::new(model)).build().unwrap()
}

#[tokio::test]
async fn start_is_idempotent_across_nodes() {
    let cluster = InProcessCluster::new();
    let sagents1 = Sagents::new(RuntimeConfig::clustered(cluster.join("node1"))).unwrap();
    let sagents2 = Sagents::new(RuntimeConfig::clustered(cluster.join("node2"))).unwrap();

    let first = sagents1
        .start_agent(agent_config("shared-1", None), WorkerOptions::default())
        .await
        .unwrap();
    assert!(!first.already_started());

    // Give the claim a moment to replicate, then start on the other node.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = sagents2
        .start_agent(agent_config("shared-1", None), WorkerOptions::default())
        .await
        .unwrap();
    assert!(second.already_started());
    assert_eq!(sagents2.count_agents(), 1);
}

#[tokio::test]
async fn node_departure_transfers_agent_to_survivor() {
    let cluster = InProcessCluster::new();
    let node1 = cluster.join("node1");
    let node1_id = node1.node_id();
    let sagents1 = Sagents::new(RuntimeConfig::clustered(node1)).unwrap();
    let sagents2 = Sagents::new(RuntimeConfig::clustered(cluster.join("node2"))).unwrap();

    // Shared persistence stands in for the durable store both nodes reach.
    let persistence = Arc::new(MemoryAgentPersistence::new());

    let handle = sagents1
        .start_agent(
            agent_config("roaming-1", Some("hello from node1")),
            WorkerOptions {
                persistence: Some(persistence.clone()),
                ..WorkerOptions::default()
            },
        )
        .await
        .unwrap()
        .into_handle();

    // One completed turn so a snapshot lands in the store.
    let mut rx = handle.subscribe();
    handle.add_message(Message::user("hi")).unwrap();
    timeout(Duration::from_secs(5), async {
        loop {
            let envelope = rx.recv().await.expect("event stream open");
            if matches!(
                envelope.event(),
                Some(AgentEvent::StatusChanged {
                    new_status: Status::Idle,
                    ..
                })
            ) {
                break;
            }
        }
    })
    .await
    .expect("first turn completes");

    // Node1 drops out of the cluster.
    cluster.leave(&node1_id);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The survivor adopts the orphan, restoring from persistence.
    let mut transfer_rx = sagents2.subscribe("roaming-1");
    let store = persistence.clone();
    let recovered = sagents2
        .recover_orphans(|agent_id| {
            Some((
                agent_config(agent_id, None),
                WorkerOptions {
                    persistence: Some(store.clone()),
                    ..WorkerOptions::default()
                },
            ))
        })
        .await;
    assert_eq!(recovered, vec!["roaming-1".to_string()]);

    let mut saw_transferring = false;
    let mut saw_transferred = false;
    timeout(Duration::from_secs(2), async {
        while !(saw_transferring && saw_transferred) {
            let envelope = transfer_rx.recv().await.expect("event stream open");
            match envelope.event() {
                Some(AgentEvent::NodeTransferring { .. }) => saw_transferring = true,
                Some(AgentEvent::NodeTransferred { .. }) => saw_transferred = true,
                _ => {}
            }
        }
    })
    .await
    .expect("transfer events observed");

    let info = sagents2.agent_info("roaming-1").await.unwrap();
    assert_eq!(info.status, Status::Idle);
    let state = sagents2.get_state("roaming-1").await.unwrap();
    assert_eq!(state.messages.len(), 2, "conversation survived the move");
}

#[tokio::test]
async fn recover_orphans_is_a_noop_on_local_runtimes() {
    let sagents = Sagents::local();
    let recovered = sagents
        .recover_orphans(|_| -> Option<(AgentConfig, WorkerOptions)> { None })
        .await;
    assert!(recovered.is_empty());
}
