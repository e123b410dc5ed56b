//! Integration tests for the graph runtime: fan-out, merge joins, stop
//! semantics and run-scoped cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use agentflow::{
    create_event_channel, new_agent_vars, EventEmitter, EventReceiver, FakeIdGenerator, FnHandler,
    Graph, InMemoryVariableStore, MessageBroker, Node, NodeHandlerRegistry, NodeType,
    RuntimeConfig, RuntimeContext, RuntimeEvent, WorkflowRuntime, trigger,
};

fn build_runtime(
    graph: Graph,
    registry: NodeHandlerRegistry,
    store: Arc<InMemoryVariableStore>,
) -> (WorkflowRuntime, EventReceiver) {
    let (tx, rx) = create_event_channel();
    let context =
        RuntimeContext::default().with_id_generator(Arc::new(FakeIdGenerator::new("exec")));
    let runtime = WorkflowRuntime::new(
        Arc::new(graph),
        "agent-1",
        new_agent_vars(HashMap::new()),
        Arc::new(MessageBroker::new()),
        store,
        Arc::new(registry),
        Arc::new(context),
        &RuntimeConfig::default(),
    )
    .with_event_emitter(EventEmitter::new(tx));
    (runtime, rx)
}

async fn wait_for_cleanup(rx: &mut EventReceiver) -> Vec<RuntimeEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for execution cleanup")
            .expect("event channel closed");
        let done = matches!(event, RuntimeEvent::ExecutionCleaned { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

fn completed_node_ids(events: &[RuntimeEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::NodeCompleted { node_id, .. } => Some(node_id.clone()),
            _ => None,
        })
        .collect()
}

fn recording_handler(record: Arc<Mutex<Vec<Vec<Value>>>>) -> FnHandler {
    FnHandler::new(move |ctx| {
        let record = record.clone();
        Box::pin(async move {
            let parents = ctx.parent_outputs().await?;
            record.lock().push(parents);
            Ok(())
        })
    })
}

fn emitting_handler(key: &'static str, value: Value) -> FnHandler {
    FnHandler::new(move |ctx| {
        let value = value.clone();
        Box::pin(async move {
            ctx.write_output(key, value);
            Ok(())
        })
    })
}

#[tokio::test]
async fn test_diamond_merge_runs_join_node_exactly_once() {
    let record = Arc::new(Mutex::new(Vec::new()));
    let mut registry = NodeHandlerRegistry::new();
    registry.register("emit_b", Arc::new(emitting_handler("b", json!("from-b"))));
    registry.register("emit_c", Arc::new(emitting_handler("c", json!("from-c"))));
    registry.register("record", Arc::new(recording_handler(record.clone())));

    let graph = Graph::builder("wf", "diamond")
        .add_node(Node::trigger("init", "Init", trigger::INIT))
        .add_node(Node::new("a", "A", NodeType::Action))
        .add_node(Node::new("b", "B", NodeType::Action).with_handler("emit_b"))
        .add_node(Node::new("c", "C", NodeType::Action).with_handler("emit_c"))
        .add_node(Node::new("d", "D", NodeType::Action).with_handler("record"))
        .add_link("init", "a")
        .add_link("a", "b")
        .add_link("a", "c")
        .add_link("b", "d")
        .add_link("c", "d")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryVariableStore::new());
    let (runtime, mut rx) = build_runtime(graph, registry, store);
    runtime.execute_init();
    let events = wait_for_cleanup(&mut rx).await;

    let completed = completed_node_ids(&events);
    assert_eq!(completed.iter().filter(|id| *id == "d").count(), 1);

    let recorded = record.lock();
    assert_eq!(recorded.len(), 1, "merge node must run exactly once");
    let parents = &recorded[0];
    assert_eq!(parents.len(), 2, "D must see B's and C's outputs as two entries");
    let keys: Vec<&str> = parents
        .iter()
        .filter_map(|p| p.get("key").and_then(Value::as_str))
        .collect();
    assert!(keys.contains(&"b"));
    assert!(keys.contains(&"c"));
}

#[tokio::test]
async fn test_aggregated_bundle_is_unpacked_for_downstream_readers() {
    let record = Arc::new(Mutex::new(Vec::new()));
    let mut registry = NodeHandlerRegistry::new();
    registry.register("emit_b", Arc::new(emitting_handler("b", json!(1))));
    registry.register("emit_c", Arc::new(emitting_handler("c", json!(2))));
    registry.register("record", Arc::new(recording_handler(record.clone())));

    // B and C merge into a pass-through node, which re-wraps both outputs
    // into one aggregate bundle; D must still see two distinct entries.
    let graph = Graph::builder("wf", "aggregate")
        .add_node(Node::trigger("init", "Init", trigger::INIT))
        .add_node(Node::new("b", "B", NodeType::Action).with_handler("emit_b"))
        .add_node(Node::new("c", "C", NodeType::Action).with_handler("emit_c"))
        .add_node(Node::new("p", "Pass", NodeType::Action).with_handler("pass_through"))
        .add_node(Node::new("d", "D", NodeType::Action).with_handler("record"))
        .add_link("init", "b")
        .add_link("init", "c")
        .add_link("b", "p")
        .add_link("c", "p")
        .add_link("p", "d")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryVariableStore::new());
    let (runtime, mut rx) = build_runtime(graph, registry, store);
    runtime.execute_init();
    wait_for_cleanup(&mut rx).await;

    let recorded = record.lock();
    assert_eq!(recorded.len(), 1);
    let parents = &recorded[0];
    assert_eq!(
        parents.len(),
        2,
        "aggregate bundle must be unpacked, not delivered as one nested item"
    );
    let keys: Vec<&str> = parents
        .iter()
        .filter_map(|p| p.get("key").and_then(Value::as_str))
        .collect();
    assert!(keys.contains(&"b"));
    assert!(keys.contains(&"c"));
}

#[tokio::test]
async fn test_wide_fanout_merge_under_concurrency() {
    let record = Arc::new(Mutex::new(Vec::new()));
    let mut registry = NodeHandlerRegistry::new();
    registry.register("record", Arc::new(recording_handler(record.clone())));

    let mut builder = Graph::builder("wf", "wide")
        .add_node(Node::trigger("init", "Init", trigger::INIT))
        .add_node(Node::new("sink", "Sink", NodeType::Action).with_handler("record"));
    for i in 0..10 {
        let id = format!("n{i}");
        registry.register(
            &format!("emit_{i}"),
            Arc::new(emitting_handler("n", json!(i))),
        );
        builder = builder
            .add_node(
                Node::new(id.as_str(), id.as_str(), NodeType::Action)
                    .with_handler(format!("emit_{i}")),
            )
            .add_link("init", &id)
            .add_link(&id, "sink");
    }
    let graph = builder.build().unwrap();

    let store = Arc::new(InMemoryVariableStore::new());
    let (runtime, mut rx) = build_runtime(graph, registry, store);
    runtime.execute_init();
    wait_for_cleanup(&mut rx).await;

    let recorded = record.lock();
    assert_eq!(recorded.len(), 1, "sink must fire once despite 10 branches");
    assert_eq!(recorded[0].len(), 10);
}

#[tokio::test]
async fn test_run_vars_purged_exactly_once_after_completion() {
    let mut registry = NodeHandlerRegistry::new();
    registry.register(
        "emit",
        Arc::new(FnHandler::new(|ctx| {
            Box::pin(async move {
                ctx.set_run_var("scratch", json!(42));
                ctx.write_output("out", json!("done"));
                Ok(())
            })
        })),
    );

    let graph = Graph::builder("wf", "cleanup")
        .add_node(Node::trigger("init", "Init", trigger::INIT))
        .add_node(Node::new("a", "A", NodeType::Action).with_handler("emit"))
        .add_link("init", "a")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryVariableStore::new());
    let (runtime, mut rx) = build_runtime(graph, registry, store.clone());
    runtime.execute_init();
    let events = wait_for_cleanup(&mut rx).await;

    let cleanups = events
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::ExecutionCleaned { .. }))
        .count();
    assert_eq!(cleanups, 1);

    // FakeIdGenerator makes the first execution id deterministic.
    use agentflow::VariableStore;
    assert_eq!(store.get_run_var("wf", "exec-0", "scratch").await.unwrap(), None);
    assert_eq!(store.get_run_var("wf", "exec-0", "a_output").await.unwrap(), None);
}

#[tokio::test]
async fn test_stop_path_does_not_affect_sibling_branches() {
    let mut registry = NodeHandlerRegistry::new();
    registry.register(
        "halt_path",
        Arc::new(FnHandler::new(|ctx| {
            Box::pin(async move {
                ctx.request_stop_path();
                Ok(())
            })
        })),
    );

    let graph = Graph::builder("wf", "branches")
        .add_node(Node::trigger("init", "Init", trigger::INIT))
        .add_node(Node::new("g", "Gate", NodeType::Action).with_handler("halt_path"))
        .add_node(Node::new("gg", "AfterGate", NodeType::Action))
        .add_node(Node::new("c", "C", NodeType::Action))
        .add_node(Node::new("cc", "AfterC", NodeType::Action))
        .add_link("init", "g")
        .add_link("init", "c")
        .add_link("g", "gg")
        .add_link("c", "cc")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryVariableStore::new());
    let (runtime, mut rx) = build_runtime(graph, registry, store);
    runtime.execute_init();
    let events = wait_for_cleanup(&mut rx).await;

    let completed = completed_node_ids(&events);
    assert!(!completed.contains(&"gg".to_string()), "halted path must not continue");
    assert!(completed.contains(&"cc".to_string()), "sibling branch must be unaffected");
}

#[tokio::test]
async fn test_execution_stop_halts_propagation_and_skips_purge() {
    let mut registry = NodeHandlerRegistry::new();
    registry.register(
        "halt_execution",
        Arc::new(FnHandler::new(|ctx| {
            Box::pin(async move {
                ctx.request_execution_stop();
                Ok(())
            })
        })),
    );

    let graph = Graph::builder("wf", "halt")
        .add_node(Node::trigger("init", "Init", trigger::INIT))
        .add_node(Node::new("s", "Stopper", NodeType::Action).with_handler("halt_execution"))
        .add_node(Node::new("x", "Never", NodeType::Action))
        .add_link("init", "s")
        .add_link("s", "x")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryVariableStore::new());
    let (runtime, mut rx) = build_runtime(graph, registry, store);
    runtime.execute_init();

    // Drain events until the runtime goes quiet; the stopped execution is
    // dropped without a cleanup event.
    let mut saw_x = false;
    let mut saw_cleanup = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
    {
        match event {
            RuntimeEvent::NodeStarted { node_id, .. } if node_id == "x" => saw_x = true,
            RuntimeEvent::ExecutionCleaned { .. } => saw_cleanup = true,
            _ => {}
        }
    }
    assert!(!saw_x, "no children may be scheduled after an execution stop");
    assert!(!saw_cleanup, "stopped executions skip the run-var purge");
}

#[tokio::test]
async fn test_gate_on_output_opens_and_closes_by_parent_value() {
    for (value, expect_downstream) in [(json!(["call-1"]), true), (json!([]), false)] {
        let mut registry = NodeHandlerRegistry::new();
        registry.register("emit", Arc::new(emitting_handler("result", value)));

        let graph = Graph::builder("wf", "gated")
            .add_node(Node::trigger("init", "Init", trigger::INIT))
            .add_node(Node::new("e", "Emit", NodeType::Action).with_handler("emit"))
            .add_node(
                Node::new("g", "Gate", NodeType::Action)
                    .with_handler("gate_on_output")
                    .with_static_input("key", json!("result")),
            )
            .add_node(Node::new("after", "After", NodeType::Action))
            .add_link("init", "e")
            .add_link("e", "g")
            .add_link("g", "after")
            .build()
            .unwrap();

        let store = Arc::new(InMemoryVariableStore::new());
        let (runtime, mut rx) = build_runtime(graph, registry, store);
        runtime.execute_init();
        let events = wait_for_cleanup(&mut rx).await;

        let completed = completed_node_ids(&events);
        assert_eq!(
            completed.contains(&"after".to_string()),
            expect_downstream,
            "gate must only propagate on truthy parent output"
        );
    }
}

#[tokio::test]
async fn test_overlapping_executions_are_isolated() {
    let record = Arc::new(Mutex::new(Vec::new()));
    let mut registry = NodeHandlerRegistry::new();
    registry.register("record", Arc::new(recording_handler(record.clone())));

    let graph = Graph::builder("wf", "overlap")
        .add_node(Node::trigger("init", "Init", trigger::INIT))
        .add_node(Node::new("a", "A", NodeType::Action).with_handler("record"))
        .add_link("init", "a")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryVariableStore::new());
    let (runtime, mut rx) = build_runtime(graph, registry, store);
    runtime.execute_init();
    runtime.execute_init();

    let mut cleanups = 0;
    while cleanups < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for both executions")
            .expect("event channel closed");
        if matches!(event, RuntimeEvent::ExecutionCleaned { .. }) {
            cleanups += 1;
        }
    }
    assert_eq!(record.lock().len(), 2, "each firing runs its own execution");
}
