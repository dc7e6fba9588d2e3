use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::checkpoint::{Checkpointer, InMemoryCheckpointer};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::events::{AgentEvent, VecEventSink};
use crate::llm::ScriptedLlmClient;
use crate::message::{Message, ToolCall};
use crate::node::NodeDef;
use crate::parallel::{fold, merge_with, select_by, select_by_index, select_by_max, MergeOutcome};
use crate::tools::{FnTool, ToolDescriptor, ToolOutput, ToolRegistry, ToolSelection};

fn ctx_with(sink: Arc<VecEventSink>) -> ExecutionContext {
    ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
        .sink(sink)
        .build()
}

fn ctx() -> ExecutionContext {
    ctx_with(Arc::new(VecEventSink::new()))
}

fn constant(name: &str, value: &'static str) -> NodeDef<String, String> {
    NodeDef::new(name, move |_ctx, _input: String| async move { Ok(value.to_string()) })
}

#[tokio::test]
async fn test_linear_graph_runs_to_finish() {
    let mut g = GraphBuilder::<String, usize>::new("linear");
    let upper = g.add("upper", |_ctx, s: String| async move { Ok(s.to_uppercase()) });
    let len = g.add("len", |_ctx, s: String| async move { Ok(s.len()) });
    g.then(&g.start(), &upper);
    g.then(&upper, &len);
    g.then(&len, &g.finish());
    let strategy = g.build_strategy().unwrap();

    let sink = Arc::new(VecEventSink::new());
    let output = strategy.run(&ctx_with(sink.clone()), "hello".to_string()).await.unwrap();
    assert_eq!(output, 5);
    assert_eq!(sink.started_nodes(), vec![START_NODE, "upper", "len", FINISH_NODE]);
}

#[tokio::test]
async fn test_first_matching_edge_wins() {
    let mut g = GraphBuilder::<i64, String>::new("branching");
    let small = g.add("small", |_ctx, n: i64| async move { Ok(format!("small {}", n)) });
    let first = g.add("first", |_ctx, n: i64| async move { Ok(format!("first {}", n)) });
    let second = g.add("second", |_ctx, n: i64| async move { Ok(format!("second {}", n)) });
    g.edge(&g.start(), &small, |e| e.on_condition(|n: &i64| *n < 10));
    g.then(&g.start(), &first);
    g.then(&g.start(), &second);
    for node in [&small, &first, &second] {
        g.then(node, &g.finish());
    }
    let strategy = g.build_strategy().unwrap();

    assert_eq!(strategy.run(&ctx(), 3).await.unwrap(), "small 3");
    // Two always-true edges: the first declared wins, every time.
    for _ in 0..5 {
        assert_eq!(strategy.run(&ctx(), 42).await.unwrap(), "first 42");
    }
}

#[tokio::test]
async fn test_transform_feeds_target_input() {
    let mut g = GraphBuilder::<String, String>::new("transform");
    let shout = g.add("shout", |_ctx, n: usize| async move { Ok("!".repeat(n)) });
    g.edge(&g.start(), &shout, |e| e.transformed(|s: String| s.len()));
    g.then(&shout, &g.finish());
    let strategy = g.build_strategy().unwrap();

    assert_eq!(strategy.run(&ctx(), "abc".to_string()).await.unwrap(), "!!!");
}

#[tokio::test]
async fn test_no_matching_edge_is_routing_error() {
    let mut g = GraphBuilder::<i64, i64>::new("stranded");
    let double = g.add("double", |_ctx, n: i64| async move { Ok(n * 2) });
    g.then(&g.start(), &double);
    g.edge(&double, &g.finish(), |e| e.on_condition(|n: &i64| *n > 100));
    let strategy = g.build_strategy().unwrap();

    let sink = Arc::new(VecEventSink::new());
    let err = strategy.run(&ctx_with(sink.clone()), 4).await.unwrap_err();
    match &err {
        EngineError::Routing { node, output } => {
            assert_eq!(node, "double");
            assert_eq!(output, &json!(8));
        }
        other => panic!("Expected Routing, got {:?}", other),
    }
    assert!(err.is_structural());
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, AgentEvent::StrategyFailed { .. })));
}

#[tokio::test]
async fn test_cycle_stops_at_execution_limit() {
    let mut g = GraphBuilder::<i64, i64>::new("forever");
    let inc = g.add("inc", |_ctx, n: i64| async move { Ok(n + 1) });
    g.then(&g.start(), &inc);
    g.edge(&inc, &g.finish(), |e| e.on_condition(|n: &i64| *n < 0));
    g.then(&inc, &inc);
    let strategy = g.build_strategy().unwrap();

    let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
        .config(EngineConfig::new().with_max_steps(20))
        .build();
    let err = strategy.run(&ctx, 0).await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutionLimit { limit: 20, .. }));
}

#[tokio::test]
async fn test_node_failure_propagates_with_event() {
    let mut g = GraphBuilder::<String, String>::new("failing");
    let boom = g.add("boom", |_ctx, _s: String| async move {
        Err::<String, _>(EngineError::failed("exploded"))
    });
    g.then(&g.start(), &boom);
    g.then(&boom, &g.finish());
    let strategy = g.build_strategy().unwrap();

    let sink = Arc::new(VecEventSink::new());
    let err = strategy.run(&ctx_with(sink.clone()), "x".to_string()).await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutionFailed(ref m) if m == "exploded"));
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, AgentEvent::NodeFailed { node, .. } if node == "boom")));
}

#[test]
fn test_build_rejects_invalid_structure() {
    let mut g = GraphBuilder::<String, String>::new("broken");
    let a = g.node(constant("a", "x"));
    let _orphan = g.node(constant("orphan", "y"));
    g.then(&g.start(), &a);
    let err = g.build_strategy().unwrap_err();

    match err {
        EngineError::GraphBuild { graph, errors } => {
            assert_eq!(graph, "broken");
            assert!(errors.contains(&GraphValidationError::FinishUnreachable));
            assert!(errors.contains(&GraphValidationError::UnreachableNode {
                node: "orphan".to_string()
            }));
        }
        other => panic!("Expected GraphBuild, got {:?}", other),
    }
}

#[test]
fn test_build_rejects_duplicate_names_and_foreign_handles() {
    let other = GraphBuilder::<String, String>::new("other");
    let foreign = other.finish();

    let mut g = GraphBuilder::<String, String>::new("dupes");
    let a = g.node(constant("a", "1"));
    let a2 = g.node(constant("a", "2"));
    g.then(&g.start(), &a);
    g.then(&a, &a2);
    g.then(&a2, &g.finish());
    g.then(&a, &foreign);

    let Err(EngineError::GraphBuild { errors, .. }) = g.build_strategy() else {
        panic!("Expected GraphBuild");
    };
    assert!(errors.contains(&GraphValidationError::DuplicateNodeName { node: "a".to_string() }));
    assert!(errors.contains(&GraphValidationError::ForeignNode {
        node: FINISH_NODE.to_string()
    }));
}

fn tool_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for name in ["search", "calc"] {
        registry
            .register(
                ToolDescriptor::new(name, "test tool"),
                FnTool::new(move |_| async move { Ok(ToolOutput::Raw(format!("{} result", name))) }),
            )
            .unwrap();
    }
    Arc::new(registry)
}

fn call_tool(name: &'static str) -> NodeDef<String, String> {
    NodeDef::new(format!("call_{}", name), move |ctx: ExecutionContext, _input: String| async move {
        let output = ctx.invoke_tool(&ToolCall::new("c1", name, json!(null))).await?;
        Ok(output.to_text())
    })
}

#[tokio::test]
async fn test_subgraph_restricts_tools() {
    let mut inner = GraphBuilder::<String, String>::new("math").with_tools(ToolSelection::named(["calc"]));
    let calc = inner.node(call_tool("calc"));
    inner.then(&inner.start(), &calc);
    inner.then(&calc, &inner.finish());
    let math = inner.build_subgraph().unwrap();

    let mut bad = GraphBuilder::<String, String>::new("math_bad").with_tools(ToolSelection::named(["calc"]));
    let search = bad.node(call_tool("search"));
    bad.then(&bad.start(), &search);
    bad.then(&search, &bad.finish());
    let math_bad = bad.build_subgraph().unwrap();

    let build = |sub: Subgraph<String, String>| {
        let mut g = GraphBuilder::<String, String>::new("outer");
        let node = g.subgraph(sub);
        g.then(&g.start(), &node);
        g.then(&node, &g.finish());
        g.build_strategy().unwrap()
    };

    let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
        .tools(tool_registry())
        .build();
    assert_eq!(build(math).run(&ctx, String::new()).await.unwrap(), "calc result");

    let err = build(math_bad).run(&ctx, String::new()).await.unwrap_err();
    match err {
        EngineError::ToolNotAvailable { tool, scope } => {
            assert_eq!(tool, "search");
            assert_eq!(scope, "math_bad");
        }
        other => panic!("Expected ToolNotAvailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_subgraph_offers_its_tools_to_llm_and_restores() {
    let llm = Arc::new(ScriptedLlmClient::new().reply(Message::assistant("done")));
    let mut inner = GraphBuilder::<String, String>::new("research").with_tools(ToolSelection::named(["search"]));
    let ask = inner.add("ask", |ctx: ExecutionContext, _s: String| async move {
        let reply = ctx.request_llm().await?;
        let text = reply.content().into_owned();
        Ok(text)
    });
    inner.then(&inner.start(), &ask);
    inner.then(&ask, &inner.finish());
    let research = inner.build_subgraph().unwrap();

    let mut g = GraphBuilder::<String, String>::new("outer");
    let node = g.subgraph(research);
    g.then(&g.start(), &node);
    g.then(&node, &g.finish());
    let strategy = g.build_strategy().unwrap();

    let ctx = ExecutionContext::builder(llm.clone()).tools(tool_registry()).build();
    strategy.run(&ctx, String::new()).await.unwrap();

    assert_eq!(llm.requests()[0].tools, vec!["search"]);
    // The session's tool list from before the run is back.
    let tools_after = ctx.read_session(|s| s.tools.len()).unwrap();
    assert_eq!(tools_after, 0);
    assert_eq!(strategy.referenced_tools(), vec!["search"]);
}

#[tokio::test]
async fn test_parallel_select_by_max() {
    let mut g = GraphBuilder::<String, String>::new("fanout");
    let best = g.parallel(
        "best",
        vec![constant("a", "a"), constant("b", "abc"), constant("c", "ab")],
        select_by_max(|s: &String| s.len()),
    );
    g.then(&g.start(), &best);
    g.then(&best, &g.finish());
    let strategy = g.build_strategy().unwrap();

    let sink = Arc::new(VecEventSink::new());
    assert_eq!(strategy.run(&ctx_with(sink.clone()), String::new()).await.unwrap(), "abc");
    let completed = sink
        .events()
        .iter()
        .filter(|e| matches!(e, AgentEvent::ParallelBranchCompleted { .. }))
        .count();
    assert_eq!(completed, 3);
}

#[tokio::test]
async fn test_select_by_max_ties_go_to_first_branch() {
    let mut g = GraphBuilder::<String, String>::new("ties");
    let best = g.parallel(
        "best",
        vec![constant("a", "xy"), constant("b", "zz")],
        select_by_max(|s: &String| s.len()),
    );
    g.then(&g.start(), &best);
    g.then(&best, &g.finish());
    assert_eq!(g.build_strategy().unwrap().run(&ctx(), String::new()).await.unwrap(), "xy");
}

#[tokio::test]
async fn test_merge_sees_every_output_in_declaration_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let slow = NodeDef::new("slow", |_ctx, _s: String| async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok("slow".to_string())
    });

    let mut g = GraphBuilder::<String, String>::new("ordered");
    let merged = g.parallel(
        "join",
        vec![slow, constant("fast", "fast")],
        merge_with(move |_ctx, results: Vec<crate::parallel::BranchResult<String>>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let outputs: Vec<String> = results.into_iter().map(|r| r.output).collect();
                Ok(MergeOutcome::keep_parent(outputs.join(",")))
            }
        }),
    );
    g.then(&g.start(), &merged);
    g.then(&merged, &g.finish());

    let output = g.build_strategy().unwrap().run(&ctx(), String::new()).await.unwrap();
    assert_eq!(output, "slow,fast");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_branch_failure_skips_merge() {
    let merged_calls = Arc::new(AtomicUsize::new(0));
    let counter = merged_calls.clone();
    let failing = NodeDef::new("failing", |_ctx, _s: String| async move {
        Err::<String, _>(EngineError::llm("provider down"))
    });
    let hanging = NodeDef::new("hanging", |_ctx, _s: String| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("late".to_string())
    });

    let mut g = GraphBuilder::<String, String>::new("failing_fanout");
    let merged = g.parallel(
        "join",
        vec![hanging, failing],
        merge_with(move |_ctx, results: Vec<crate::parallel::BranchResult<String>>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(MergeOutcome::keep_parent(results.len().to_string()))
            }
        }),
    );
    g.then(&g.start(), &merged);
    g.then(&merged, &g.finish());
    let strategy = g.build_strategy().unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), strategy.run(&ctx(), String::new()))
        .await
        .expect("remaining branches should be cancelled")
        .unwrap_err();
    match err {
        EngineError::Aggregate { branch, index, source } => {
            assert_eq!(branch, "failing");
            assert_eq!(index, 1);
            assert!(matches!(*source, EngineError::Llm(_)));
        }
        other => panic!("Expected Aggregate, got {:?}", other),
    }
    assert_eq!(merged_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_selected_branch_session_is_adopted() {
    let writer = |name: &'static str, text: &'static str| {
        NodeDef::new(name, move |ctx: ExecutionContext, _s: String| async move {
            ctx.session().append(Message::assistant(text))?;
            Ok(text.to_string())
        })
    };

    let mut g = GraphBuilder::<String, String>::new("adopt");
    let pick = g.parallel(
        "pick",
        vec![writer("short", "hi"), writer("long", "hello there")],
        select_by(|s: &String| s.starts_with("hello")),
    );
    g.then(&g.start(), &pick);
    g.then(&pick, &g.finish());

    let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
        .message(Message::user("base"))
        .build();
    g.build_strategy().unwrap().run(&ctx, String::new()).await.unwrap();

    let contents: Vec<String> = ctx
        .read_session(|s| s.messages().iter().map(|m| m.content().into_owned()).collect())
        .unwrap();
    assert_eq!(contents, vec!["base", "hello there"]);
}

#[tokio::test]
async fn test_fold_keeps_parent_session() {
    let mut g = GraphBuilder::<String, usize>::new("sum");
    let total = g.parallel(
        "total",
        vec![constant("a", "aa"), constant("b", "bbb")],
        fold(0usize, |acc, s: String| acc + s.len()),
    );
    g.then(&g.start(), &total);
    g.then(&total, &g.finish());

    let ctx = ctx();
    assert_eq!(g.build_strategy().unwrap().run(&ctx, String::new()).await.unwrap(), 5);
    assert_eq!(ctx.session().message_count().unwrap(), 0);
}

#[tokio::test]
async fn test_select_by_index_can_ask_llm() {
    let llm = Arc::new(ScriptedLlmClient::new().reply(Message::assistant("1")));
    let mut g = GraphBuilder::<String, String>::new("judge");
    let judged = g.parallel(
        "judged",
        vec![constant("a", "draft one"), constant("b", "draft two")],
        select_by_index(|ctx: ExecutionContext, outputs: Vec<String>| async move {
            let prompt = crate::session::Prompt::new("judge")
                .with_messages(vec![Message::user(format!("Pick the best of {:?}", outputs))]);
            let answer = ctx.request_llm_detached(&prompt).await?;
            let text = answer.content().trim().to_string();
            text.parse::<usize>().map_err(|e| EngineError::failed(e.to_string()))
        }),
    );
    g.then(&g.start(), &judged);
    g.then(&judged, &g.finish());

    let ctx = ExecutionContext::builder(llm).build();
    assert_eq!(g.build_strategy().unwrap().run(&ctx, String::new()).await.unwrap(), "draft two");
}

#[test]
fn test_parallel_needs_two_branches() {
    let mut g = GraphBuilder::<String, String>::new("lonely");
    let single = g.parallel("single", vec![constant("a", "a")], select_by_max(|s: &String| s.len()));
    g.then(&g.start(), &single);
    g.then(&single, &g.finish());

    let Err(EngineError::GraphBuild { errors, .. }) = g.build_strategy() else {
        panic!("Expected GraphBuild");
    };
    assert_eq!(
        errors,
        vec![GraphValidationError::TooFewBranches {
            node: "single".to_string(),
            count: 1
        }]
    );
}

fn resumable_strategy(visits: Arc<AtomicUsize>) -> Strategy<String, String> {
    let mut inner = GraphBuilder::<String, String>::new("inner");
    let counter = visits.clone();
    let first = inner.add("first", move |_ctx, s: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}+first", s))
        }
    });
    let second = inner.add("second", |_ctx, s: String| async move { Ok(format!("{}+second", s)) });
    inner.then(&inner.start(), &first);
    inner.then(&first, &second);
    inner.then(&second, &inner.finish());
    let inner = inner.build_subgraph().unwrap();

    let mut g = GraphBuilder::<String, String>::new("outer");
    let sub = g.subgraph(inner);
    let tail = g.add("tail", |_ctx, s: String| async move { Ok(format!("{}+tail", s)) });
    g.then(&g.start(), &sub);
    g.then(&sub, &tail);
    g.then(&tail, &g.finish());
    g.build_strategy().unwrap()
}

#[tokio::test]
async fn test_resume_inside_nested_subgraph() {
    let visits = Arc::new(AtomicUsize::new(0));
    let strategy = resumable_strategy(visits.clone());
    let store = Arc::new(InMemoryCheckpointer::default());
    let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
        .execution_id("exec-resume")
        .checkpointer(store.clone())
        .config(EngineConfig::new().with_continuous_checkpoints(true))
        .build();

    let output = strategy.run(&ctx, "in".to_string()).await.unwrap();
    assert_eq!(output, "in+first+second+tail");
    assert_eq!(visits.load(Ordering::SeqCst), 1);

    // Find the checkpoint taken right before "second" ran.
    let mut checkpoint = store.latest_checkpoint("exec-resume").await.unwrap().unwrap();
    assert_eq!(checkpoint.node_path, vec!["tail"]);
    checkpoint.node_path = vec!["inner".to_string(), "second".to_string()];
    checkpoint.pending_input = json!("saved+first");

    let resumed_ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
        .execution_id("exec-resume")
        .build();
    let resumed = strategy.resume(&resumed_ctx, &checkpoint).await.unwrap();
    assert_eq!(resumed, "saved+first+second+tail");
    // "first" was not executed again.
    assert_eq!(visits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_continuous_checkpoints_record_positions() {
    let store = Arc::new(InMemoryCheckpointer::default());
    let sink = Arc::new(VecEventSink::new());
    let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
        .checkpointer(store.clone())
        .sink(sink.clone())
        .config(EngineConfig::new().with_continuous_checkpoints(true))
        .build();
    resumable_strategy(Arc::new(AtomicUsize::new(0)))
        .run(&ctx, "x".to_string())
        .await
        .unwrap();

    let paths: Vec<Vec<String>> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::CheckpointCreated { node_path, .. } => Some(node_path),
            _ => None,
        })
        .collect();
    assert_eq!(
        paths,
        vec![
            vec!["inner".to_string()],
            vec!["inner".to_string(), "first".to_string()],
            vec!["inner".to_string(), "second".to_string()],
            vec!["tail".to_string()],
        ]
    );
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn test_resume_inside_subgraph_restores_outer_tools() {
    let strategy = {
        let mut inner = GraphBuilder::<String, String>::new("research").with_tools(ToolSelection::named(["search"]));
        let ask = inner.add("ask", |ctx: ExecutionContext, _s: String| async move {
            let reply = ctx.request_llm().await?;
            let text = reply.content().into_owned();
            Ok(text)
        });
        inner.then(&inner.start(), &ask);
        inner.then(&ask, &inner.finish());
        let research = inner.build_subgraph().unwrap();

        let mut g = GraphBuilder::<String, String>::new("outer");
        let node = g.subgraph(research);
        g.then(&g.start(), &node);
        g.then(&node, &g.finish());
        g.build_strategy().unwrap()
    };

    let store = Arc::new(InMemoryCheckpointer::default());
    let sink = Arc::new(VecEventSink::new());
    let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new().reply(Message::assistant("first"))))
        .tools(tool_registry())
        .checkpointer(store.clone())
        .sink(sink.clone())
        .config(EngineConfig::new().with_continuous_checkpoints(true))
        .build();
    strategy.run(&ctx, String::new()).await.unwrap();

    let inside = sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            AgentEvent::CheckpointCreated { checkpoint_id, node_path, .. }
                if node_path == vec!["research".to_string(), "ask".to_string()] =>
            {
                Some(checkpoint_id)
            }
            _ => None,
        })
        .unwrap();
    let checkpoint = store.rollback_to_checkpoint(&inside).await.unwrap();
    let snapshot_tools: Vec<String> = checkpoint.session.tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(snapshot_tools, vec!["search"]);

    let llm = Arc::new(ScriptedLlmClient::new().reply(Message::assistant("resumed")));
    let resumed_ctx = ExecutionContext::builder(llm.clone()).tools(tool_registry()).build();
    let output = strategy.resume(&resumed_ctx, &checkpoint).await.unwrap();

    assert_eq!(output, "resumed");
    assert_eq!(llm.requests()[0].tools, vec!["search"]);
    assert_eq!(resumed_ctx.read_session(|s| s.tools.len()).unwrap(), 0);
}

#[tokio::test]
async fn test_resume_with_unknown_node_fails() {
    let strategy = resumable_strategy(Arc::new(AtomicUsize::new(0)));
    let ctx = ctx();
    let snapshot = ctx.session().snapshot().unwrap();
    let checkpoint = crate::checkpoint::AgentCheckpoint::new(
        ctx.execution_id(),
        "outer",
        vec!["missing".to_string()],
        json!("x"),
        snapshot,
    );
    let err = strategy.resume(&ctx, &checkpoint).await.unwrap_err();
    assert!(matches!(err, EngineError::Checkpoint(_)));
}
