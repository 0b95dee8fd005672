//! End-to-end tests: create, record, complete, deliver.

use std::sync::Arc;
use std::time::Duration;

use apm_core::config::{AgentConfig, TransactionConfig};
use apm_core::delivery::DeliveryConfig;
use apm_core::telemetry::MetricsStore;
use apm_core::sanitizer::{Opaque, SanitizeError};
use apm_core::transaction::{Context, ContextAccessor};
use apm_core::{Agent, Classification, CompletionOutcome, Event, Failure, Value};
use serde_json::Value as JsonValue;

fn agent_with(config: AgentConfig) -> Agent {
    Agent::new(config).with_metrics(Arc::new(MetricsStore::detached()))
}

fn agent() -> Agent {
    agent_with(AgentConfig {
        transactions: TransactionConfig {
            slow_threshold: Duration::from_millis(500),
            max_events: 100,
        },
        ..AgentConfig::default()
    })
}

fn request_context() -> Context {
    Context::from([
        ("REMOTE_ADDR".to_string(), Value::from("1.2.3.4")),
        ("SECRET".to_string(), Value::from("x")),
    ])
}

fn record_request(agent: &Agent, id: &str) {
    let handle = agent.create("worker-1", id, request_context()).unwrap();
    handle.add_event(Event::with_fields("sql.query", [("sql", "SELECT 1")]).with_duration(0.01));
    handle.set_primary_span(
        Event::with_fields("process_action", [("controller", "Posts"), ("action", "index")])
            .with_duration(0.2),
    );
}

#[test]
fn normal_request_is_delivered_scrubbed() {
    let agent = agent();
    record_request(&agent, "A");
    let handle = agent.current("worker-1").unwrap();

    let completion = agent.complete("worker-1").unwrap();
    assert_eq!(completion.id, "A");
    assert_eq!(completion.classification, Classification::Normal);
    assert_eq!(completion.outcome, CompletionOutcome::Dispatched);
    assert!(!handle.is_live());
    assert!(agent.current("worker-1").is_none());

    let record = agent.delivery().try_recv().unwrap();
    assert_eq!(record.action.as_deref(), Some("Posts#index"));
    assert_eq!(record.kind, Classification::Normal);
    assert_eq!(record.duration, Some(0.2));
    assert_eq!(record.environment.get("REMOTE_ADDR"), Some(&JsonValue::from("1.2.3.4")));
    assert!(!record.environment.contains_key("SECRET"));
    assert_eq!(record.environment.len(), 1);
    assert_eq!(record.events.len(), 1);
    assert_eq!(record.events[0].payload["sql"], JsonValue::from("SELECT 1"));
    assert!(record.failure.is_none());
}

#[test]
fn failure_wins_over_fast_request() {
    let agent = agent();
    record_request(&agent, "A");
    agent
        .current("worker-1")
        .unwrap()
        .add_failure(Failure::new("RuntimeError", "boom"));

    let completion = agent.complete("worker-1").unwrap();
    assert_eq!(completion.classification, Classification::Failed);

    let record = agent.delivery().try_recv().unwrap();
    let failure = record.failure.unwrap();
    assert_eq!(failure.kind, "RuntimeError");
    assert_eq!(failure.message, "boom");
    assert!(record.failure_time.is_some());
}

#[test]
fn slow_request_is_classified_slow() {
    let agent = agent();
    let handle = agent.create("w", "slow", Context::new()).unwrap();
    handle.set_primary_span(Event::with_fields("process_action", [("controller", "A")]).with_duration(0.5));
    assert_eq!(agent.complete("w").unwrap().classification, Classification::Slow);
}

#[test]
fn transaction_without_span_or_failure_is_discarded() {
    let agent = agent();
    let handle = agent.create("w", "empty", Context::new()).unwrap();
    handle.add_event(Event::with_fields("cache.read", [("key", "k")]));

    let completion = agent.complete("w").unwrap();
    assert_eq!(completion.outcome, CompletionOutcome::Discarded);
    assert!(agent.delivery().is_empty());
    assert_eq!(agent.metrics().counter("transactions_discarded"), 1);
}

#[test]
fn oversized_transaction_is_truncated() {
    let agent = agent_with(AgentConfig {
        transactions: TransactionConfig {
            slow_threshold: Duration::from_millis(500),
            max_events: 3,
        },
        ..AgentConfig::default()
    });
    let handle = agent.create("w", "big", request_context()).unwrap();
    for i in 0..10 {
        handle.add_event(Event::with_fields("sql.query", [("n", i as i64)]));
    }
    handle.set_primary_span(
        Event::with_fields("process_action", [("controller", "Posts"), ("action", "show")])
            .with_duration(0.9),
    );

    let completion = agent.complete("w").unwrap();
    assert!(completion.truncated);
    assert_eq!(completion.classification, Classification::Slow);

    let record = agent.delivery().try_recv().unwrap();
    assert!(record.truncated);
    assert!(record.events.is_empty());
    assert!(record.environment.is_empty());
    assert_eq!(record.action.as_deref(), Some("Posts#show"));
    assert_eq!(record.kind, Classification::Slow);
}

#[test]
fn full_delivery_queue_drops_without_blocking() {
    let agent = agent_with(AgentConfig {
        delivery: DeliveryConfig { capacity: 1 },
        ..AgentConfig::default()
    });
    for id in ["one", "two"] {
        let handle = agent.create("w", id, Context::new()).unwrap();
        handle.add_failure(Failure::new("E", "e"));
        agent.complete("w");
    }

    assert_eq!(agent.delivery().len(), 1);
    assert_eq!(agent.delivery().dropped_count(), 1);
    assert_eq!(agent.metrics().counter("transactions_dropped"), 1);
    assert_eq!(agent.metrics().counter("transactions_completed"), 1);
}

#[test]
fn session_and_path_come_from_accessor() {
    let agent = agent();
    let mut ctx = request_context();
    ctx.insert("PATH_INFO".into(), Value::from("/posts"));
    ctx.insert("QUERY_STRING".into(), Value::from("page=2"));
    ctx.insert(
        "session".into(),
        Value::map([("user_id", Value::from(7i64)), ("password", Value::from("hunter2"))]),
    );
    let handle = agent.create("w", "s", ctx).unwrap();
    handle.set_primary_span(Event::with_fields("process_action", [("controller", "A")]).with_duration(0.1));
    agent.complete("w");

    let record = agent.delivery().try_recv().unwrap();
    assert_eq!(record.path.as_deref(), Some("/posts?page=2"));
    assert_eq!(record.session_data["user_id"], JsonValue::from(7));
    assert_eq!(record.session_data["password"], JsonValue::from("[FILTERED]"));
}

#[derive(Debug)]
struct Connection {
    fail: bool,
}

impl Opaque for Connection {
    fn type_name(&self) -> &str {
        "Connection"
    }

    fn repr(&self) -> Result<String, SanitizeError> {
        if self.fail {
            panic!("inspect on closed connection");
        }
        Ok("#<Connection pg>".to_string())
    }
}

fn cyclic() -> Value {
    let (node, cell) = Value::shared(Value::Null);
    *cell.write() = Value::map([("name", Value::from("loop")), ("parent", node.clone())]);
    node
}

fn leaves_are_sanitized(v: &JsonValue, depth: usize, max_depth: usize) -> bool {
    match v {
        JsonValue::Array(items) => {
            depth < max_depth && items.iter().all(|i| leaves_are_sanitized(i, depth + 1, max_depth))
        }
        JsonValue::Object(map) => {
            depth < max_depth && map.values().all(|i| leaves_are_sanitized(i, depth + 1, max_depth))
        }
        JsonValue::String(s) => s.as_str() != "[UNSANITIZED]",
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => true,
    }
}

#[test]
fn record_holds_only_primitives_for_hostile_input() {
    let agent = agent();
    let ctx = Context::from([
        ("REMOTE_ADDR".to_string(), cyclic()),
        ("HTTP_USER_AGENT".to_string(), Value::opaque(Connection { fail: false })),
        ("HTTP_REFERER".to_string(), Value::opaque(Connection { fail: true })),
        (
            "session".to_string(),
            Value::map([
                ("graph", cyclic()),
                ("conn", Value::opaque(Connection { fail: false })),
                ("password", Value::opaque(Connection { fail: true })),
            ]),
        ),
    ]);
    let handle = agent.create("w", "hostile", ctx).unwrap();
    handle.add_event(Event::with_fields(
        "sql.query",
        [("conn", Value::opaque(Connection { fail: false })), ("tree", cyclic())],
    ));
    handle.set_primary_span(
        Event::with_fields(
            "process_action",
            [
                ("controller", Value::from("Posts")),
                ("action", Value::from("index")),
                ("params", cyclic()),
            ],
        )
        .with_duration(0.1),
    );
    agent.complete("w").unwrap();

    let record = agent.delivery().try_recv().unwrap();
    let json = serde_json::to_value(&record).unwrap();
    // Record, events array and event object sit above any payload.
    let max_depth = agent.config().sanitizer.max_depth + 3;
    assert!(leaves_are_sanitized(&json, 0, max_depth));

    assert_eq!(record.environment["HTTP_USER_AGENT"], JsonValue::from("#<Connection pg>"));
    assert_eq!(record.environment["HTTP_REFERER"], JsonValue::from("[SANITIZE ERROR]"));
    assert_eq!(record.environment["REMOTE_ADDR"]["name"], JsonValue::from("loop"));
    assert_eq!(record.session_data["password"], JsonValue::from("[FILTERED]"));
    assert_eq!(record.events[0].payload["conn"], JsonValue::from("#<Connection pg>"));
}

struct ExplodingAccessor;

impl ContextAccessor for ExplodingAccessor {
    fn session(&self, _context: &Context) -> Option<Value> {
        panic!("session store unavailable")
    }

    fn full_path(&self, _context: &Context) -> Option<String> {
        Some("/ok".to_string())
    }
}

#[test]
fn panicking_accessor_degrades_to_empty_session() {
    let agent = agent().with_accessor(Arc::new(ExplodingAccessor));
    let handle = agent.create("w", "x", request_context()).unwrap();
    handle.add_failure(Failure::new("E", "e"));

    let completion = agent.complete("w").unwrap();
    assert_eq!(completion.outcome, CompletionOutcome::Dispatched);
    let record = agent.delivery().try_recv().unwrap();
    assert!(record.session_data.is_empty());
    assert_eq!(record.path.as_deref(), Some("/ok"));
}

#[tokio::test]
async fn completions_from_many_tasks_are_all_delivered() {
    let agent = Arc::new(agent());
    let mut tasks = Vec::new();
    for n in 0..16u64 {
        let agent = Arc::clone(&agent);
        tasks.push(tokio::spawn(async move {
            let handle = agent.create(n, format!("t{}", n), Context::new()).unwrap();
            handle.set_primary_span(Event::with_fields("job", [("n", n as i64)]).with_duration(0.01));
            agent.complete(n).unwrap().outcome
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), CompletionOutcome::Dispatched);
    }
    assert_eq!(agent.delivery().drain().len(), 16);
    assert!(agent.registry().is_empty());
}
