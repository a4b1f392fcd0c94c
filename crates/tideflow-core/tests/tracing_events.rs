//! The engine's structured log events, captured through a `tracing`
//! subscriber layer.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tideflow_core::{Record, Scope, Value, runtime};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<(String, Level)>>>);

impl Captured {
    fn has(&self, target: &str, level: Level) -> bool {
        self.0
            .lock()
            .map(|events| events.iter().any(|(t, l)| t == target && *l == level))
            .unwrap_or(false)
    }
}

impl<S: Subscriber> Layer<S> for Captured {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if let Ok(mut events) = self.0.lock() {
            events.push((meta.target().to_owned(), *meta.level()));
        }
    }
}

#[test]
fn engine_emits_targeted_events() {
    let captured = Captured::default();
    let subscriber = Registry::default()
        .with(EnvFilter::new("tideflow=trace"))
        .with(captured.clone());

    tracing::subscriber::with_default(subscriber, || {
        runtime::reset();
        let data = Value::from_json(json!({"a": 1}))
            .as_record()
            .cloned()
            .unwrap_or_default();
        let scope = Scope::new("traced", data);
        let node = scope
            .node("a / 0", |s| match s.get("a").as_i64() {
                Some(0) => Ok(Value::from(0)),
                _ => Err("division by zero".into()),
            })
            .build();
        scope.node("a", |s| Ok(s.get("a"))).build();

        scope.set("a", Value::from(2));
        runtime::tick();

        let frozen = Record::new();
        frozen.prevent_extensions();
        frozen.set("k", Value::from(1));

        node.teardown();
        scope.destroy();
        runtime::reset();
    });

    assert!(captured.has("tideflow::diagnostics", Level::WARN));
    assert!(captured.has("tideflow::scheduler", Level::DEBUG));
    assert!(captured.has("tideflow::container", Level::DEBUG));
    assert!(captured.has("tideflow::node", Level::TRACE));
}
