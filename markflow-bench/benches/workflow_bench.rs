//! Workflow engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use markflow_core::{
    Context, Definition, EventKind, FieldMarkingStore, ListenerRegistry, Record, Workflow,
};
use markflow_store::{InMemoryRepository, RecordMarkingStore, RecordRepository};
use serde_json::Map;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Global counter to ensure unique record IDs across all benchmark iterations
static RECORD_COUNTER: AtomicU64 = AtomicU64::new(0);

fn order_definition() -> Arc<Definition> {
    let definition = serde_json::json!({
        "places": ["created", "processing", "completed", "failed"],
        "transitions": [
            {"name": "start", "from": "created", "to": "processing"},
            {"name": "complete", "from": "processing", "to": "completed",
             "guard": "subject.amount > 0 && !subject.flagged"},
            {"name": "fail", "from": "processing", "to": "failed"},
            {"name": "retry", "from": "failed", "to": "processing"}
        ]
    });
    Arc::new(Definition::from_json(&definition).unwrap())
}

fn chain_definition(len: usize) -> serde_json::Value {
    serde_json::json!({
        "places": (0..len).map(|i| format!("p{}", i)).collect::<Vec<_>>(),
        "transitions": (0..len - 1).map(|i| serde_json::json!({
            "name": format!("next_{}", i),
            "from": format!("p{}", i),
            "to": format!("p{}", i + 1)
        })).collect::<Vec<_>>()
    })
}

fn field_workflow(listeners: Option<Arc<ListenerRegistry>>) -> Workflow {
    let def = order_definition();
    let store = Arc::new(FieldMarkingStore::new("status", def.places().iter().cloned()));
    Workflow::new(
        def,
        store,
        listeners.map(|l| l as Arc<dyn markflow_core::EventDispatcher>),
        "order@status",
    )
}

fn bench_definition(c: &mut Criterion) {
    let mut group = c.benchmark_group("definition_parse");

    for len in [5usize, 50, 500] {
        let json = chain_definition(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &json, |b, json| {
            b.iter(|| black_box(Definition::from_json(json).unwrap()));
        });
    }

    group.finish();
}

fn bench_can(c: &mut Criterion) {
    let mut group = c.benchmark_group("workflow_can");
    let subject = Record::new("order")
        .with_field("status", "processing")
        .with_field("amount", 10);

    let bare = field_workflow(None);
    group.bench_function("no_dispatcher", |b| {
        b.iter(|| black_box(bare.can(&subject, "complete").unwrap()));
    });

    let listeners = Arc::new(ListenerRegistry::new());
    for _ in 0..4 {
        listeners.listen_global(EventKind::Guard, |e| {
            if e.context().contains_key("blocked") {
                e.set_blocked(true, None);
            }
        });
    }
    let guarded = field_workflow(Some(listeners));
    group.bench_function("four_guard_listeners", |b| {
        b.iter(|| black_box(guarded.can(&subject, "complete").unwrap()));
    });

    group.bench_function("enabled_transitions", |b| {
        b.iter(|| black_box(guarded.enabled_transitions(&subject).unwrap().len()));
    });

    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("workflow_apply");

    let workflow = field_workflow(Some(Arc::new(ListenerRegistry::new())));
    group.bench_function("field_store_cycle", |b| {
        let mut subject = Record::new("order")
            .with_field("status", "processing")
            .with_field("amount", 10);
        b.iter(|| {
            workflow.apply(&mut subject, "fail", Context::new()).unwrap();
            black_box(workflow.apply(&mut subject, "retry", Context::new()).unwrap())
        });
    });

    let repo = Arc::new(InMemoryRepository::new());
    let def = order_definition();
    let store = Arc::new(RecordMarkingStore::new(
        repo.clone(),
        "status",
        def.places().iter().cloned(),
    ));
    let record_workflow = Workflow::new(def, store, None, "order@status");
    group.bench_function("record_store_start", |b| {
        b.iter(|| {
            let id = format!("o-{}", RECORD_COUNTER.fetch_add(1, Ordering::Relaxed));
            let mut fields = Map::new();
            fields.insert("status".to_string(), "created".into());
            let mut subject = repo.insert("order", Some(id), fields).unwrap().to_record();
            black_box(
                record_workflow
                    .apply(&mut subject, "start", Context::new())
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_definition, bench_can, bench_apply);
criterion_main!(benches);
