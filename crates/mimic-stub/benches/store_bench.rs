use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mimic_stub::expectation::{Expectation, ExpectationDocument, ExpectationStore};
use mimic_stub::http::HttpRequest;
use serde_json::json;

fn create_expectation(id: usize, stateful: bool) -> Expectation {
    let path = if stateful {
        format!("/api/v1/endpoint{id}/$match(dataType: number)")
    } else {
        format!("/api/v1/endpoint{id}/1")
    };
    let doc = json!({
        "http-request": {"method": "GET", "path": path, "headers": {"accept": "application/json"}},
        "http-response": {"status": 200, "body": {"id": id, "name": "item"}}
    });
    Expectation::from_document(ExpectationDocument::from_value(doc).unwrap(), "bench").unwrap()
}

fn create_store(count: usize, stateful: bool) -> ExpectationStore {
    let store = ExpectationStore::default();
    for i in 0..count {
        store.add(create_expectation(i, stateful));
    }
    store
}

fn bench_store_lookup(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("store_lookup");

    for count in [10, 100, 1000] {
        group.throughput(Throughput::Elements(1));
        for stateful in [false, true] {
            let store = create_store(count, stateful);
            // Oldest expectation is scanned last
            let request = HttpRequest::new("GET", "/api/v1/endpoint0/1")
                .with_header("accept", "application/json");
            let label = if stateful { "stateful" } else { "structural" };

            group.bench_with_input(BenchmarkId::new(label, count), &count, |b, _| {
                b.iter(|| {
                    runtime.block_on(async {
                        let result = store.match_request(black_box(&request)).await;
                        black_box(result.staged.is_some())
                    })
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_store_lookup);
criterion_main!(benches);
