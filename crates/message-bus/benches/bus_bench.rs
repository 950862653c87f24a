use std::sync::Arc;

use common::{OperationContext, Tenant};
use criterion::{Criterion, criterion_group, criterion_main};
use message_bus::{Broker, InMemoryBroker, Message, Producer, codec};
use uuid::Uuid;

fn ctx() -> OperationContext {
    OperationContext::new(Tenant::new(Uuid::new_v4(), "GMS", 83, 1))
}

fn bench_codec(c: &mut Criterion) {
    let message = Message::new(
        "CREATED",
        serde_json::json!({"templateId": 4000000, "quantity": 2}),
    );

    c.bench_function("bus/encode_message", |b| {
        b.iter(|| codec::encode(&message).unwrap());
    });

    let frame = codec::encode(&message).unwrap();
    c.bench_function("bus/decode_message", |b| {
        b.iter(|| codec::decode::<Message>(&frame).unwrap());
    });
}

fn bench_publish_and_fetch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("bus/publish_fetch_commit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let broker = Arc::new(InMemoryBroker::new());
                let producer = Producer::new(broker.clone());
                let ctx = ctx();
                for n in 0..10u32 {
                    producer
                        .publish(&ctx, "bench", &n.to_string(), &n)
                        .await
                        .unwrap();
                }
                for _ in 0..10 {
                    let delivery = broker.fetch("bench", "g").await.unwrap();
                    broker.commit("g", &delivery).await.unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_codec, bench_publish_and_fetch);
criterion_main!(benches);
