//! Permessage-deflate throughput benchmarks
//!
//! Measures the send path with and without compression, and the receive
//! path in both context modes.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rustapi_deflate::{
    CompressionConfig, CompressionLevel, Connection, MemoryTransport, Message, PayloadSink,
    ReaderFactory, WriterFactory,
};
use std::io::{Read, Write};

fn text_messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| Message::text(format!("planet: {i}, country: {i}, city: {i}, street: {i}")))
        .collect()
}

fn level(n: i32) -> CompressionLevel {
    CompressionLevel::new(n).unwrap()
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("deflate_write");
    let messages = text_messages(100);
    group.throughput(Throughput::Elements(1));

    let cases = [
        ("no_compression", CompressionConfig::disabled()),
        ("no_context_takeover", CompressionConfig::negotiated(false, level(1))),
        ("context_takeover", CompressionConfig::negotiated(true, level(2))),
    ];

    for (name, config) in cases {
        let mut conn = Connection::new(MemoryTransport::new(), config);
        let mut i = 0;
        group.bench_function(name, |b| {
            b.iter(|| {
                conn.write_message(black_box(&messages[i % messages.len()]))
                    .unwrap();
                i += 1;
                if conn.transport().sent().len() >= 1024 {
                    conn.transport_mut().take_sent();
                }
            })
        });
    }

    group.finish();
}

fn compressed_messages(factory: &mut WriterFactory, messages: &[Message]) -> Vec<Vec<u8>> {
    messages
        .iter()
        .map(|msg| {
            let mut writer = factory.new_writer(Vec::new(), level(1));
            writer.write_all(msg.payload()).unwrap();
            writer.finish().unwrap()
        })
        .collect()
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("deflate_read");
    let messages = text_messages(100);
    group.throughput(Throughput::Elements(1));

    let stateless = compressed_messages(&mut WriterFactory::no_context_takeover(), &messages);
    let mut readers = ReaderFactory::no_context_takeover();
    let mut i = 0;
    group.bench_function("no_context_takeover", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            readers
                .new_reader(black_box(&stateless[i % stateless.len()][..]))
                .read_to_end(&mut out)
                .unwrap();
            i += 1;
            out
        })
    });

    // Context takeover messages must be read in order, so each iteration
    // replays the whole sequence through a fresh reader.
    let contextual = compressed_messages(&mut WriterFactory::context_takeover(level(1)), &messages);
    group.throughput(Throughput::Elements(contextual.len() as u64));
    group.bench_function("context_takeover", |b| {
        b.iter(|| {
            let mut readers = ReaderFactory::context_takeover();
            let mut out = Vec::new();
            for compressed in &contextual {
                out.clear();
                readers
                    .new_reader(black_box(&compressed[..]))
                    .read_to_end(&mut out)
                    .unwrap();
            }
            out
        })
    });

    group.finish();
}

fn bench_close(c: &mut Criterion) {
    let mut factory = WriterFactory::no_context_takeover();
    c.bench_function("deflate_empty_message", |b| {
        b.iter(|| {
            let mut writer = factory.new_writer(Vec::new(), level(1));
            writer.close().unwrap();
            writer.finish().unwrap()
        })
    });
}

criterion_group!(benches, bench_write, bench_read, bench_close);
criterion_main!(benches);
