// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for IPP message parsing and encoding, full request
// dispatch, and event publication to pull subscriptions.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use infraprint_core::config::ServerConfig;
use infraprint_core::types::{EventMask, NotifyEvent};
use infraprint_server::codec::{
    self, IppMessage, OP_GET_PRINTER_ATTRIBUTES, OP_PRINT_JOB, TAG_OPERATION_ATTRIBUTES,
};
use infraprint_server::{Printer, process_request};

const PRINTER_URI: &str = "ipp://benchhost:8631/ipp/print";

fn printer() -> Arc<Printer> {
    let config = ServerConfig {
        hostname: "benchhost".into(),
        port: 8631,
        spool_dir: std::env::temp_dir().join("infraprint-bench"),
        advertise_dns_sd: false,
        ..ServerConfig::default()
    };
    Arc::new(Printer::new(&config))
}

fn request(op: u16) -> IppMessage {
    let mut request = IppMessage::new_request(op, 42);
    request
        .group_mut(TAG_OPERATION_ATTRIBUTES)
        .uri("printer-uri", PRINTER_URI)
        .name_attr("requesting-user-name", "bench");
    request
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

fn bench_parse_minimal(c: &mut Criterion) {
    let data = request(OP_GET_PRINTER_ATTRIBUTES).to_bytes();

    c.bench_function("parse (Get-Printer-Attributes)", |b| {
        b.iter(|| {
            let result = codec::parse(black_box(&data));
            assert!(result.is_ok());
        });
    });
}

fn bench_parse_with_document(c: &mut Criterion) {
    let mut message = request(OP_PRINT_JOB);
    message
        .group_mut(TAG_OPERATION_ATTRIBUTES)
        .name_attr("job-name", "bench")
        .mime_type("document-format", "application/pdf");
    message.data = vec![0xAB; 64 * 1024];
    let data = message.to_bytes();

    c.bench_function("parse (Print-Job, 64 KiB)", |b| {
        b.iter(|| {
            let result = codec::parse(black_box(&data));
            assert!(result.is_ok());
        });
    });
}

fn bench_printer_attributes_response(c: &mut Criterion) {
    let printer = printer();
    let req = request(OP_GET_PRINTER_ATTRIBUTES);

    c.bench_function("dispatch + encode (Get-Printer-Attributes)", |b| {
        b.iter(|| {
            let response = process_request(&printer, black_box(&req), None, "bench");
            black_box(response.to_bytes());
        });
    });
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

fn bench_event_publication(c: &mut Criterion) {
    let printer = printer();
    for _ in 0..16 {
        printer.add_subscription(EventMask::all(), None, "bench", Vec::new(), 0);
    }

    c.bench_function("add_event (16 subscriptions)", |b| {
        b.iter(|| {
            printer.add_event(
                None,
                EventMask::only(NotifyEvent::PrinterStateChanged),
                black_box("Printer state changed."),
            );
        });
    });
}

criterion_group!(
    benches,
    bench_parse_minimal,
    bench_parse_with_document,
    bench_printer_attributes_response,
    bench_event_publication,
);
criterion_main!(benches);
