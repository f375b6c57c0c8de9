use std::sync::{Arc, Mutex};

use spanscan::codec::{encode_sample, row_key};
use spanscan::{
    Cell, IdWidths, LatencySink, MemStore, RowScanner, SampleValue, ScanConfig, ScanError,
    ScanEvent, ScanEventListener, ScanQuery, ScanSpec, SpanScanner, Spans, StoreClient, TagPair,
    Timestamp,
};

const WIDTHS: IdWidths = IdWidths::new(1, 1, 1);
const METRIC: [u8; 1] = [1];

#[derive(Debug, Default)]
struct Events(Mutex<Vec<ScanEvent>>);

impl ScanEventListener for Events {
    fn on_event(&self, event: ScanEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[derive(Debug, Default)]
struct Latencies(Mutex<Vec<u64>>);

impl LatencySink for Latencies {
    fn record_latency(&self, millis: u64) {
        self.0.lock().unwrap().push(millis);
    }
}

/// Store replaying fixed batches, in the given order, on every scan.
#[derive(Debug)]
struct ScriptedStore {
    batches: Vec<Result<Vec<Vec<Cell>>, String>>,
}

struct ScriptedScanner<'a> {
    batches: std::slice::Iter<'a, Result<Vec<Vec<Cell>>, String>>,
}

impl StoreClient for ScriptedStore {
    fn open_scanner(&self, _spec: &ScanSpec) -> Result<Box<dyn RowScanner + '_>, ScanError> {
        Ok(Box::new(ScriptedScanner {
            batches: self.batches.iter(),
        }))
    }
}

impl RowScanner for ScriptedScanner<'_> {
    fn next_rows(&mut self) -> Result<Option<Vec<Vec<Cell>>>, ScanError> {
        match self.batches.next() {
            None => Ok(None),
            Some(Ok(rows)) => Ok(Some(rows.clone())),
            Some(Err(e)) => Err(ScanError::Store(e.clone())),
        }
    }
}

struct Harness {
    scanner: SpanScanner,
    events: Arc<Events>,
    latencies: Arc<Latencies>,
}

fn harness(store: Arc<dyn StoreClient>) -> Harness {
    let events = Arc::new(Events::default());
    let latencies = Arc::new(Latencies::default());
    let config = ScanConfig {
        id_widths: Arc::new(WIDTHS),
        max_rows_per_batch: 2,
        event_listener: events.clone(),
        latency_sink: latencies.clone(),
        ..ScanConfig::default()
    };
    Harness {
        scanner: SpanScanner::new(store, config),
        events,
        latencies,
    }
}

fn host(v: u8) -> Vec<TagPair> {
    vec![TagPair::new(vec![1], vec![v])]
}

/// A compacted row of `metric` with integer samples at the given deltas.
fn compacted_row(metric: &[u8], base: Timestamp, tags: &[TagPair], deltas: &[u16]) -> Vec<Cell> {
    let key = row_key(&WIDTHS, metric, base, tags).unwrap();
    let mut qualifier = Vec::new();
    let mut value = Vec::new();
    for &d in deltas {
        let (q, v) = encode_sample(d, SampleValue::Int(d as i64));
        qualifier.extend_from_slice(&q);
        value.extend_from_slice(&v);
    }
    vec![Cell::new(key, b"t".to_vec(), qualifier, value)]
}

fn mem_store(samples: &[(Vec<TagPair>, Timestamp, i64)]) -> Arc<MemStore> {
    let store = Arc::new(MemStore::new("tsdb"));
    for (tags, ts, v) in samples {
        store
            .put_sample(&WIDTHS, b"t", &METRIC, tags, *ts, SampleValue::Int(*v))
            .unwrap();
    }
    store
}

fn all_timestamps(spans: &Spans) -> Vec<Vec<Timestamp>> {
    spans.values().map(|s| s.timestamps()).collect()
}

#[test]
fn open_ended_scan_reaches_the_last_bucket() {
    let last_bucket = u32::MAX as u64 - 3600;
    let store = mem_store(&[(host(1), 10, 1), (host(1), last_bucket, 2)]);
    let h = harness(store);

    let spans = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0))
        .unwrap()
        .unwrap();
    assert_eq!(spans.values().next().unwrap().len(), 2);

    let bounded = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0).with_end(3600))
        .unwrap()
        .unwrap();
    assert_eq!(all_timestamps(&bounded), vec![vec![10]]);
}

#[test]
fn row_of_another_metric_is_a_protocol_violation() {
    let store = ScriptedStore {
        batches: vec![Ok(vec![
            compacted_row(&METRIC, 0, &host(1), &[0]),
            compacted_row(&[2], 0, &host(1), &[0]),
        ])],
    };
    let h = harness(Arc::new(store));
    let err = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0))
        .unwrap_err();
    assert!(matches!(err, ScanError::ProtocolViolation(_)), "{err}");
    assert_eq!(h.latencies.0.lock().unwrap().len(), 1);
}

#[test]
fn store_failure_is_terminal_and_still_records_latency() {
    let store = ScriptedStore {
        batches: vec![
            Ok(vec![compacted_row(&METRIC, 0, &host(1), &[0])]),
            Err("region server went away".to_string()),
        ],
    };
    let h = harness(Arc::new(store));
    let err = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0))
        .unwrap_err();
    assert!(matches!(err, ScanError::Store(_)));
    assert_eq!(h.latencies.0.lock().unwrap().len(), 1);
    let events = h.events.0.lock().unwrap();
    assert!(matches!(events.last(), Some(ScanEvent::ScanFailed { .. })));
}

#[test]
fn row_without_cells_is_malformed() {
    let store = ScriptedStore {
        batches: vec![Ok(vec![Vec::new()])],
    };
    let h = harness(Arc::new(store));
    assert!(matches!(
        h.scanner.find_spans(&ScanQuery::new(METRIC.to_vec(), 0)),
        Err(ScanError::MalformedRow(_))
    ));
}

#[test]
fn out_of_order_row_is_dropped_without_failing_the_scan() {
    let store = ScriptedStore {
        batches: vec![
            Ok(vec![compacted_row(&METRIC, 7200, &host(1), &[0, 30])]),
            Ok(vec![
                compacted_row(&METRIC, 3600, &host(1), &[5]),
                compacted_row(&METRIC, 7200, &host(2), &[1]),
            ]),
        ],
    };
    let h = harness(Arc::new(store));
    let spans = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0))
        .unwrap()
        .unwrap();

    assert_eq!(all_timestamps(&spans), vec![vec![7200, 7230], vec![7201]]);
    let events = h.events.0.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ScanEvent::RowOutOfOrder {
            last_timestamp: 7230,
            first_timestamp: 3605,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(ScanEvent::ScanCompleted { rows: 3, spans: 2, .. })
    ));
}

#[test]
fn redelivered_row_does_not_duplicate_samples() {
    let first = compacted_row(&METRIC, 0, &host(1), &[0, 10]);
    let store = ScriptedStore {
        batches: vec![
            Ok(vec![first.clone()]),
            Ok(vec![first, compacted_row(&METRIC, 3600, &host(1), &[0])]),
        ],
    };
    let h = harness(Arc::new(store));
    let spans = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0))
        .unwrap()
        .unwrap();
    assert_eq!(all_timestamps(&spans), vec![vec![0, 10, 3600]]);
    assert!(h
        .events
        .0
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ScanEvent::RowRedelivered { base_time: 0, .. })));
}

#[test]
fn resumed_scanner_resending_a_merged_row_is_not_out_of_order() {
    let second = compacted_row(&METRIC, 3600, &host(1), &[0, 5]);
    let store = ScriptedStore {
        batches: vec![
            Ok(vec![compacted_row(&METRIC, 0, &host(1), &[0, 10]), second.clone()]),
            Ok(vec![second]),
        ],
    };
    let h = harness(Arc::new(store));
    let spans = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0))
        .unwrap()
        .unwrap();
    assert_eq!(all_timestamps(&spans), vec![vec![0, 10, 3600, 3605]]);
    let events = h.events.0.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ScanEvent::RowRedelivered { base_time: 3600, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ScanEvent::RowOutOfOrder { .. })));
}

#[test]
fn repeated_scans_return_the_same_spans() {
    let store = mem_store(&[
        (host(1), 0, 1),
        (host(1), 3599, 2),
        (host(2), 100, 3),
        (host(1), 3600, 4),
    ]);
    let h = harness(store);
    let q = ScanQuery::new(METRIC.to_vec(), 0);
    let a = h.scanner.find_spans(&q).unwrap().unwrap();
    let b = h.scanner.find_spans(&q).unwrap().unwrap();
    assert_eq!(all_timestamps(&a), all_timestamps(&b));
    let values = |s: &Spans| -> Vec<SampleValue> { s.values().flat_map(|sp| sp.iter().map(|dp| dp.value)).collect() };
    assert_eq!(values(&a), values(&b));
    assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
}

#[test]
fn adjacent_rows_merge_and_distant_rows_split() {
    let store = mem_store(&[
        (host(1), 0, 1),
        (host(1), 3600, 2),
        (host(1), 4000, 3),
        (host(1), 7200 + 3000, 4),
    ]);
    let h = harness(store);
    let spans = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0))
        .unwrap()
        .unwrap();
    let span = spans.values().next().unwrap();
    assert_eq!(span.rows().len(), 2);
    assert_eq!(span.rows()[0].len(), 3);
    assert_eq!(span.timestamps(), vec![0, 3600, 4000, 10200]);
}

#[test]
fn no_matching_rows_is_none_and_records_latency() {
    let store = mem_store(&[(host(1), 0, 1)]);
    let h = harness(store);
    let r = h
        .scanner
        .find_spans(&ScanQuery::new(vec![9], 0))
        .unwrap();
    assert!(r.is_none());
    assert_eq!(h.latencies.0.lock().unwrap().len(), 1);
}

#[test]
fn tag_and_group_by_constraints_select_series() {
    let mut dc_a = host(1);
    dc_a.push(TagPair::new(vec![2], vec![10]));
    let mut dc_b = host(2);
    dc_b.push(TagPair::new(vec![2], vec![11]));
    let store = mem_store(&[(dc_a.clone(), 0, 1), (dc_b, 0, 2), (host(3), 0, 3)]);
    let h = harness(store);

    let fixed = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0).with_tag(vec![2], vec![10]))
        .unwrap()
        .unwrap();
    assert_eq!(fixed.len(), 1);
    let key = fixed.keys().next().unwrap();
    assert_eq!(key.tag_bytes(), &[1, 1, 2, 10]);

    let grouped = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0).with_group_by(vec![2]))
        .unwrap()
        .unwrap();
    assert_eq!(grouped.len(), 2);

    let allowed = h
        .scanner
        .find_spans(
            &ScanQuery::new(METRIC.to_vec(), 0).with_group_by_values(vec![2], vec![vec![11]]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(allowed.len(), 1);
}

#[test]
fn tag_also_grouped_by_is_rejected() {
    let h = harness(mem_store(&[]));
    let q = ScanQuery::new(METRIC.to_vec(), 0)
        .with_tag(vec![1], vec![1])
        .with_group_by(vec![1]);
    assert!(matches!(
        h.scanner.find_spans(&q),
        Err(ScanError::InvariantViolation(_))
    ));
}

#[test]
fn downsample_is_pushed_down_to_the_store() {
    let samples: Vec<_> = (0..10).map(|s| (host(1), s as Timestamp, s as i64)).collect();
    let h = harness(mem_store(&samples));
    let spans = h
        .scanner
        .find_spans(&ScanQuery::new(METRIC.to_vec(), 0).with_downsample(3))
        .unwrap()
        .unwrap();
    assert_eq!(all_timestamps(&spans), vec![vec![0, 3, 6, 9]]);
}
