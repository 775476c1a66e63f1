//! File-backed and multi-threaded capture sessions.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::sync::mpsc;
use std::sync::Barrier;
use std::time::Duration;

use proptest::prelude::*;

use retrace_capture::{CaptureConfig, CaptureIdPolicy, CaptureSession};
use retrace_core::{CallId, CaptureId, HandleCategory, ResultCode, SequenceNumber};
use retrace_format::{TraceReader, Value};

const CREATE_BUFFER: CallId = CallId(1);
const DRAW: CallId = CallId(2);
const DESTROY_BUFFER: CallId = CallId(3);

fn surrogate() -> CaptureConfig {
    CaptureConfig {
        capture_id_policy: CaptureIdPolicy::Surrogate,
        application_name: "capture-tests".into(),
        ..CaptureConfig::default()
    }
}

#[test]
fn file_session_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.rtrc");

    let session = CaptureSession::create(&path, surrogate()).unwrap();
    let mut enc = session.begin_lifetime(CREATE_BUFFER).unwrap();
    enc.encode_u64(256);
    let id = enc.encode_new_handle(HandleCategory::Buffer, 0xF00D).unwrap();
    enc.encode_result(ResultCode::SUCCESS);
    enc.end().unwrap();

    let mut enc = session.begin(DRAW).unwrap();
    enc.encode_handle(HandleCategory::Buffer, 0xF00D);
    enc.end().unwrap();

    let summary = session.finalize().unwrap();
    assert_eq!(summary.records_written, 2);
    drop(session);

    let reader = TraceReader::open(BufReader::new(File::open(&path).unwrap())).unwrap();
    assert_eq!(reader.header().metadata.application, "capture-tests");
    let records: Vec<_> = reader.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].call_id, CREATE_BUFFER);
    assert_eq!(
        records[1].decode_values().unwrap(),
        vec![Value::handle(HandleCategory::Buffer, id)]
    );
}

#[test]
fn drop_without_finalize_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.rtrc");
    {
        let session = CaptureSession::create(&path, CaptureConfig::default()).unwrap();
        let mut enc = session.begin(DRAW).unwrap();
        enc.encode_u32(3);
        enc.end().unwrap();
    }
    let reader = TraceReader::open(File::open(&path).unwrap()).unwrap();
    assert_eq!(reader.records().count(), 1);
}

#[test]
fn paused_calls_are_not_recorded() {
    let session = CaptureSession::from_writer(Vec::new(), CaptureConfig::default()).unwrap();
    session.pause().unwrap();
    assert!(session.begin(DRAW).is_none());
    session.resume().unwrap();
    session.begin(DRAW).unwrap().end().unwrap();
    let (bytes, summary) = session.finish().unwrap();
    assert_eq!(summary.records_written, 1);
    let reader = TraceReader::open(bytes.as_slice()).unwrap();
    assert_eq!(reader.records().count(), 1);
}

#[test]
fn concurrent_threads_produce_strictly_increasing_sequences() {
    const THREADS: usize = 4;
    const PER_THREAD: u64 = 50;

    let session = CaptureSession::from_writer(Vec::new(), surrogate()).unwrap();
    let barrier = Barrier::new(THREADS);

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let session = &session;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    let native = ((t as u64 + 1) << 32) | (i + 1);
                    let mut enc = session.begin_lifetime(CREATE_BUFFER).unwrap();
                    enc.encode_new_handle(HandleCategory::Buffer, native).unwrap();
                    enc.end().unwrap();

                    let mut enc = session.begin(DRAW).unwrap();
                    enc.encode_handle(HandleCategory::Buffer, native);
                    enc.end().unwrap();
                }
            });
        }
    });

    let (bytes, summary) = session.finish().unwrap();
    assert_eq!(summary.records_written, THREADS as u64 * PER_THREAD * 2);
    assert_eq!(summary.capture_ids_assigned, THREADS as u64 * PER_THREAD);

    let reader = TraceReader::open(bytes.as_slice()).unwrap();
    let mut last = SequenceNumber(0);
    let mut created: Vec<CaptureId> = Vec::new();
    let mut seen_threads = HashSet::new();
    for record in reader.records() {
        let record = record.unwrap();
        assert!(record.sequence > last);
        last = record.sequence;
        seen_threads.insert(record.thread_id);

        let values = record.decode_values().unwrap();
        let Some((HandleCategory::Buffer, id)) = values[0].as_handle().map(|(c, id)| (c, *id)) else {
            panic!("expected buffer handle");
        };
        if record.call_id == CREATE_BUFFER {
            created.push(id);
        } else {
            // Every use refers to a creation already in the file.
            assert!(created.contains(&id), "use of {id} before its creation");
        }
    }
    assert_eq!(seen_threads.len(), THREADS);

    // Surrogate ids reach the file in assignment order.
    let expected: Vec<CaptureId> = (1..=created.len() as u64).map(CaptureId).collect();
    assert_eq!(created, expected);
}

#[test]
fn open_lifetime_call_does_not_block_other_threads() {
    let session = CaptureSession::from_writer(Vec::new(), surrogate()).unwrap();
    let mut enc = session.begin_lifetime(CREATE_BUFFER).unwrap();
    enc.encode_new_handle(HandleCategory::Buffer, 0xB1).unwrap();
    enc.end().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    std::thread::scope(|scope| {
        // Begun, but the native creation has not returned yet.
        let mut creating = session.begin_lifetime(CREATE_BUFFER).unwrap();
        creating.encode_u64(256);

        let session = &session;
        scope.spawn(move || {
            let mut enc = session.begin(DRAW).unwrap();
            enc.encode_handle(HandleCategory::Buffer, 0xB1);
            let sequence = enc.end().unwrap();
            done_tx.send(sequence).unwrap();
        });
        let other = done_rx.recv_timeout(Duration::from_secs(5));
        assert_eq!(other, Ok(SequenceNumber(2)), "plain call waited on an open creation");

        creating.encode_new_handle(HandleCategory::Buffer, 0xB2).unwrap();
        assert_eq!(creating.end().unwrap(), SequenceNumber(3));
    });

    let (bytes, summary) = session.finish().unwrap();
    assert_eq!(summary.capture_ids_assigned, 2);
    let records: Vec<_> = TraceReader::open(bytes.as_slice())
        .unwrap()
        .records()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        records[1].decode_values().unwrap(),
        vec![Value::handle(HandleCategory::Buffer, CaptureId(1))]
    );
}

#[derive(Clone, Debug)]
enum LifetimeOp {
    Create(u64),
    Destroy(u64),
}

fn lifetime_op() -> impl Strategy<Value = LifetimeOp> {
    prop_oneof![
        (1u64..8).prop_map(LifetimeOp::Create),
        (1u64..8).prop_map(LifetimeOp::Destroy),
    ]
}

proptest! {
    /// Surrogate ids are handed out from 1 in creation order, never reused,
    /// and each is released at most once, however creations and destroys
    /// of recycled native values interleave.
    #[test]
    fn surrogate_ids_are_unique_and_increasing(ops in prop::collection::vec(lifetime_op(), 1..64)) {
        let session = CaptureSession::from_writer(Vec::new(), surrogate()).unwrap();
        for op in &ops {
            match *op {
                LifetimeOp::Create(native) => {
                    let mut enc = session.begin_lifetime(CREATE_BUFFER).unwrap();
                    enc.encode_new_handle(HandleCategory::Buffer, native).unwrap();
                    enc.end().unwrap();
                }
                LifetimeOp::Destroy(native) => {
                    let mut enc = session.begin_lifetime(DESTROY_BUFFER).unwrap();
                    enc.encode_destroyed_handle(HandleCategory::Buffer, native).unwrap();
                    enc.end().unwrap();
                }
            }
        }
        let (bytes, _) = session.finish().unwrap();

        let mut created: Vec<CaptureId> = Vec::new();
        let mut destroyed: HashSet<CaptureId> = HashSet::new();
        for record in TraceReader::open(bytes.as_slice()).unwrap().records() {
            let record = record.unwrap();
            let values = record.decode_values().unwrap();
            let id = values[0].as_handle().map(|(_, id)| *id).unwrap();
            if record.call_id == CREATE_BUFFER {
                created.push(id);
            } else if !id.is_null() {
                prop_assert!(created.contains(&id), "{} released before creation", id);
                prop_assert!(destroyed.insert(id), "{} released twice", id);
            }
        }
        let expected: Vec<CaptureId> = (1..=created.len() as u64).map(CaptureId).collect();
        prop_assert_eq!(created, expected);
    }
}
