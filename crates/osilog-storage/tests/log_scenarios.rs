//! End-to-end scenarios over a real log directory: append/read round
//! trips, rollover, crash repair, acceptor divergence, timestamp seeks,
//! retention, and the socket send path.

use bytes::Bytes;
use tempfile::TempDir;

use osilog_core::chunk::{ChunkHeader, ChunkType, CHUNK_HEADER_SIZE, LOG_HEADER_SIZE};
use osilog_core::index::{IndexRecord, INDEX_HEADER_SIZE, INDEX_RECORD_SIZE};
use osilog_core::RecordEntry;
use osilog_storage::{
    retention, truncate_to, AttachSpec, CounterSpec, Log, LogConfig, LogReader, ReaderOptions,
    RetentionSpec, Transport, WriteEntry,
};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn base_config(dir: &std::path::Path) -> LogConfig {
    LogConfig {
        dir: dir.to_path_buf(),
        name: "scenario".to_string(),
        epoch: 1,
        ..Default::default()
    }
}

fn simple(body: &str) -> WriteEntry {
    WriteEntry::Simple(Bytes::from(body.to_string()))
}

/// Attachable reader config sharing the writer's cells, with offset
/// readers unblocked up to the head.
fn reader_config(config: &LogConfig, log: &Log) -> LogConfig {
    let mut config = config.clone();
    log.shared()
        .set_committed_chunk_id(log.shared().get_last_chunk_id());
    config.shared = Some(log.shared().clone());
    config
}

fn body_text(entry: &RecordEntry) -> String {
    match entry {
        RecordEntry::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        RecordEntry::SubBatch { .. } => panic!("expected a simple entry"),
    }
}

// -------------------------------------------------------------------
// Scenario 1: append and read
// -------------------------------------------------------------------

#[test]
fn scenario_append_and_read() {
    let dir = TempDir::new().unwrap();
    let config = base_config(dir.path());
    let mut log = Log::open(config.clone()).unwrap();

    log.write(&[simple("a")], ChunkType::User, 1000, None).unwrap();
    log.write(&[simple("bb"), simple("ccc")], ChunkType::User, 2000, None)
        .unwrap();
    log.write(&[simple("d")], ChunkType::User, 3000, None).unwrap();

    let reader_config = reader_config(&config, &log);
    let mut reader =
        LogReader::attach_offset(&reader_config, AttachSpec::First, ReaderOptions::default())
            .unwrap();

    let mut records = Vec::new();
    while let Some(chunk) = reader.read_chunk_parsed().unwrap().ready() {
        for (offset, entry) in chunk.records {
            records.push((offset, body_text(&entry)));
        }
    }
    assert_eq!(
        records,
        vec![
            (0, "a".to_string()),
            (1, "bb".to_string()),
            (2, "ccc".to_string()),
            (3, "d".to_string()),
        ]
    );
    // nothing more readable
    assert!(reader.read_chunk_parsed().unwrap().ready().is_none());

    assert_eq!(log.shared().get_first_chunk_id(), 0);
    assert_eq!(log.tail_info().next_chunk_id, 4);
}

// -------------------------------------------------------------------
// Scenario 2: rollover on bytes
// -------------------------------------------------------------------

#[test]
fn scenario_rollover_on_bytes() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.max_segment_size_bytes = 1000;
    let mut log = Log::open(config.clone()).unwrap();

    // header 56 + filter 16 + frame 4 + body 24 = a 100-byte chunk
    let body = "x".repeat(24);
    for i in 0..20 {
        log.write(&[simple(&body)], ChunkType::User, 1000 + i, None)
            .unwrap();
    }
    assert_eq!(log.tail_info().next_chunk_id, 20);

    let mut segments: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.unwrap().file_name().into_string().ok())
        .filter(|n| n.ends_with(".segment"))
        .collect();
    segments.sort();
    assert_eq!(
        segments,
        vec![
            "00000000000000000000.segment".to_string(),
            "00000000000000000010.segment".to_string()
        ]
    );

    let reader_config = reader_config(&config, &log);
    let mut reader =
        LogReader::attach_offset(&reader_config, AttachSpec::First, ReaderOptions::default())
            .unwrap();
    let mut delivered = Vec::new();
    while let Some(chunk) = reader.read_chunk_parsed().unwrap().ready() {
        delivered.push(chunk.header.chunk_id);
    }
    assert_eq!(delivered, (0..20).collect::<Vec<u64>>());
}

// -------------------------------------------------------------------
// Scenario 3: corrupt tail recovery
// -------------------------------------------------------------------

#[test]
fn scenario_corrupt_tail_recovery() {
    let dir = TempDir::new().unwrap();
    let config = base_config(dir.path());
    {
        let mut log = Log::open(config.clone()).unwrap();
        for (i, body) in ["a", "b", "c"].iter().enumerate() {
            log.write(&[simple(body)], ChunkType::User, 1000 * (i as i64 + 1), None)
                .unwrap();
        }
    }

    // crash damage: a zeroed index record and a torn chunk torso
    let index_path = dir.path().join("00000000000000000000.index");
    let segment_path = dir.path().join("00000000000000000000.segment");
    let mut index = std::fs::read(index_path.clone()).unwrap();
    index.extend_from_slice(&[0u8; INDEX_RECORD_SIZE]);
    std::fs::write(&index_path, &index).unwrap();
    let mut segment = std::fs::read(segment_path.clone()).unwrap();
    let clean_segment_len = segment.len();
    segment.extend((0..40u8).map(|b| b.wrapping_mul(37)));
    std::fs::write(&segment_path, &segment).unwrap();

    let mut log = Log::open(config.clone()).unwrap();
    assert_eq!(log.tail_info().next_chunk_id, 3);
    assert_eq!(
        std::fs::metadata(&segment_path).unwrap().len() as usize,
        clean_segment_len
    );

    // recovery is idempotent: a second pass changes nothing
    let index_after = std::fs::read(&index_path).unwrap();
    let segment_after = std::fs::read(&segment_path).unwrap();
    drop(log);
    log = Log::open(config.clone()).unwrap();
    assert_eq!(std::fs::read(&index_path).unwrap(), index_after);
    assert_eq!(std::fs::read(&segment_path).unwrap(), segment_after);

    // and writes resume cleanly at chunk 3
    log.write(&[simple("resumed")], ChunkType::User, 4000, None)
        .unwrap();
    assert_eq!(log.tail_info().last_chunk.unwrap().chunk_id, 3);
    assert_eq!(log.tail_info().next_chunk_id, 4);
}

// -------------------------------------------------------------------
// Scenario 4: acceptor divergence
// -------------------------------------------------------------------

#[test]
fn scenario_acceptor_divergence() {
    let dir = TempDir::new().unwrap();

    // (epoch 1, id 0, n 5), (epoch 1, id 5, n 5)
    {
        let mut config = base_config(dir.path());
        config.epoch = 1;
        let mut log = Log::open(config).unwrap();
        for _ in 0..2 {
            let entries: Vec<WriteEntry> =
                (0..5).map(|i| simple(&format!("e1-{}", i))).collect();
            log.write(&entries, ChunkType::User, 1000, None).unwrap();
        }
    }
    // (epoch 2, id 10, n 5)
    {
        let mut config = base_config(dir.path());
        config.epoch = 2;
        let mut log = Log::open(config).unwrap();
        let entries: Vec<WriteEntry> = (0..5).map(|i| simple(&format!("e2-{}", i))).collect();
        log.write(&entries, ChunkType::User, 2000, None).unwrap();
    }

    let survivors = truncate_to(dir.path(), "scenario", Some((0, 12)), &[(2, 10), (1, 5)]).unwrap();
    assert_eq!(survivors.len(), 1);

    // the index ends exactly at chunk 10's record
    let index = std::fs::read(dir.path().join("00000000000000000000.index")).unwrap();
    assert_eq!((index.len() - INDEX_HEADER_SIZE) % INDEX_RECORD_SIZE, 0);
    let last_record =
        IndexRecord::decode(&index[index.len() - INDEX_RECORD_SIZE..]).unwrap();
    assert_eq!(last_record.chunk_id, 10);
    assert_eq!(last_record.epoch, 2);

    // the segment ends exactly at chunk 10's end
    let segment = std::fs::read(dir.path().join("00000000000000000000.segment")).unwrap();
    let header =
        ChunkHeader::decode(&segment[last_record.position as usize..]).unwrap();
    assert_eq!(
        segment.len() as u64,
        last_record.position as u64 + header.total_size()
    );

    // the writer's tail lands after chunk 10's records
    let mut config = base_config(dir.path());
    config.epoch = 2;
    let log = Log::open(config).unwrap();
    assert_eq!(log.tail_info().next_chunk_id, 15);
}

// -------------------------------------------------------------------
// Scenario 5: timestamp seek
// -------------------------------------------------------------------

#[test]
fn scenario_timestamp_seek() {
    let dir = TempDir::new().unwrap();
    let config = base_config(dir.path());
    let mut log = Log::open(config.clone()).unwrap();
    for ts in [1000i64, 2000, 3000, 4000] {
        log.write(&[simple(&format!("t{}", ts))], ChunkType::User, ts, None)
            .unwrap();
    }

    let reader_config = reader_config(&config, &log);
    let mut reader = LogReader::attach_offset(
        &reader_config,
        AttachSpec::Timestamp(2500),
        ReaderOptions::default(),
    )
    .unwrap();
    let chunk = reader.read_chunk().unwrap().ready().unwrap();
    assert_eq!(chunk.header.timestamp, 3000);

    // a timestamp past the head only sees future writes
    let mut ahead = LogReader::attach_offset(
        &reader_config,
        AttachSpec::Timestamp(9000),
        ReaderOptions::default(),
    )
    .unwrap();
    assert!(ahead.read_chunk().unwrap().ready().is_none());

    // a timestamp before all data attaches at the first chunk
    let mut behind = LogReader::attach_offset(
        &reader_config,
        AttachSpec::Timestamp(10),
        ReaderOptions::default(),
    )
    .unwrap();
    let chunk = behind.read_chunk().unwrap().ready().unwrap();
    assert_eq!(chunk.header.timestamp, 1000);
}

// -------------------------------------------------------------------
// Scenario 6: retention by age
// -------------------------------------------------------------------

#[test]
fn scenario_retention_by_age() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.max_segment_size_chunks = 5;
    config.counter_spec = Some(CounterSpec {
        name: "scenario-retention".to_string(),
        extra_fields: Vec::new(),
    });
    let mut log = Log::open(config.clone()).unwrap();

    let stale = now_ms() - 10 * 3600 * 1000;
    for i in 0..5 {
        log.write(&[simple("old")], ChunkType::User, stale + i, None)
            .unwrap();
    }
    let fresh = now_ms();
    for i in 0..5 {
        log.write(&[simple("new")], ChunkType::User, fresh + i, None)
            .unwrap();
    }

    let specs = [RetentionSpec::MaxAge {
        age: std::time::Duration::from_secs(3600),
    }];
    let report = retention::eval(
        "scenario-retention",
        dir.path(),
        &specs,
        Some(log.shared().clone()),
        log.counters().cloned(),
        None,
    )
    .unwrap();

    assert_eq!(report.segments_left, 1);
    assert_eq!(report.range, Some((5, 9)));
    assert!(report.first_timestamp >= fresh);

    assert!(!dir.path().join("00000000000000000000.segment").exists());
    assert!(dir.path().join("00000000000000000005.segment").exists());

    assert_eq!(log.shared().get_first_chunk_id(), 5);
    let counters = log.counters().unwrap();
    assert_eq!(counters.get("first_offset"), 5);
    assert_eq!(counters.get("segments"), 1);
    assert!(counters.get("first_timestamp") >= fresh);
}

// -------------------------------------------------------------------
// Structural invariants over the raw files
// -------------------------------------------------------------------

#[test]
fn invariant_adjacent_chunks_and_index_agree() {
    let dir = TempDir::new().unwrap();
    let config = base_config(dir.path());
    let mut log = Log::open(config).unwrap();
    log.write(&[simple("a"), simple("b")], ChunkType::User, 1000, None)
        .unwrap();
    log.write(
        &[WriteEntry::SubBatch {
            compression: 2,
            num_records: 3,
            uncompressed_len: 99,
            data: Bytes::from_static(b"zzz"),
        }],
        ChunkType::User,
        2000,
        None,
    )
    .unwrap();
    log.write(&[simple("c")], ChunkType::User, 3000, None).unwrap();
    drop(log);

    let segment = std::fs::read(dir.path().join("00000000000000000000.segment")).unwrap();
    let index = std::fs::read(dir.path().join("00000000000000000000.index")).unwrap();

    // walk the segment: dense ids, non-decreasing epochs, valid CRCs
    let mut position = LOG_HEADER_SIZE;
    let mut expected_id = 0u64;
    let mut last_epoch = 0u64;
    let mut headers = Vec::new();
    while position < segment.len() {
        let header = ChunkHeader::decode(&segment[position..]).unwrap();
        assert_eq!(header.chunk_id, expected_id);
        assert!(header.epoch >= last_epoch);
        let data_start = position + CHUNK_HEADER_SIZE + header.filter_size as usize;
        let data = &segment[data_start..data_start + header.data_size as usize];
        assert_eq!(crc32fast::hash(data), header.crc);
        headers.push((position, header));
        expected_id = header.next_chunk_id();
        last_epoch = header.epoch;
        position += header.total_size() as usize;
    }
    assert_eq!(position, segment.len());
    assert_eq!(expected_id, 6); // 2 + 3 + 1 records

    // every index record points at a chunk whose identity matches
    let record_count = (index.len() - INDEX_HEADER_SIZE) / INDEX_RECORD_SIZE;
    assert_eq!(record_count, headers.len());
    for (nth, (position, header)) in headers.iter().enumerate() {
        let at = INDEX_HEADER_SIZE + nth * INDEX_RECORD_SIZE;
        let record = IndexRecord::decode(&index[at..at + INDEX_RECORD_SIZE]).unwrap();
        assert_eq!(record.position as usize, *position);
        assert_eq!(record.chunk_id, header.chunk_id);
        assert_eq!(record.epoch, header.epoch);
        assert_eq!(record.timestamp, header.timestamp);
        assert_eq!(record.chunk_type, header.chunk_type);
    }
}

// -------------------------------------------------------------------
// Socket send path
// -------------------------------------------------------------------

#[tokio::test]
async fn send_path_streams_headers_and_data() {
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    let dir = TempDir::new().unwrap();
    let config = base_config(dir.path());
    let mut log = Log::open(config.clone()).unwrap();
    log.write(&[simple("hello"), simple("world")], ChunkType::User, 1000, None)
        .unwrap();
    let reader_config = reader_config(&config, &log);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let mut reader =
        LogReader::attach_offset(&reader_config, AttachSpec::First, ReaderOptions::default())
            .unwrap();
    let mut transport = Transport::Tcp(client);
    let sent = reader
        .send_chunk(&mut transport)
        .await
        .unwrap()
        .ready()
        .unwrap();
    transport.flush().await.unwrap();
    drop(transport);

    let mut wire = Vec::new();
    server.read_to_end(&mut wire).await.unwrap();
    assert_eq!(wire.len() as u64, sent);

    // offset readers put the header and the data region on the wire
    let header = ChunkHeader::decode(&wire).unwrap();
    assert_eq!(header.chunk_id, 0);
    assert_eq!(
        wire.len(),
        CHUNK_HEADER_SIZE + header.data_size as usize
    );
    let records =
        osilog_core::parse_entries(&Bytes::copy_from_slice(&wire[CHUNK_HEADER_SIZE..]), 0)
            .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(body_text(&records[0].1), "hello");
    assert_eq!(body_text(&records[1].1), "world");
}
