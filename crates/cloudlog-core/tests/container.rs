use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::panic;
use std::path::{Path, PathBuf};

use cloudlog_core::container::{
    Channel, ContainerError, LogReader, LogWriter, Message, Schema, WriterOptions, LIBRARY,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn message(channel_id: u16, sequence: u32, log_time: u64, data: &[u8]) -> Message<'_> {
    Message {
        channel_id,
        sequence,
        log_time,
        publish_time: log_time,
        data: Cow::Borrowed(data),
    }
}

fn open_writer(dir: &TempDir, name: &str, options: WriterOptions) -> (LogWriter, PathBuf) {
    let path = dir.path().join(name);
    let writer = LogWriter::create(&path, options).unwrap();
    (writer, path)
}

/// Schema with two channels; returns their ids
fn register_two_channels(writer: &mut LogWriter) -> (u16, u16) {
    let schema = writer
        .add_schema(&Schema::new("PointCloud", "flatbuffer", b"descriptor".to_vec()))
        .unwrap();
    let front = writer
        .add_channel(&Channel::new("front", "flatbuffer", schema))
        .unwrap();
    let rear = writer
        .add_channel(&Channel::new("rear", "flatbuffer", schema))
        .unwrap();
    (front, rear)
}

/// Ten messages alternating between two channels, 10 ns apart
fn write_interleaved(path: &Path) {
    let mut writer = LogWriter::create(path, WriterOptions::default()).unwrap();
    let (front, rear) = register_two_channels(&mut writer);
    for i in 0..10u32 {
        let channel = if i % 2 == 0 { front } else { rear };
        let payload = [i as u8; 4];
        writer
            .write(&message(channel, i / 2, u64::from(i) * 10, &payload))
            .unwrap();
    }
    writer.close().unwrap();
}

#[test]
fn test_write_requires_registered_channel() {
    let dir = TempDir::new().unwrap();
    let (mut writer, _) = open_writer(&dir, "channels.mcap", WriterOptions::default());

    assert!(matches!(
        writer.write(&message(0, 0, 1, b"x")),
        Err(ContainerError::UnknownChannel(0))
    ));

    let (front, _) = register_two_channels(&mut writer);
    writer.write(&message(front, 0, 1, b"x")).unwrap();
    assert!(matches!(
        writer.write(&message(7, 0, 2, b"x")),
        Err(ContainerError::UnknownChannel(7))
    ));

    let stats = writer.close().unwrap().unwrap();
    assert_eq!(stats.message_count, 1);
}

#[test]
fn test_channel_with_unknown_schema_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut writer, _) = open_writer(&dir, "schema.mcap", WriterOptions::default());
    assert!(matches!(
        writer.add_channel(&Channel::new("pointcloud", "flatbuffer", 3)),
        Err(ContainerError::UnknownSchema(3))
    ));
}

#[test]
fn test_sequence_must_increase_per_channel() {
    let dir = TempDir::new().unwrap();
    let (mut writer, _) = open_writer(&dir, "sequence.mcap", WriterOptions::default());
    let (front, rear) = register_two_channels(&mut writer);

    writer.write(&message(front, 5, 1, b"a")).unwrap();
    let err = writer.write(&message(front, 5, 2, b"b")).unwrap_err();
    assert!(matches!(
        err,
        ContainerError::NonMonotonicSequence {
            previous: 5,
            sequence: 5,
            ..
        }
    ));

    // Other channels keep their own counter
    writer.write(&message(rear, 0, 3, b"c")).unwrap();
    writer.write(&message(front, 6, 4, b"d")).unwrap();
    assert_eq!(writer.close().unwrap().unwrap().message_count, 3);
}

#[test]
fn test_empty_container_is_valid() {
    let dir = TempDir::new().unwrap();
    let (mut writer, path) = open_writer(&dir, "empty.mcap", WriterOptions::default());
    let (front, _) = register_two_channels(&mut writer);

    let stats = writer.close().unwrap().unwrap();
    assert_eq!(stats.message_count, 0);
    assert_eq!(stats.channel_count, 2);
    assert!(writer.close().unwrap().is_none());

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.header().library, LIBRARY);
    assert_eq!(reader.statistics().message_count, 0);
    assert_eq!(reader.statistics().message_start_time, 0);
    assert_eq!(reader.message_index(front), Some(&[][..]));
    assert_eq!(reader.messages().count(), 0);
    reader.verify_data_crc().unwrap();
}

#[test]
fn test_random_access_through_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("interleaved.mcap");
    write_interleaved(&path);

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.schemas().count(), 1);
    assert_eq!(
        reader.channels().map(|c| c.topic.as_str()).collect::<Vec<_>>(),
        vec!["front", "rear"]
    );
    assert_eq!(reader.statistics().message_count, 10);
    assert_eq!(reader.statistics().message_end_time, 90);
    assert_eq!(reader.statistics().channel_message_counts[&1], 5);

    let third_rear = reader.read_message(1, 2).unwrap().unwrap();
    assert_eq!(third_rear.sequence, 2);
    assert_eq!(third_rear.log_time, 50);
    assert_eq!(&third_rear.data[..], &[5u8; 4]);
    assert!(reader.read_message(1, 5).unwrap().is_none());
    assert!(matches!(
        reader.read_message(9, 0),
        Err(ContainerError::UnknownChannel(9))
    ));

    let front: Vec<u32> = reader
        .channel_messages(0)
        .map(|m| m.unwrap().sequence)
        .collect();
    assert_eq!(front, vec![0, 1, 2, 3, 4]);

    let times: Vec<u64> = reader
        .messages_in_range(20, 40)
        .map(|m| m.unwrap().log_time)
        .collect();
    assert_eq!(times, vec![20, 30, 40]);

    let all: Vec<u64> = reader.messages().map(|m| m.unwrap().log_time).collect();
    assert_eq!(all, (0..10).map(|i| i * 10).collect::<Vec<u64>>());
}

#[test]
fn test_terminate_leaves_incomplete_file() {
    let dir = TempDir::new().unwrap();
    let (mut writer, path) = open_writer(&dir, "partial.mcap", WriterOptions::default());
    let (front, _) = register_two_channels(&mut writer);
    writer.write(&message(front, 0, 100, b"payload")).unwrap();

    assert_eq!(writer.terminate(), Some(path.clone()));
    assert!(!writer.is_open());

    assert!(matches!(
        LogReader::open(&path),
        Err(ContainerError::Incomplete)
    ));

    let report = LogReader::scan(&path).unwrap();
    assert!(!report.finalized);
    assert!(report.error.is_none());
    assert_eq!(report.valid_len, fs::metadata(&path).unwrap().len());
    assert_eq!(report.registry.channel_count(), 2);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(&report.messages[0].data[..], b"payload");
    assert_eq!(report.statistics.message_count, 1);
}

#[test]
fn test_scan_recovers_truncated_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.mcap");
    write_interleaved(&path);

    // Cut the file in the middle of the last message's payload
    let bytes = fs::read(&path).unwrap();
    let reader = LogReader::from_bytes(bytes.clone()).unwrap();
    let last = reader.message_index(1).unwrap()[4].offset as usize;
    let cut = &bytes[..last + 12];

    let report = LogReader::scan_bytes(cut).unwrap();
    assert!(!report.finalized);
    assert!(report.error.is_some());
    assert_eq!(report.valid_len, last as u64);
    assert_eq!(report.messages.len(), 9);
    assert!(matches!(
        LogReader::from_bytes(cut.to_vec()),
        Err(ContainerError::Incomplete)
    ));
}

#[test]
fn test_scan_of_finalized_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("complete.mcap");
    write_interleaved(&path);

    let report = LogReader::scan(&path).unwrap();
    assert!(report.finalized);
    assert!(report.error.is_none());
    assert_eq!(report.messages.len(), 10);
    assert_eq!(
        report.statistics,
        LogReader::open(&path).unwrap().statistics().clone()
    );
}

#[test]
fn test_summary_corruption_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.mcap");
    write_interleaved(&path);

    let mut bytes = fs::read(&path).unwrap();
    let summary_start = LogReader::from_bytes(bytes.clone())
        .unwrap()
        .footer()
        .summary_start as usize;
    bytes[summary_start + 12] ^= 0xFF;

    assert!(matches!(
        LogReader::from_bytes(bytes),
        Err(ContainerError::CrcMismatch { .. })
    ));
}

#[test]
fn test_data_corruption_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("payload.mcap");
    write_interleaved(&path);

    let mut bytes = fs::read(&path).unwrap();
    let offset = LogReader::from_bytes(bytes.clone())
        .unwrap()
        .message_index(0)
        .unwrap()[0]
        .offset as usize;
    // Last byte of the first payload
    bytes[offset + 9 + 22 + 3] ^= 0xFF;

    let reader = LogReader::from_bytes(bytes).unwrap();
    assert!(matches!(
        reader.verify_data_crc(),
        Err(ContainerError::CrcMismatch { .. })
    ));
}

#[test]
fn test_bad_magic_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("text.mcap");
    fs::write(&path, "definitely not a container").unwrap();

    assert!(matches!(
        LogReader::open(&path),
        Err(ContainerError::InvalidMagic)
    ));
    assert!(matches!(
        LogReader::scan(&path),
        Err(ContainerError::InvalidMagic)
    ));
}

#[test]
fn test_metadata_indexed() {
    let dir = TempDir::new().unwrap();
    let (mut writer, path) = open_writer(&dir, "metadata.mcap", WriterOptions::default());

    let mut robot = BTreeMap::new();
    robot.insert("name".to_string(), "bot-1".to_string());
    writer.add_metadata("robot", robot.clone()).unwrap();
    writer.add_metadata("empty", BTreeMap::new()).unwrap();
    writer.close().unwrap();

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.statistics().metadata_count, 2);
    assert_eq!(
        reader.metadata_names().collect::<Vec<_>>(),
        vec!["robot", "empty"]
    );
    assert_eq!(reader.metadata("robot").unwrap().unwrap().metadata, robot);
    assert!(reader.metadata("missing").unwrap().is_none());
}

#[test]
fn test_without_summary_indexes_rebuilt() {
    let dir = TempDir::new().unwrap();
    let options = WriterOptions {
        emit_summary: false,
        ..WriterOptions::default()
    };
    let (mut writer, path) = open_writer(&dir, "bare.mcap", options);
    let (front, rear) = register_two_channels(&mut writer);
    writer.write(&message(front, 0, 10, b"a")).unwrap();
    writer.write(&message(rear, 0, 20, b"b")).unwrap();
    writer.add_metadata("note", BTreeMap::new()).unwrap();
    writer.close().unwrap();

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.footer().summary_start, 0);
    assert_eq!(reader.channels().count(), 2);
    assert_eq!(reader.statistics().message_count, 2);
    assert_eq!(reader.statistics().channel_count, 2);
    assert_eq!(reader.read_message(rear, 0).unwrap().unwrap().log_time, 20);
    assert!(reader.metadata("note").unwrap().is_some());
    reader.verify_data_crc().unwrap();
}

#[test]
fn test_drop_finalizes_open_writer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dropped.mcap");
    {
        let mut writer = LogWriter::create(&path, WriterOptions::default()).unwrap();
        let (front, _) = register_two_channels(&mut writer);
        writer.write(&message(front, 0, 1, b"kept")).unwrap();
    }

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.statistics().message_count, 1);
}

#[test]
fn test_panic_unwind_does_not_finalize() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unwound.mcap");

    let outcome = panic::catch_unwind(|| {
        let mut writer = LogWriter::create(&path, WriterOptions::default()).unwrap();
        let (front, _) = register_two_channels(&mut writer);
        writer.write(&message(front, 0, 1, b"kept")).unwrap();
        panic!("producer thread died");
    });
    assert!(outcome.is_err());

    assert!(matches!(LogReader::open(&path), Err(ContainerError::Incomplete)));
    assert_eq!(LogReader::scan(&path).unwrap().messages.len(), 1);
}

#[cfg(target_os = "linux")]
#[test]
fn test_failed_header_removes_created_file() {
    let dir = TempDir::new().unwrap();
    // Every write through the link fails with ENOSPC
    let link = dir.path().join("full.mcap");
    std::os::unix::fs::symlink("/dev/full", &link).unwrap();

    let mut writer = LogWriter::new();
    let options = WriterOptions {
        buffer_size: 0,
        ..WriterOptions::default()
    };
    let err = writer.open(&link, options).unwrap_err();
    assert!(matches!(err, ContainerError::Io(_)));
    assert!(!writer.is_open());
    assert!(fs::symlink_metadata(&link).is_err());
}

#[test]
fn test_registry_records_written_once() {
    let dir = TempDir::new().unwrap();
    let (mut writer, path) = open_writer(&dir, "once.mcap", WriterOptions::default());
    let schema = Schema::new("PointCloud", "flatbuffer", b"descriptor".to_vec());
    let first = writer.add_schema(&schema).unwrap();
    let position = writer.position();
    assert_eq!(writer.add_schema(&schema).unwrap(), first);
    assert_eq!(writer.position(), position);

    assert!(matches!(
        writer.add_schema(&Schema::new("PointCloud", "flatbuffer", b"other".to_vec())),
        Err(ContainerError::DuplicateSchema { .. })
    ));
    writer.close().unwrap();

    let report = LogReader::scan(&path).unwrap();
    assert_eq!(report.registry.schema_count(), 1);
}
