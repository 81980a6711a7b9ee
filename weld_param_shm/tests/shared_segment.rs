//! File-backed segment tests (`/dev/shm`)

use std::path::Path;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use weld::config::ParamShmConfig;
use weld_param_shm::{
    PROTOCOL_VERSION, ParameterId, ParameterReader, ParameterValue, ParameterWriter, ShmError,
    ShmResult, WeldCatalog, WeldRegion, segment_path,
};

fn config(tag: &str) -> ParamShmConfig {
    ParamShmConfig {
        segment_name: format!("test_{}_{}", tag, std::process::id()),
        lock_pages: false,
        ..ParamShmConfig::default()
    }
}

#[test]
fn test_create_and_open() -> ShmResult<()> {
    let config = config("open");
    let mut writer = ParameterWriter::create(WeldCatalog::full(), &config)?;
    let mut reader = ParameterReader::open(&config.segment_name, PROTOCOL_VERSION)?;

    writer.set_value(ParameterId(0), ParameterValue::F32(42.0))?;
    writer.commit();

    reader.wait_for_change(config.wait_timeout())?;
    assert_eq!(reader.drain_changes()?.len(), 1);
    assert_eq!(reader.read_value(ParameterId(0))?, ParameterValue::F32(42.0));
    assert!(reader.writer_alive());
    Ok(())
}

#[test]
fn test_segment_removed_with_writer() -> ShmResult<()> {
    let config = config("cleanup");
    let path = segment_path(&config.segment_name);

    let writer = ParameterWriter::create(WeldCatalog::full(), &config)?;
    assert!(Path::new(&path).exists());
    assert_eq!(
        std::fs::metadata(&path)?.len() as usize,
        WeldRegion::SIZE
    );

    drop(writer);
    assert!(!Path::new(&path).exists());
    Ok(())
}

#[test]
fn test_reader_keeps_mapping_after_writer_exit() -> ShmResult<()> {
    let config = config("orphan");
    let writer = ParameterWriter::create(WeldCatalog::full(), &config)?;
    let reader = ParameterReader::open(&config.segment_name, PROTOCOL_VERSION)?;

    drop(writer);

    // The mapping outlives the unlinked file, stamped as retired.
    assert!(matches!(
        reader.revalidate(),
        Err(ShmError::VersionMismatch { found: 0, .. })
    ));
    Ok(())
}

#[test]
fn test_second_writer_refused() -> ShmResult<()> {
    let config = config("exclusive");
    let _writer = ParameterWriter::create(WeldCatalog::full(), &config)?;

    let second = ParameterWriter::create(WeldCatalog::full(), &config);
    assert!(matches!(second, Err(ShmError::AlreadyExists { .. })));
    Ok(())
}

#[test]
fn test_open_missing_segment() {
    let result = ParameterReader::open(&config("missing").segment_name, PROTOCOL_VERSION);
    assert!(matches!(result, Err(ShmError::NotFound { .. })));
}

#[test]
fn test_version_mismatch_across_processes() -> ShmResult<()> {
    let config = ParamShmConfig {
        expected_version: 2,
        ..config("stale_version")
    };
    let _writer = ParameterWriter::create(WeldCatalog::full(), &config)?;

    let result = ParameterReader::open(&config.segment_name, 3);
    assert!(matches!(
        result,
        Err(ShmError::VersionMismatch {
            expected: 3,
            found: 2
        })
    ));
    Ok(())
}

#[test]
fn test_reader_thread_on_shared_file() -> ShmResult<()> {
    let config = config("threads");
    let mut writer = ParameterWriter::create(WeldCatalog::full(), &config)?;
    let name = config.segment_name.clone();
    let (attached_tx, attached_rx) = mpsc::channel();

    let handle = thread::spawn(move || -> ShmResult<u32> {
        let mut reader = ParameterReader::open(&name, PROTOCOL_VERSION)?;
        let _ = attached_tx.send(());
        let mut received = 0;
        while received < 3 {
            reader.wait_for_change(Duration::from_secs(5))?;
            received += reader.drain_changes()?.len() as u32;
        }
        Ok(received)
    });

    attached_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("reader did not attach");
    for n in 0..3u32 {
        writer.set_value(ParameterId(n), ParameterValue::F32(n as f32))?;
        writer.commit();
        thread::sleep(Duration::from_millis(10));
    }

    let received = handle.join().unwrap()?;
    assert!(received >= 3);
    Ok(())
}

#[test]
fn test_shared_region_handles() -> ShmResult<()> {
    let config = config("shared");
    let writer = ParameterWriter::create(WeldCatalog::full(), &config)?;
    let region = Arc::clone(writer.region());

    assert_eq!(region.name(), config.segment_name);
    assert_eq!(
        region.path(),
        Some(segment_path(&config.segment_name).as_str())
    );
    Ok(())
}
