//! `serve`, `watch` and `dump` implementations

use crate::config::ParamctlConfig;
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use weld_param_shm::{
    ArraySelector, ChangeKind, ExtendedInfo, ParameterChange, ParameterId, ParameterReader,
    ParameterValue, ParameterWriter, ShmError, WeldCatalog,
};

/// Poll interval of the serve loop's shutdown check
const SERVE_POLL: Duration = Duration::from_millis(100);

/// Output format of `dump`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DumpFormat {
    /// One line per parameter
    Text,
    /// JSON array
    Json,
}

/// Create the segment, publish the configured values and hold it until
/// `running` is cleared.
pub fn serve(config: &ParamctlConfig, running: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    let mut writer = ParameterWriter::create(config.catalog()?, &config.segment)?;

    for (id, info) in config.initial_extended()? {
        writer.set_extended(id, &info)?;
    }
    for (id, value) in config.initial_values()? {
        writer.set_value(id, value)?;
    }
    let generation = writer.commit();

    info!(
        segment = %config.segment.segment_name,
        parameters = writer.catalog().present_count(),
        generation,
        "Serving parameters (Ctrl-C to stop)"
    );

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(SERVE_POLL);
    }

    drop(writer);
    info!("Parameter segment released");
    Ok(())
}

/// Follow committed changes until `running` is cleared.
pub fn watch(
    config: &ParamctlConfig,
    running: Arc<AtomicBool>,
    timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    let catalog = config.catalog()?;
    let mut reader = ParameterReader::open(
        &config.segment.segment_name,
        config.segment.expected_version,
    )?;
    info!(segment = reader.name(), "Watching parameter changes");

    let mut writer_reported = false;
    while running.load(Ordering::SeqCst) {
        match reader.wait_for_change(timeout) {
            Ok(()) => {
                writer_reported = false;
                for change in reader.drain_changes()? {
                    report_change(&reader, &catalog, change)?;
                }
            }
            Err(e) if e.is_recoverable() => {
                if !reader.writer_alive() && !writer_reported {
                    warn!(segment = reader.name(), "Writer process is gone");
                    writer_reported = true;
                }
                debug!("{e}");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn report_change(
    reader: &ParameterReader,
    catalog: &WeldCatalog,
    change: ParameterChange,
) -> Result<(), ShmError> {
    let name = catalog.name_of(change.id).unwrap_or("-");
    match change.kind {
        ChangeKind::ValueChanged => match reader.read_value(change.id) {
            Ok(value) => info!(id = %change.id, param = name, %value, "Value changed"),
            Err(ShmError::ParameterNotUsed { .. }) if catalog.is_present(change.id) => {
                info!(id = %change.id, param = name, "Parameter deactivated")
            }
            // A resync reports every slot, including ones never configured.
            Err(ShmError::ParameterNotUsed { .. }) => debug!(id = %change.id, "Slot inactive"),
            Err(e) => return Err(e),
        },
        ChangeKind::ExtendedChanged => match reader.read_extended(change.id) {
            Ok(metadata) => info!(id = %change.id, param = name, ?metadata, "Metadata changed"),
            Err(e) if e.is_recoverable() => warn!(id = %change.id, param = name, "{e}"),
            Err(e) => return Err(e),
        },
    }
    Ok(())
}

/// One `dump` record
#[derive(Debug, Serialize)]
struct DumpEntry<'a> {
    id: ParameterId,
    array: ArraySelector,
    index: usize,
    name: Option<&'a str>,
    value: ParameterValue,
    extended: Option<ExtendedInfo>,
}

/// Print every used parameter.
pub fn dump(config: &ParamctlConfig, format: DumpFormat) -> Result<(), Box<dyn Error>> {
    let catalog = config.catalog()?;
    let reader = ParameterReader::open(
        &config.segment.segment_name,
        config.segment.expected_version,
    )?;

    let mut entries = Vec::new();
    for (id, value) in reader.snapshot()? {
        let Some(slot) = WeldCatalog::locate(id) else {
            continue;
        };
        entries.push(DumpEntry {
            id,
            array: slot.array,
            index: slot.index,
            name: catalog.name_of(id),
            value,
            extended: reader.read_extended(id).ok(),
        });
    }

    match format {
        DumpFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        DumpFormat::Text => {
            for entry in &entries {
                println!(
                    "{:>4}  {:<8} {:>3}  {:<24} {}",
                    entry.id.0,
                    format!("{:?}", entry.array).to_lowercase(),
                    entry.index,
                    entry.name.unwrap_or("-"),
                    entry.value
                );
            }
        }
    }
    Ok(())
}
