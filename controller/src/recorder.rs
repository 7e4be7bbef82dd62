use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use greenhouse_common::{ActuatorId, RecorderSettings, StateRecord};

use crate::error::RecorderError;

const FILE_PREFIX: &str = "greenhouse_log_";
const FILE_SUFFIX: &str = ".jsonl";

pub trait StateRecorder: Send {
    fn append(&mut self, record: &StateRecord) -> Result<(), RecorderError>;

    fn flush(&mut self) -> Result<(), RecorderError>;
}

impl<R: StateRecorder + ?Sized> StateRecorder for Box<R> {
    fn append(&mut self, record: &StateRecord) -> Result<(), RecorderError> {
        (**self).append(record)
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        (**self).flush()
    }
}

#[derive(Debug)]
pub struct JsonLinesRecorder {
    directory: PathBuf,
    max_log_days: u32,
    current: Option<(NaiveDate, BufWriter<File>)>,
}

impl JsonLinesRecorder {
    pub fn open(settings: &RecorderSettings) -> Result<Self, RecorderError> {
        fs::create_dir_all(&settings.directory)?;
        info!(
            component = "recorder",
            directory = %settings.directory.display(),
            max_log_days = settings.max_log_days,
            "state log ready"
        );
        Ok(Self {
            directory: settings.directory.clone(),
            max_log_days: settings.max_log_days,
            current: None,
        })
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d")))
    }

    fn writer_for(&mut self, date: NaiveDate) -> Result<&mut BufWriter<File>, RecorderError> {
        let writer = match self.current.take() {
            Some((open, writer)) if open == date => writer,
            previous => {
                if let Some((_, mut previous)) = previous {
                    previous.flush()?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.file_for(date))?;
                self.cleanup_old_logs(date);
                BufWriter::new(file)
            }
        };

        let (_, writer) = self.current.insert((date, writer));
        Ok(writer)
    }

    pub fn cleanup_old_logs(&self, today: NaiveDate) {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(component = "recorder", "state log cleanup skipped: {err}");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(date) = log_date(&path) else {
                continue;
            };
            if (today - date).num_days() < i64::from(self.max_log_days) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(component = "recorder", path = %path.display(), "old state log removed");
                }
                Err(err) => {
                    warn!(component = "recorder", path = %path.display(), "failed to remove old state log: {err}");
                }
            }
        }
    }
}

impl StateRecorder for JsonLinesRecorder {
    fn append(&mut self, record: &StateRecord) -> Result<(), RecorderError> {
        let writer = self.writer_for(record.timestamp.date_naive())?;
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        if let Some((_, writer)) = &mut self.current {
            writer.flush()?;
        }
        Ok(())
    }
}

fn log_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stamp = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

/// Used when durable logging is disabled: records only reach the trace log.
#[derive(Debug, Default)]
pub struct TracingRecorder;

impl StateRecorder for TracingRecorder {
    fn append(&mut self, record: &StateRecord) -> Result<(), RecorderError> {
        debug!(
            component = "recorder",
            tick = record.tick,
            temperature_c = record.reading.temperature_c,
            valid = record.reading.valid,
            heater = record.actuators[ActuatorId::Heater].powered,
            vent_fan = record.actuators[ActuatorId::VentFan].powered,
            stand_fan = record.actuators[ActuatorId::StandFan].powered,
            grow_lights = record.actuators[ActuatorId::GrowLights].powered,
            "state record"
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        Ok(())
    }
}
