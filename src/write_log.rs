//! Register Write Logs
//!
//! A write log is a CSV list of timed register writes
//! (`cycle,chip,addr,value`), enough to drive the emulator without a CPU.
//! Addresses and values accept decimal, `0x18` or `$18` notation.
//!
//! [`WriteLogPlayer`] replays a log through the scheduler: one event fires at
//! each distinct cycle and performs every write due by then.

use crate::audio::AudioDriver;
use crate::event::{EventId, EventScheduler, Phase};
use crate::fake_stereo::FakeStereo;
use crate::mixer::SidMixer;
use crate::{Result, SidError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, trace};

/// One timed register write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRecord {
    /// Cycle the write happens at
    pub cycle: u64,
    /// Mixer slot
    pub chip: usize,
    /// Register address
    #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_byte")]
    pub addr: u8,
    /// Byte written
    #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_byte")]
    pub value: u8,
}

fn serialize_hex<S: Serializer>(byte: &u8, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{byte:02X}"))
}

fn deserialize_byte<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u8, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_byte(&text).map_err(serde::de::Error::custom)
}

/// Parse `24`, `0x18` or `$18`
pub fn parse_byte(text: &str) -> std::result::Result<u8, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(hex) = text.strip_prefix('$') {
        u8::from_str_radix(hex, 16)
    } else {
        text.parse::<u8>()
    };
    parsed.map_err(|e| format!("invalid byte '{text}': {e}"))
}

/// Timed register writes, ordered by cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteLog {
    records: Vec<WriteRecord>,
}

impl WriteLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records; writes at equal cycles keep their order
    pub fn from_records(mut records: Vec<WriteRecord>) -> Self {
        records.sort_by_key(|r| r.cycle);
        WriteLog { records }
    }

    /// Append a write, keeping cycle order
    pub fn push(&mut self, record: WriteRecord) {
        let pos = self.records.partition_point(|r| r.cycle <= record.cycle);
        self.records.insert(pos, record);
    }

    /// All writes
    pub fn records(&self) -> &[WriteRecord] {
        &self.records
    }

    /// Number of writes
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True without writes
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cycle of the last write
    pub fn last_cycle(&self) -> Option<u64> {
        self.records.last().map(|r| r.cycle)
    }

    /// Highest slot number written to
    pub fn max_chip(&self) -> Option<usize> {
        self.records.iter().map(|r| r.chip).max()
    }

    /// Parse CSV with a `cycle,chip,addr,value` header
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let records = csv
            .deserialize()
            .collect::<std::result::Result<Vec<WriteRecord>, _>>()
            .map_err(|e| SidError::Config(format!("invalid write log: {e}")))?;
        Ok(Self::from_records(records))
    }

    /// Load a CSV file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let log = Self::from_reader(std::io::BufReader::new(file))?;
        debug!(path = %path.as_ref().display(), writes = log.len(), "write log loaded");
        Ok(log)
    }

    /// Write CSV with a header
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        for record in &self.records {
            csv.serialize(record)
                .map_err(|e| SidError::Other(format!("failed to write log record: {e}")))?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Save as a CSV file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.to_writer(std::io::BufWriter::new(file))
    }
}

/// Replays a [`WriteLog`] through the scheduler
#[derive(Debug)]
pub struct WriteLogPlayer {
    log: WriteLog,
    next: usize,
    event: EventId,
}

impl WriteLogPlayer {
    /// Register the replay event
    pub fn new(scheduler: &mut EventScheduler, log: WriteLog) -> Self {
        WriteLogPlayer {
            log,
            next: 0,
            event: scheduler.register("WriteLog"),
        }
    }

    /// Handle of the replay event
    pub fn event_id(&self) -> EventId {
        self.event
    }

    /// Arm the event for the first write
    pub fn start(&mut self, scheduler: &mut EventScheduler) {
        self.next = 0;
        self.schedule_next(scheduler);
    }

    /// True once every write has been performed
    pub fn is_finished(&self) -> bool {
        self.next >= self.log.len()
    }

    fn schedule_next(&self, scheduler: &mut EventScheduler) {
        if let Some(record) = self.log.records.get(self.next) {
            scheduler.schedule_absolute(self.event, record.cycle, Phase::Phi2);
        }
    }

    /// Perform every write due by now, then re-arm for the next one
    ///
    /// Writes to the primary slot of `fake_stereo` go to both chips of the
    /// pair.
    pub fn fire<D: AudioDriver>(
        &mut self,
        scheduler: &mut EventScheduler,
        mixer: &mut SidMixer<D>,
        fake_stereo: Option<&FakeStereo>,
    ) -> Result<()> {
        let now = scheduler.time(Phase::Phi2);
        while let Some(record) = self.log.records.get(self.next) {
            if record.cycle > now {
                break;
            }
            trace!(
                cycle = now,
                chip = record.chip,
                addr = record.addr,
                value = record.value,
                "logged write"
            );
            match fake_stereo {
                Some(pair) if pair.primary() == record.chip => {
                    pair.write(mixer, scheduler, record.addr, record.value)?
                }
                _ => mixer.write(scheduler, record.chip, record.addr, record.value)?,
            }
            self.next += 1;
        }
        self.schedule_next(scheduler);
        Ok(())
    }
}
