//! Text streams receiving throughput records, one per channel.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::ControlError;
use crate::tracker::{Channel, ThroughputRecord};

/// First line of every throughput stream.
pub const HEADER: &str = "# Timestamp(ns),Bits";

/// One channel's output: a header line, then `relative_timestamp,delta_bits` rows.
#[derive(Debug)]
pub struct ThroughputSink<W: Write> {
    writer: W,
    label: String,
    rows: u64,
}

impl ThroughputSink<BufWriter<File>> {
    /// Create (truncating) a file-backed sink and write its header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let file = File::create(path).map_err(|source| ControlError::Sink {
            path: label.clone(),
            source,
        })?;
        Self::new(BufWriter::new(file), label)
    }
}

impl<W: Write> ThroughputSink<W> {
    pub fn new(mut writer: W, label: impl Into<String>) -> Result<Self, ControlError> {
        let label = label.into();
        writeln!(writer, "{HEADER}").map_err(|source| ControlError::Sink {
            path: label.clone(),
            source,
        })?;
        Ok(Self {
            writer,
            label,
            rows: 0,
        })
    }

    pub fn append(&mut self, record: &ThroughputRecord) -> Result<(), ControlError> {
        let bits = record.delta_bits().ok_or(ControlError::BitsOverflow {
            channel: record.channel,
            delta_bytes: record.delta_bytes,
        })?;
        writeln!(self.writer, "{},{}", record.relative_timestamp, bits)
            .map_err(|e| self.error(e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ControlError> {
        self.writer.flush().map_err(|e| self.error(e))
    }

    /// Rows written since the header.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    fn error(&self, source: std::io::Error) -> ControlError {
        ControlError::Sink {
            path: self.label.clone(),
            source,
        }
    }
}

/// The benign and malicious streams, routed by record channel.
#[derive(Debug)]
pub struct ThroughputSinks<W: Write = BufWriter<File>> {
    pub benign: ThroughputSink<W>,
    pub malicious: ThroughputSink<W>,
}

impl ThroughputSinks<BufWriter<File>> {
    pub fn create(benign: impl AsRef<Path>, malicious: impl AsRef<Path>) -> Result<Self, ControlError> {
        Ok(Self {
            benign: ThroughputSink::create(benign)?,
            malicious: ThroughputSink::create(malicious)?,
        })
    }
}

impl<W: Write> ThroughputSinks<W> {
    pub fn channel(&mut self, channel: Channel) -> &mut ThroughputSink<W> {
        match channel {
            Channel::Benign => &mut self.benign,
            Channel::Malicious => &mut self.malicious,
        }
    }

    pub fn write(&mut self, records: &[ThroughputRecord]) -> Result<(), ControlError> {
        for record in records {
            self.channel(record.channel).append(record)?;
        }
        Ok(())
    }

    /// Flush both streams, attempting the second even if the first fails.
    pub fn flush(&mut self) -> Result<(), ControlError> {
        let benign = self.benign.flush();
        let malicious = self.malicious.flush();
        benign.and(malicious)
    }
}
