//! CSV output of the sampled values.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use hpm::emit::{Dispatch, ValueRecord};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const DELIMITER: &str = ";";
const HEADER: [&str; 5] = ["stream", "metric", "entity", "value", "timestamp"];

/// Writes every value on a line: `stream;metric;entity;value;timestamp`.
///
/// The header is written before the first value.
pub struct CsvDispatch<W: Write = Box<dyn Write>> {
    writer: W,
    header_written: bool,
}

impl CsvDispatch {
    /// Writes to a new file, replacing the existing one.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl<W: Write> CsvDispatch<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        log::trace!("flushing csv output");
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn writeln(&mut self, fields: &[&str]) -> io::Result<()> {
        let mut line = fields.join(DELIMITER);
        line.push('\n');
        self.writer.write_all(line.as_bytes())
    }
}

impl<W: Write> Dispatch for CsvDispatch<W> {
    fn dispatch(&mut self, record: &ValueRecord) -> anyhow::Result<()> {
        if !self.header_written {
            self.writeln(&HEADER)?;
            self.header_written = true;
        }
        let datetime: OffsetDateTime = record.time.to_system_time().into();
        let timestamp = datetime.format(&Rfc3339)?;
        let value = record.value.to_string();
        self.writeln(&[
            record.stream.as_str(),
            record.metric,
            record.entity.as_str(),
            value.as_str(),
            timestamp.as_str(),
        ])?;
        Ok(())
    }
}
