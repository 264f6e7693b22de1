//! Hands finished values to the host.

use std::fmt;

use serde::Serialize;

use crate::registry::Locality;
use crate::time::CdTime;

/// Output stream of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stream {
    /// Values per hardware thread (or per core).
    Cpu,
    /// Values per socket, attributed to the representative thread of the socket.
    Socket,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Cpu => "hpm_cpu",
            Stream::Socket => "hpm_socket",
        }
    }
}

impl From<Locality> for Stream {
    fn from(value: Locality) -> Self {
        match value {
            Locality::PerCpu => Stream::Cpu,
            Locality::PerSocket => Stream::Socket,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value ready to be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRecord<'a> {
    pub stream: Stream,
    pub metric: &'a str,
    /// Identifier of the thread, core or socket representative.
    pub entity: String,
    pub value: f64,
    pub time: CdTime,
}

/// The host side: receives the values produced by the sampler.
pub trait Dispatch {
    fn dispatch(&mut self, record: &ValueRecord) -> anyhow::Result<()>;
}

/// Submits the values of one measurement cycle, with the timestamp of the cycle.
///
/// Submission is fire-and-forget: dispatch errors are logged and otherwise ignored.
pub struct Emitter<'a> {
    out: &'a mut dyn Dispatch,
    time: CdTime,
    emitted: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(out: &'a mut dyn Dispatch, time: CdTime) -> Self {
        Self { out, time, emitted: 0 }
    }

    pub fn submit(&mut self, stream: Stream, metric: &str, entity: u32, value: f64) {
        let record = ValueRecord {
            stream,
            metric,
            entity: entity.to_string(),
            value,
            time: self.time,
        };
        if let Err(e) = self.out.dispatch(&record) {
            log::debug!("could not dispatch {stream}/{metric}/{entity}: {e:#}");
        }
        self.emitted += 1;
    }

    /// Submits the content of an accumulator slot, an empty slot is dropped.
    pub fn submit_slot(&mut self, stream: Stream, metric: &str, entity: u32, slot: Option<f64>) {
        if let Some(value) = slot {
            self.submit(stream, metric, entity, value);
        }
    }

    pub fn time(&self) -> CdTime {
        self.time
    }

    /// Number of values submitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Forwards every value to a closure.
impl<F> Dispatch for F
where
    F: FnMut(&ValueRecord) -> anyhow::Result<()>,
{
    fn dispatch(&mut self, record: &ValueRecord) -> anyhow::Result<()> {
        self(record)
    }
}
