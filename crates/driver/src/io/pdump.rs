//! Offline register-trace sink.
//!
//! Every register write and poll performed by the driver is mirrored into a
//! pdump sink so regression simulations can replay the exact access sequence.
//! The sink is write-only: it feeds nothing back into driver behaviour, and
//! the production binary typically installs [`NullPdump`].

/// A single trace entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PdumpRecord {
    /// 64-bit register write.
    Write {
        /// Register offset.
        offset: u64,
        /// Value written.
        val: u64,
    },
    /// 64-bit register read.
    Read {
        /// Register offset.
        offset: u64,
    },
    /// Register poll: wait for `(read & mask) == val`.
    Poll {
        /// Register offset.
        offset: u64,
        /// Expected masked value.
        val: u64,
        /// Field mask.
        mask: u64,
        /// Retry budget.
        count: u32,
        /// Inter-poll delay in device cycles.
        delay: u32,
    },
    /// Free-form annotation (`-- ...` lines in the offline format).
    Comment(String),
}

/// Write-only trace consumer.
pub trait PdumpSink {
    /// Appends one record to the trace.
    fn record(&mut self, record: PdumpRecord);
}

/// Sink that drops every record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPdump;

impl PdumpSink for NullPdump {
    fn record(&mut self, _record: PdumpRecord) {}
}

/// Sink that retains records in memory, mainly for tests and bring-up.
#[derive(Debug, Default)]
pub struct MemPdump {
    /// Captured records, in issue order.
    pub records: Vec<PdumpRecord>,
}

impl PdumpSink for MemPdump {
    fn record(&mut self, record: PdumpRecord) {
        self.records.push(record);
    }
}
