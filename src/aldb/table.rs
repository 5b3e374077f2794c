//! In-memory link database with staged changes.
//!
//! Records are keyed by memory address and listed in descending order, the order in
//! which the device stores them. The table's status is never stored: it is derived
//! from the records present and the progress of the last load.

use crate::aldb::record::{AldbRecord, RECORD_LEN};
use crate::core::address::Address;
use crate::error::{constants, ProtocolError, Result};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

/// First record address of a device link database.
pub const DEVICE_FIRST_ADDRESS: u16 = 0x0FFF;
/// First (synthetic) record address of a modem link database.
pub const MODEM_FIRST_ADDRESS: u16 = 0x3FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AldbStatus {
    Empty,
    Loading,
    Loaded,
    Partial,
    Failed,
}

impl fmt::Display for AldbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AldbStatus::Empty => "empty",
            AldbStatus::Loading => "loading",
            AldbStatus::Loaded => "loaded",
            AldbStatus::Partial => "partial",
            AldbStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Idle,
    Loading,
    Failed,
}

/// Key of a staged change: an existing memory address, or a placeholder for a record
/// whose address is chosen when the write starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PendingKey {
    Address(u16),
    New(u32),
}

/// Parameters of a link to add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEntry {
    pub controller: bool,
    pub group: u8,
    pub target: Address,
    pub data: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChange {
    Add(LinkEntry),
    Modify(AldbRecord),
    Delete(u16),
}

/// A staged change resolved to the exact record to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedWrite {
    pub key: PendingKey,
    pub change: PendingChange,
    pub record: AldbRecord,
}

impl PlannedWrite {
    pub fn is_delete(&self) -> bool {
        matches!(self.change, PendingChange::Delete(_))
    }
}

/// A device (or modem) link database.
#[derive(Debug, Clone)]
pub struct Aldb {
    records: BTreeMap<u16, AldbRecord>,
    first_mem_addr: u16,
    load: LoadState,
    pending: BTreeMap<PendingKey, PendingChange>,
    next_placeholder: u32,
}

impl Aldb {
    pub fn new(first_mem_addr: u16) -> Self {
        Self {
            records: BTreeMap::new(),
            first_mem_addr,
            load: LoadState::Idle,
            pending: BTreeMap::new(),
            next_placeholder: 0,
        }
    }

    pub fn for_device() -> Self {
        Self::new(DEVICE_FIRST_ADDRESS)
    }

    pub fn for_modem() -> Self {
        Self::new(MODEM_FIRST_ADDRESS)
    }

    pub fn first_mem_addr(&self) -> u16 {
        self.first_mem_addr
    }

    pub fn status(&self) -> AldbStatus {
        match (self.load, self.records.is_empty()) {
            (LoadState::Loading, _) => AldbStatus::Loading,
            (LoadState::Failed, true) => AldbStatus::Failed,
            (_, true) => AldbStatus::Empty,
            _ if self.is_complete() => AldbStatus::Loaded,
            _ => AldbStatus::Partial,
        }
    }

    /// Every slot from the first address down to a high-water mark is present.
    fn is_complete(&self) -> bool {
        let mut mem_addr = self.first_mem_addr;
        loop {
            match self.records.get(&mem_addr) {
                Some(record) if record.high_water_mark => return true,
                Some(_) => {}
                None => return false,
            }
            match mem_addr.checked_sub(RECORD_LEN) {
                Some(next) => mem_addr = next,
                None => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, mem_addr: u16) -> Option<&AldbRecord> {
        self.records.get(&mem_addr)
    }

    /// All records, highest address first.
    pub fn records(&self) -> impl Iterator<Item = &AldbRecord> {
        self.records.values().rev()
    }

    /// In-use records above the high-water mark.
    pub fn active(&self) -> impl Iterator<Item = &AldbRecord> {
        let floor = self.high_water_mark().unwrap_or(0);
        self.records()
            .filter(move |record| record.mem_addr > floor && record.is_active())
    }

    /// Address of the first end-of-table marker, walking down from the top.
    pub fn high_water_mark(&self) -> Option<u16> {
        self.records()
            .find(|record| record.high_water_mark)
            .map(|record| record.mem_addr)
    }

    /// The active record for this link, if any.
    pub fn find(&self, controller: bool, group: u8, target: Address) -> Option<&AldbRecord> {
        self.active()
            .find(|record| record.same_link(controller, group, target))
    }

    // -- loading ------------------------------------------------------------

    /// Start a (re)load from `start`. Records above `start` are kept so an interrupted
    /// load can resume.
    pub fn begin_load(&mut self, start: u16) {
        if start >= self.first_mem_addr {
            self.records.clear();
        } else {
            self.records.retain(|mem_addr, _| *mem_addr > start);
        }
        self.load = LoadState::Loading;
        debug!(start = format_args!("{start:#06x}"), kept = self.records.len(), "Link database load started");
    }

    pub fn insert_loaded(&mut self, record: AldbRecord) {
        trace!(%record, "Record loaded");
        self.records.insert(record.mem_addr, record);
    }

    pub fn finish_load(&mut self, succeeded: bool) {
        self.load = if succeeded {
            LoadState::Idle
        } else {
            LoadState::Failed
        };
        debug!(status = %self.status(), records = self.records.len(), "Link database load finished");
    }

    /// Lowest address below the loaded run, where a resumed load should start.
    pub fn resume_address(&self) -> u16 {
        let mut mem_addr = self.first_mem_addr;
        while self.records.contains_key(&mem_addr) {
            match mem_addr.checked_sub(RECORD_LEN) {
                Some(next) => mem_addr = next,
                None => break,
            }
        }
        mem_addr
    }

    // -- pending changes ----------------------------------------------------

    /// Stage a new link. An active record for the same link is modified in place
    /// instead of duplicated.
    pub fn add(&mut self, entry: LinkEntry) -> PendingKey {
        if let Some(existing) = self.find(entry.controller, entry.group, entry.target) {
            let mut record = *existing;
            record.data = entry.data;
            let key = PendingKey::Address(record.mem_addr);
            self.pending.insert(key, PendingChange::Modify(record));
            return key;
        }
        let key = PendingKey::New(self.next_placeholder);
        self.next_placeholder += 1;
        self.pending.insert(key, PendingChange::Add(entry));
        key
    }

    /// Stage a replacement for the record at `record.mem_addr`.
    pub fn modify(&mut self, record: AldbRecord) -> Result<PendingKey> {
        self.require_record(record.mem_addr)?;
        let key = PendingKey::Address(record.mem_addr);
        self.pending.insert(key, PendingChange::Modify(record));
        Ok(key)
    }

    /// Stage removal of the record at `mem_addr`.
    pub fn remove(&mut self, mem_addr: u16) -> Result<PendingKey> {
        self.require_record(mem_addr)?;
        let key = PendingKey::Address(mem_addr);
        self.pending.insert(key, PendingChange::Delete(mem_addr));
        Ok(key)
    }

    fn require_record(&self, mem_addr: u16) -> Result<&AldbRecord> {
        self.records
            .get(&mem_addr)
            .filter(|record| !record.high_water_mark)
            .ok_or_else(|| {
                ProtocolError::Aldb(format!(
                    "{} at {mem_addr:#06x}",
                    constants::ERR_NO_SUCH_RECORD
                ))
            })
    }

    pub fn pending(&self) -> impl Iterator<Item = (&PendingKey, &PendingChange)> {
        self.pending.iter()
    }

    pub fn pending_keys(&self) -> Vec<PendingKey> {
        self.pending.keys().copied().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Resolve a staged change to the record to write. A placeholder resolves to the
    /// current high-water mark (the first address of an empty table) but keeps its own
    /// key until committed, so a failed add stays pending next to later ones.
    pub fn plan(&self, key: PendingKey) -> Result<PlannedWrite> {
        let change = *self.pending.get(&key).ok_or_else(|| {
            ProtocolError::Aldb(format!("{} for {key:?}", constants::ERR_NO_SUCH_RECORD))
        })?;

        match change {
            PendingChange::Add(entry) => {
                let mem_addr = self
                    .high_water_mark()
                    .or_else(|| self.records.is_empty().then_some(self.first_mem_addr))
                    .ok_or_else(|| ProtocolError::Aldb(constants::ERR_NO_HIGH_WATER_MARK.into()))?;
                Ok(PlannedWrite {
                    key,
                    change,
                    record: AldbRecord::new(
                        mem_addr,
                        entry.controller,
                        entry.group,
                        entry.target,
                        entry.data,
                    ),
                })
            }
            PendingChange::Modify(record) => Ok(PlannedWrite {
                key,
                change,
                record,
            }),
            PendingChange::Delete(mem_addr) => {
                let mut record = *self.require_record(mem_addr)?;
                record.in_use = false;
                Ok(PlannedWrite {
                    key,
                    change,
                    record,
                })
            }
        }
    }

    /// Record a successful write and drop its pending entry.
    pub fn commit(&mut self, key: PendingKey, record: AldbRecord) {
        self.pending.remove(&key);
        self.apply(record);
    }

    /// Store `record`. Writing over the high-water mark moves the mark 8 lower.
    /// Applying the same record twice leaves the table unchanged.
    pub fn apply(&mut self, record: AldbRecord) {
        let at_mark = self.high_water_mark() == Some(record.mem_addr)
            || (self.records.is_empty() && record.mem_addr == self.first_mem_addr);
        self.records.insert(record.mem_addr, record);
        if at_mark && !record.high_water_mark {
            if let Some(below) = record.mem_addr.checked_sub(RECORD_LEN) {
                self.records.insert(below, AldbRecord::high_water_mark_at(below));
                debug!(mark = format_args!("{below:#06x}"), "High-water mark moved");
            }
        }
    }
}

impl Default for Aldb {
    fn default() -> Self {
        Self::for_device()
    }
}

impl fmt::Display for Aldb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "status: {}", self.status())?;
        for record in self.records() {
            writeln!(f, "{record}")?;
        }
        Ok(())
    }
}
