//! Per-device link-database handles and the manager that loads and writes them.
//!
//! Loads and writes of one table are serialised by an async mutex held for the whole
//! operation; different devices proceed concurrently. Table state lives behind a
//! plain `RwLock` that is only held between awaits, so status can be read while a
//! load is running.

use crate::aldb::reader::{AldbReader, ReadStrategy};
use crate::aldb::record::AldbRecord;
use crate::aldb::table::{Aldb, AldbStatus, LinkEntry, PendingKey};
use crate::aldb::writer::{AldbWriter, WriteStrategy, WriteSummary};
use crate::aldb::AldbTarget;
use crate::config::AldbConfig;
use crate::core::address::Address;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::commands::Command;
use crate::service::coordinator::{Coordinator, ResponseStatus};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Insteon engine generation, from the engine-version reply's cmd2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineVersion {
    I1,
    I2,
    I2Cs,
}

impl EngineVersion {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(EngineVersion::I1),
            0x01 => Some(EngineVersion::I2),
            0x02 => Some(EngineVersion::I2Cs),
            _ => None,
        }
    }

    pub fn read_strategy(self) -> ReadStrategy {
        match self {
            EngineVersion::I1 => ReadStrategy::Peek,
            EngineVersion::I2 | EngineVersion::I2Cs => ReadStrategy::Extended,
        }
    }

    pub fn write_strategy(self) -> WriteStrategy {
        match self {
            EngineVersion::I1 => WriteStrategy::Poke,
            EngineVersion::I2 | EngineVersion::I2Cs => WriteStrategy::Device,
        }
    }
}

/// One device's (or the modem's) link database.
#[derive(Debug)]
pub struct DeviceAldb {
    target: AldbTarget,
    table: RwLock<Aldb>,
    engine: Mutex<Option<EngineVersion>>,
    serial: tokio::sync::Mutex<()>,
}

impl DeviceAldb {
    pub fn new(target: AldbTarget) -> Self {
        let table = match target {
            AldbTarget::Modem => Aldb::for_modem(),
            AldbTarget::Device(_) => Aldb::for_device(),
        };
        Self {
            target,
            table: RwLock::new(table),
            engine: Mutex::new(None),
            serial: tokio::sync::Mutex::new(()),
        }
    }

    pub fn target(&self) -> AldbTarget {
        self.target
    }

    fn read_table(&self) -> Result<std::sync::RwLockReadGuard<'_, Aldb>> {
        self.table
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ALDB_LOCK.to_string()))
    }

    fn write_table(&self) -> Result<std::sync::RwLockWriteGuard<'_, Aldb>> {
        self.table
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ALDB_LOCK.to_string()))
    }

    pub fn status(&self) -> Result<AldbStatus> {
        Ok(self.read_table()?.status())
    }

    /// Copy of the current table.
    pub fn snapshot(&self) -> Result<Aldb> {
        Ok(self.read_table()?.clone())
    }

    pub fn add(&self, entry: LinkEntry) -> Result<PendingKey> {
        Ok(self.write_table()?.add(entry))
    }

    pub fn modify(&self, record: AldbRecord) -> Result<PendingKey> {
        self.write_table()?.modify(record)
    }

    pub fn remove(&self, mem_addr: u16) -> Result<PendingKey> {
        self.write_table()?.remove(mem_addr)
    }

    pub fn clear_pending(&self) -> Result<()> {
        self.write_table()?.clear_pending();
        Ok(())
    }

    pub fn engine(&self) -> Option<EngineVersion> {
        self.engine.lock().ok().and_then(|engine| *engine)
    }

    /// Record the engine generation, e.g. from device configuration.
    pub fn set_engine(&self, version: EngineVersion) {
        if let Ok(mut engine) = self.engine.lock() {
            *engine = Some(version);
        }
    }
}

/// Loads and writes link databases over one connection.
#[derive(Debug)]
pub struct AldbManager {
    coordinator: Coordinator,
    config: AldbConfig,
    tables: Mutex<HashMap<AldbTarget, Arc<DeviceAldb>>>,
}

impl AldbManager {
    pub fn new(coordinator: Coordinator) -> Self {
        let config = coordinator.connection().config().aldb.clone();
        Self {
            coordinator,
            config,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn modem(&self) -> Result<Arc<DeviceAldb>> {
        self.table(AldbTarget::Modem)
    }

    pub fn device(&self, address: Address) -> Result<Arc<DeviceAldb>> {
        self.table(AldbTarget::Device(address))
    }

    fn table(&self, target: AldbTarget) -> Result<Arc<DeviceAldb>> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ALDB_LOCK.to_string()))?;
        Ok(tables
            .entry(target)
            .or_insert_with(|| Arc::new(DeviceAldb::new(target)))
            .clone())
    }

    /// Ask a device for its engine generation and remember it. A device that NAKs
    /// the request is an I2CS device that has not linked the modem.
    #[instrument(skip(self))]
    pub async fn engine_version(&self, address: Address) -> Result<EngineVersion> {
        let aldb = self.device(address)?;
        let response = self.coordinator.send(&Command::EngineVersion { address }).await?;
        let version = match response.status {
            ResponseStatus::Success => response
                .reply
                .as_ref()
                .and_then(|reply| reply.insteon())
                .and_then(|insteon| EngineVersion::from_byte(insteon.cmd2))
                .ok_or_else(|| ProtocolError::invalid_field("cmd2", "unknown engine version"))?,
            _ if response.is_device_nak() => EngineVersion::I2Cs,
            ResponseStatus::Unsent | ResponseStatus::Failure => return Err(ProtocolError::Timeout),
            ResponseStatus::Unclear => {
                return Err(ProtocolError::Nak {
                    operation: "get_insteon_engine_version",
                })
            }
        };
        info!(?version, "Engine version");
        aldb.set_engine(version);
        Ok(version)
    }

    /// Known engine, or ask the device. `None` when the device did not say.
    async fn resolve_engine(&self, aldb: &DeviceAldb) -> Option<EngineVersion> {
        let AldbTarget::Device(address) = aldb.target else {
            return None;
        };
        if let Some(engine) = aldb.engine() {
            return Some(engine);
        }
        match self.engine_version(address).await {
            Ok(engine) => Some(engine),
            Err(e) => {
                warn!(%address, error = %e, "Engine version unknown, assuming extended reads");
                None
            }
        }
    }

    /// Reload the whole table.
    pub async fn load(&self, aldb: &DeviceAldb) -> Result<AldbStatus> {
        let start = aldb.read_table()?.first_mem_addr();
        self.load_from(aldb, start).await
    }

    /// Continue an interrupted load below the records already read.
    pub async fn resume(&self, aldb: &DeviceAldb) -> Result<AldbStatus> {
        let start = aldb.read_table()?.resume_address();
        self.load_from(aldb, start).await
    }

    /// Load records from `start` down. Read failures are reflected in the returned
    /// status (`Failed` or `Partial`); only a closed connection is an error.
    #[instrument(skip(self, aldb), fields(target = %aldb.target, start = format_args!("{start:#06x}")))]
    pub async fn load_from(&self, aldb: &DeviceAldb, start: u16) -> Result<AldbStatus> {
        let _serial = aldb.serial.lock().await;

        let (strategy, guessed) = match aldb.target {
            AldbTarget::Modem => (ReadStrategy::Modem, false),
            AldbTarget::Device(_) => match self.resolve_engine(aldb).await {
                Some(engine) => (engine.read_strategy(), false),
                None => (ReadStrategy::Extended, true),
            },
        };

        let mut loaded = self.read_records(aldb, strategy, start).await?;
        if guessed && loaded == 0 {
            debug!("Extended read yielded nothing, falling back to peeks");
            loaded = self.read_records(aldb, ReadStrategy::Peek, start).await?;
        }

        let status = aldb.status()?;
        info!(%status, records = loaded, ?strategy, "Link database load finished");
        Ok(status)
    }

    async fn read_records(&self, aldb: &DeviceAldb, strategy: ReadStrategy, start: u16) -> Result<usize> {
        let first = {
            let mut table = aldb.write_table()?;
            table.begin_load(start);
            table.first_mem_addr()
        };
        let reader = AldbReader::new(
            &self.coordinator,
            aldb.target,
            strategy,
            first,
            self.config.read_retries,
        );

        let mut loaded = 0;
        let mut outcome = Ok(());
        let mut records = std::pin::pin!(reader.records(start));
        while let Some(record) = records.next().await {
            match record {
                Ok(record) => {
                    aldb.write_table()?.insert_loaded(record);
                    loaded += 1;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        aldb.write_table()?.finish_load(outcome.is_ok());
        match outcome {
            Err(ProtocolError::ConnectionClosed) => Err(ProtocolError::ConnectionClosed),
            Err(e) => {
                warn!(error = %e, loaded, "Link database read interrupted");
                Ok(loaded)
            }
            Ok(()) => Ok(loaded),
        }
    }

    /// Write pending changes, forcing according to configuration.
    pub async fn write(&self, aldb: &DeviceAldb) -> Result<WriteSummary> {
        self.write_with(aldb, self.config.force_writes).await
    }

    pub async fn write_with(&self, aldb: &DeviceAldb, force: bool) -> Result<WriteSummary> {
        let _serial = aldb.serial.lock().await;
        if !force {
            let status = aldb.status()?;
            if status != AldbStatus::Loaded {
                return Err(ProtocolError::InvalidTableState {
                    status: status.to_string(),
                });
            }
        }

        let strategy = match aldb.target {
            AldbTarget::Modem => WriteStrategy::Modem,
            AldbTarget::Device(_) => self
                .resolve_engine(aldb)
                .await
                .map_or(WriteStrategy::Device, EngineVersion::write_strategy),
        };
        AldbWriter::new(&self.coordinator, aldb.target, strategy, self.config.write_retries)
            .write(&aldb.table, force)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_strategies() {
        assert_eq!(EngineVersion::from_byte(0), Some(EngineVersion::I1));
        assert_eq!(EngineVersion::from_byte(2), Some(EngineVersion::I2Cs));
        assert_eq!(EngineVersion::from_byte(7), None);
        assert_eq!(EngineVersion::I1.read_strategy(), ReadStrategy::Peek);
        assert_eq!(EngineVersion::I2.write_strategy(), WriteStrategy::Device);
    }

    #[test]
    fn test_device_aldb_starts_empty() {
        let modem = DeviceAldb::new(AldbTarget::Modem);
        assert_eq!(modem.status().unwrap(), AldbStatus::Empty);
        assert_eq!(modem.snapshot().unwrap().first_mem_addr(), 0x3FFF);
        assert!(modem.remove(0x3FFF).is_err());
    }
}
