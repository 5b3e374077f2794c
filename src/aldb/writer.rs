//! Link-database write strategies.
//!
//! Pending changes are written one at a time, each through the coordinator with the
//! configured retries. A change that succeeds is committed to the table and leaves
//! the pending set; one that fails stays pending and is reported. Writes are not
//! transactional.

use crate::aldb::record::AldbRecord;
use crate::aldb::table::{Aldb, AldbStatus, PendingChange, PlannedWrite};
use crate::aldb::AldbTarget;
use crate::core::address::Address;
use crate::core::message::ManageAction;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::commands::{names, Command};
use crate::service::coordinator::{Coordinator, SendOptions};
use crate::service::queue::Priority;
use std::sync::RwLock;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Modem manage-record command (0x6F).
    Modem,
    /// Extended write request (I2/I2CS devices).
    Device,
    /// Peek to select each byte, poke to write it (I1 devices).
    Poke,
}

/// Outcome of [`AldbWriter::write`].
#[derive(Debug, Default)]
pub struct WriteSummary {
    pub success: usize,
    pub failure: usize,
    /// One entry per failed change.
    pub errors: Vec<ProtocolError>,
}

impl WriteSummary {
    pub fn counts(&self) -> (usize, usize) {
        (self.success, self.failure)
    }

    pub fn is_complete(&self) -> bool {
        self.failure == 0
    }
}

#[derive(Debug, Clone)]
pub struct AldbWriter<'a> {
    coordinator: &'a Coordinator,
    target: AldbTarget,
    strategy: WriteStrategy,
    retries: u32,
}

impl<'a> AldbWriter<'a> {
    pub fn new(
        coordinator: &'a Coordinator,
        target: AldbTarget,
        strategy: WriteStrategy,
        retries: u32,
    ) -> Self {
        Self {
            coordinator,
            target,
            strategy,
            retries,
        }
    }

    /// Write every pending change in `table`. Unless `force` is set, a table that is
    /// not fully loaded is rejected before anything is sent.
    #[instrument(skip(self, table), fields(target = %self.target, strategy = ?self.strategy))]
    pub async fn write(&self, table: &RwLock<Aldb>, force: bool) -> Result<WriteSummary> {
        let keys = {
            let aldb = table
                .read()
                .map_err(|_| ProtocolError::Custom(constants::ERR_ALDB_LOCK.to_string()))?;
            let status = aldb.status();
            if !force && status != AldbStatus::Loaded {
                return Err(ProtocolError::InvalidTableState {
                    status: status.to_string(),
                });
            }
            aldb.pending_keys()
        };

        let mut summary = WriteSummary::default();
        for key in keys {
            let planned = table
                .read()
                .map_err(|_| ProtocolError::Custom(constants::ERR_ALDB_LOCK.to_string()))?
                .plan(key);
            let planned = match planned {
                Ok(planned) => planned,
                Err(e) => {
                    warn!(?key, error = %e, "Cannot place pending change");
                    summary.failure += 1;
                    summary.errors.push(e);
                    continue;
                }
            };

            match self.apply(&planned).await {
                Ok(()) => {
                    table
                        .write()
                        .map_err(|_| ProtocolError::Custom(constants::ERR_ALDB_LOCK.to_string()))?
                        .commit(planned.key, planned.record);
                    summary.success += 1;
                }
                Err(ProtocolError::ConnectionClosed) => return Err(ProtocolError::ConnectionClosed),
                Err(e) => {
                    warn!(record = %planned.record, error = %e, "Record write failed, kept pending");
                    summary.failure += 1;
                    summary.errors.push(ProtocolError::AldbWrite {
                        mem_addr: planned.record.mem_addr,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            success = summary.success,
            failure = summary.failure,
            "Link database write finished"
        );
        Ok(summary)
    }

    fn options(&self) -> SendOptions {
        SendOptions {
            priority: Priority::Bulk,
            retries: self.retries,
        }
    }

    async fn apply(&self, planned: &PlannedWrite) -> Result<()> {
        match (self.strategy, self.target) {
            (WriteStrategy::Modem, _) => self.manage_record(planned).await,
            (WriteStrategy::Device, AldbTarget::Device(address)) => {
                let command = Command::WriteAldb {
                    address,
                    mem_addr: planned.record.mem_addr,
                    record: planned.record.to_link_record(),
                };
                self.send(&command, names::READ_WRITE_ALDB).await
            }
            (WriteStrategy::Poke, AldbTarget::Device(address)) => {
                self.poke_record(address, &planned.record).await
            }
            (strategy, AldbTarget::Modem) => Err(ProtocolError::Aldb(format!(
                "{strategy:?} writes need a device address"
            ))),
        }
    }

    async fn send(&self, command: &Command, operation: &'static str) -> Result<()> {
        self.coordinator
            .send_with(command, self.options())
            .await?
            .require(operation)
            .map(|_| ())
    }

    async fn manage_record(&self, planned: &PlannedWrite) -> Result<()> {
        let action = match planned.change {
            PendingChange::Delete(_) => ManageAction::DeleteFirst,
            _ if planned.record.controller => ManageAction::ModifyFirstControllerOrAdd,
            _ => ManageAction::ModifyFirstResponderOrAdd,
        };
        let mut record = planned.record;
        if planned.is_delete() {
            // the modem matches deletes on role, group and target
            record.in_use = true;
        }
        let command = Command::ManageAllLinkRecord {
            action,
            record: record.to_link_record(),
        };
        self.send(&command, command.name()).await
    }

    /// Write the 8 record bytes from the record address downwards, flags byte first.
    async fn poke_record(&self, address: Address, record: &AldbRecord) -> Result<()> {
        let [msb, lsb] = record.mem_addr.to_be_bytes();
        self.send(&Command::SetAddressMsb { address, msb }, names::SET_ADDRESS_MSB)
            .await?;
        for (offset, value) in (0u8..).zip(record.to_bytes()) {
            let lsb = lsb.wrapping_sub(offset);
            self.send(&Command::PeekOneByte { address, lsb }, names::PEEK_ONE_BYTE)
                .await?;
            self.send(&Command::PokeOneByte { address, value }, names::POKE_ONE_BYTE)
                .await?;
        }
        Ok(())
    }
}
