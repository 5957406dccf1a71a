// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The field-bus transaction layer the master drives.
//!
//! Implementations wrap an existing EtherCAT stack (e.g. the IgH kernel
//! master) or simulate one, see [crate::sim::SimBus]. The cyclic calls
//! `receive`, `process`, `queue` and `send` must not block; `sdo_download` is
//! only ever called before the cyclic loop is entered.

use crate::domain::Domain;
use crate::types::*;

pub trait Bus {
    /// Reserve master `idx` for exclusive use.
    fn reserve(&mut self, idx: MasterIdx) -> Result<()>;

    /// Create the configuration of one slave.
    fn configure_slave(&mut self, addr: SlaveAddr, id: SlaveId) -> Result<SlaveConfigIdx>;

    /// Queue an SDO download that is applied when the slave is configured.
    fn add_sdo(&mut self, config: SlaveConfigIdx, entry: &SdoConfigEntry) -> Result<()>;

    /// Create an asynchronous SDO request with a transfer buffer of `size` bytes.
    fn create_sdo_request(
        &mut self,
        config: SlaveConfigIdx,
        sdo: SdoIdx,
        size: usize,
    ) -> Result<SdoRequestIdx>;

    /// Bind the frozen domain layouts and start the cyclic operation.
    fn activate(&mut self, domains: &[Domain]) -> Result<()>;

    /// Fetch the results of the last sent frames.
    fn receive(&mut self) -> Result<()>;

    /// Copy the received data of a domain into its image.
    fn process(&mut self, domain: DomainIdx, image: &mut [u8]) -> Result<()>;

    /// Queue a domain image for the next `send`.
    fn queue(&mut self, domain: DomainIdx, image: &[u8]) -> Result<()>;

    /// Send all queued frames.
    fn send(&mut self) -> Result<()>;

    fn state(&self) -> Result<MasterState>;

    fn domain_state(&self, domain: DomainIdx) -> Result<DomainState>;

    fn config_state(&self, config: SlaveConfigIdx) -> Result<SlaveConfigState>;

    /// Blocking SDO download to the slave at `position`.
    ///
    /// A rejection by the slave is reported as [Error::SdoAbort].
    fn sdo_download(&mut self, position: u16, sdo: SdoIdx, data: &[u8]) -> Result<()>;

    /// Schedule a read of the request's object.
    fn sdo_request_read(&mut self, request: SdoRequestIdx) -> Result<()>;

    fn sdo_request_state(&self, request: SdoRequestIdx) -> SdoRequestState;

    /// Copy the request's transfer buffer into `target`, returning the number
    /// of bytes copied. Meaningful in [SdoRequestState::Success] only.
    fn sdo_request_data(&self, request: SdoRequestIdx, target: &mut [u8]) -> usize;
}
