// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The device driver seam.

use crate::image::{ChannelMut, ChannelRef};
use crate::types::*;

/// A device driver registered with a [crate::Master].
///
/// `decode` and `encode` are called once per cycle for every input and
/// output channel, in channel order, and must not block.
pub trait Slave: Send {
    fn id(&self) -> SlaveId;

    /// Process data channels, in the order they are registered.
    fn channels(&self) -> &[ChannelInfo];

    /// Channel indices per domain. By default everything goes to domain 0.
    fn domains(&self) -> DomainMap {
        let mut map = DomainMap::new();
        map.insert(0, (0..self.channels().len()).collect());
        map
    }

    /// SDO values downloaded while the slave is brought up.
    fn sdo_config(&self) -> Vec<SdoConfigEntry> {
        Vec::new()
    }

    /// Objects to read asynchronously, with their transfer size in bytes.
    fn sdo_reads(&self) -> Vec<(SdoIdx, usize)> {
        Vec::new()
    }

    /// Consume the received value of an input channel.
    fn decode(&mut self, channel: usize, input: ChannelRef<'_>);

    /// Produce the value of an output channel.
    fn encode(&mut self, channel: usize, output: &mut ChannelMut<'_>);

    /// Result of a finished SDO read.
    fn process_sdo(&mut self, _index: u16, _value: u16) {}

    /// Called when the slave enters or leaves the operational state.
    fn set_operational(&mut self, _operational: bool) {}
}
