// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Asynchronous SDO reads.
//!
//! A request is created once per object a slave wants to read and lives as
//! long as the master. Its state is only refreshed by [RequestManager::poll],
//! which the master runs together with the state checks; the value is copied
//! out of the transport in that same pass, so readers never touch the bus.

use crate::bus::Bus;
use crate::types::*;
use log::*;

#[derive(Debug)]
pub struct SdoRequest {
    slave: SlaveHandle,
    sdo: SdoIdx,
    size: usize,
    bus_idx: SdoRequestIdx,
    state: SdoRequestState,
    data: Vec<u8>,
    /// the current successful read has been handed to the slave
    delivered: bool,
}

impl SdoRequest {
    pub fn slave(&self) -> SlaveHandle {
        self.slave
    }

    pub fn sdo(&self) -> SdoIdx {
        self.sdo
    }

    pub fn index(&self) -> u16 {
        self.sdo.idx
    }

    pub fn sub_index(&self) -> u8 {
        self.sdo.sub_idx
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn state(&self) -> SdoRequestState {
        self.state
    }

    pub fn is_unused(&self) -> bool {
        self.state == SdoRequestState::Unused
    }

    pub fn is_busy(&self) -> bool {
        self.state == SdoRequestState::Busy
    }

    pub fn is_complete(&self) -> bool {
        self.state == SdoRequestState::Success
    }

    /// Raw bytes of the last successful read.
    pub fn data(&self) -> Option<&[u8]> {
        if self.is_complete() {
            Some(&self.data)
        } else {
            None
        }
    }

    /// Decoded value of the last successful read.
    pub fn value<T: SdoData>(&self) -> Option<T> {
        self.data().and_then(T::from_bytes)
    }

    fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidRequest(self.sdo, "zero-sized transfer buffer"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RequestManager {
    requests: Vec<SdoRequest>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn create<B: Bus>(
        &mut self,
        bus: &mut B,
        slave: SlaveHandle,
        config: SlaveConfigIdx,
        sdo: SdoIdx,
        size: usize,
    ) -> Result<RequestHandle> {
        let bus_idx = bus.create_sdo_request(config, sdo, size)?;
        debug!("Created SDO request {} for config {}", sdo, config);
        self.requests.push(SdoRequest {
            slave,
            sdo,
            size,
            bus_idx,
            state: SdoRequestState::Unused,
            data: vec![0; size],
            delivered: false,
        });
        Ok(RequestHandle(self.requests.len() - 1))
    }

    pub fn get(&self, handle: RequestHandle) -> Option<&SdoRequest> {
        self.requests.get(handle.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RequestHandle, &SdoRequest)> {
        self.requests
            .iter()
            .enumerate()
            .map(|(i, r)| (RequestHandle(i), r))
    }

    /// Check every request before the bus is activated.
    pub fn validate(&self) -> Result<()> {
        self.requests.iter().try_for_each(SdoRequest::validate)
    }

    /// Arm a request; the bus picks it up with the next exchange.
    ///
    /// Re-arming a finished request starts a new read. A busy request is left
    /// alone.
    pub fn initiate_read<B: Bus>(&mut self, bus: &mut B, handle: RequestHandle) -> Result<()> {
        let request = self
            .requests
            .get_mut(handle.0)
            .ok_or(Error::NoRequest(handle.0))?;
        if request.is_busy() {
            return Ok(());
        }
        bus.sdo_request_read(request.bus_idx)?;
        request.state = SdoRequestState::Busy;
        request.delivered = false;
        Ok(())
    }

    /// Refresh the state of all requests, copying out data of finished reads.
    ///
    /// Returns the requests that completed successfully since the last poll.
    pub fn poll<B: Bus>(&mut self, bus: &B) -> Vec<RequestHandle> {
        let mut completed = Vec::new();
        for (i, request) in self.requests.iter_mut().enumerate() {
            if !request.is_busy() {
                continue;
            }
            request.state = bus.sdo_request_state(request.bus_idx);
            match request.state {
                SdoRequestState::Success => {
                    let n = bus.sdo_request_data(request.bus_idx, &mut request.data);
                    // short transfer, drop what an earlier read left behind
                    let n = n.min(request.data.len());
                    request.data[n..].fill(0);
                    completed.push(RequestHandle(i));
                }
                SdoRequestState::Error => {
                    warn!("SDO request {} failed", request.sdo);
                }
                _ => (),
            }
        }
        completed
    }

    /// Take the 16-bit value of a finished read for delivery to its slave.
    ///
    /// Returns `None` unless the request is complete and not yet delivered.
    pub fn process_data(&mut self, handle: RequestHandle) -> Option<(SlaveHandle, u16, u16)> {
        let request = self.requests.get_mut(handle.0)?;
        if request.delivered || !request.is_complete() {
            return None;
        }
        request.delivered = true;
        match request.value::<u16>() {
            Some(value) => Some((request.slave, request.sdo.idx, value)),
            None => {
                debug!(
                    "SDO request {}: {} byte(s) read, too short for delivery",
                    request.sdo, request.size
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    fn setup() -> (SimBus, RequestManager, RequestHandle) {
        let mut bus = SimBus::default();
        let config = bus
            .configure_slave(SlaveAddr::ByPos(0), SlaveId::new(1, 1))
            .unwrap();
        let mut requests = RequestManager::new();
        let handle = requests
            .create(&mut bus, SlaveHandle(0), config, SdoIdx::new(0x2000, 0), 2)
            .unwrap();
        (bus, requests, handle)
    }

    #[test]
    fn lifecycle() {
        let (mut bus, mut requests, handle) = setup();
        bus.set_object(0, SdoIdx::new(0x2000, 0), &[0x2C, 0x01]);
        let request = requests.get(handle).unwrap();
        assert!(request.is_unused());
        assert!(!request.is_complete());
        assert_eq!(requests.process_data(handle), None);

        requests.initiate_read(&mut bus, handle).unwrap();
        assert!(requests.get(handle).unwrap().is_busy());
        // not exchanged yet
        assert!(requests.poll(&bus).is_empty());

        bus.receive().unwrap();
        assert_eq!(requests.poll(&bus), [handle]);
        let request = requests.get(handle).unwrap();
        assert!(request.is_complete());
        assert_eq!(request.value::<u16>(), Some(300));
        assert_eq!(requests.process_data(handle), Some((SlaveHandle(0), 0x2000, 300)));
        // delivered once per read
        assert_eq!(requests.process_data(handle), None);
        assert!(requests.poll(&bus).is_empty());
    }

    #[test]
    fn failed_reads_are_not_retried() {
        let (mut bus, mut requests, handle) = setup();
        requests.initiate_read(&mut bus, handle).unwrap();
        bus.receive().unwrap();
        assert!(requests.poll(&bus).is_empty());
        let request = requests.get(handle).unwrap();
        assert_eq!(request.state(), SdoRequestState::Error);
        assert_eq!(request.data(), None);

        bus.receive().unwrap();
        requests.poll(&bus);
        assert_eq!(requests.get(handle).unwrap().state(), SdoRequestState::Error);

        // explicit re-arm after the object appeared
        bus.set_object(0, SdoIdx::new(0x2000, 0), &[7, 0]);
        requests.initiate_read(&mut bus, handle).unwrap();
        bus.receive().unwrap();
        requests.poll(&bus);
        assert_eq!(requests.get(handle).unwrap().value::<u16>(), Some(7));
    }

    #[test]
    fn zero_sized_requests_are_invalid() {
        let (mut bus, mut requests, _) = setup();
        assert!(requests.validate().is_ok());
        requests
            .create(&mut bus, SlaveHandle(0), 0, SdoIdx::new(0x2001, 0), 0)
            .unwrap();
        assert!(matches!(requests.validate(), Err(Error::InvalidRequest(_, _))));
    }

    #[test]
    fn short_transfers_clear_old_data() {
        let (mut bus, mut requests, handle) = setup();
        bus.set_object(0, SdoIdx::new(0x2000, 0), &[0x2C, 0x01]);
        requests.initiate_read(&mut bus, handle).unwrap();
        bus.receive().unwrap();
        requests.poll(&bus);
        assert_eq!(requests.get(handle).unwrap().value::<u16>(), Some(300));

        bus.set_object(0, SdoIdx::new(0x2000, 0), &[0x07]);
        requests.initiate_read(&mut bus, handle).unwrap();
        bus.receive().unwrap();
        requests.poll(&bus);
        let request = requests.get(handle).unwrap();
        assert_eq!(request.data(), Some(&[0x07, 0x00][..]));
        assert_eq!(requests.process_data(handle), Some((SlaveHandle(0), 0x2000, 7)));
    }

    #[test]
    fn single_byte_requests_are_not_delivered() {
        let (mut bus, mut requests, _) = setup();
        let handle = requests
            .create(&mut bus, SlaveHandle(0), 0, SdoIdx::new(0x2001, 0), 1)
            .unwrap();
        bus.set_object(0, SdoIdx::new(0x2001, 0), &[0x5A]);
        requests.initiate_read(&mut bus, handle).unwrap();
        bus.receive().unwrap();
        assert_eq!(requests.poll(&bus), [handle]);
        assert!(requests.get(handle).unwrap().is_complete());
        assert_eq!(requests.get(handle).unwrap().value::<u8>(), Some(0x5A));
        assert_eq!(requests.process_data(handle), None);
    }
}
