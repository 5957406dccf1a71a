// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! An in-memory [Bus] for tests, demos and dry runs without hardware.
//!
//! All clones of a [SimBus] share one simulated segment, so a test can hand
//! one clone to the master and keep another one to inject input data, flip
//! the link, change slave states or answer SDO requests.
//!
//! Domain data is exchanged like a logical read/write datagram: output bits
//! come back as queued, input bits are filled in by the slaves from the
//! values set with [SimBus::write_input].

use crate::bus::Bus;
use crate::domain::Domain;
use crate::image::channel_mut;
use crate::types::*;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::Arc,
};

/// Bus calls recorded by the simulation, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Receive,
    Process(DomainIdx),
    Queue(DomainIdx),
    Send,
    MasterState,
    DomainState(DomainIdx),
    ConfigState(SlaveConfigIdx),
    SdoDownload(u16, SdoIdx),
    SdoRead(SdoRequestIdx),
}

struct SimSlave {
    addr: SlaveAddr,
    startup: Vec<SdoConfigEntry>,
    state: Option<SlaveConfigState>,
}

struct SimDomain {
    wire: Vec<u8>,
    /// bits owned by input channels
    input_mask: Vec<u8>,
    inputs: Vec<u8>,
    slaves: u32,
    state: Option<DomainState>,
}

struct SimRequest {
    config: SlaveConfigIdx,
    sdo: SdoIdx,
    size: usize,
    state: SdoRequestState,
    data: Vec<u8>,
}

struct SimState {
    master_count: u32,
    reserved: Option<MasterIdx>,
    link_up: bool,
    receive_fails: bool,
    state_fails: bool,
    active: bool,
    slaves: Vec<SimSlave>,
    domains: BTreeMap<DomainIdx, SimDomain>,
    objects: HashMap<(u16, SdoIdx), Vec<u8>>,
    aborts: HashMap<(u16, SdoIdx), u32>,
    requests: Vec<SimRequest>,
    events: Vec<SimEvent>,
    frames: u64,
}

#[derive(Clone)]
pub struct SimBus {
    inner: Arc<Mutex<SimState>>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new(1)
    }
}

fn not_found(what: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::NotFound, what))
}

impl SimBus {
    /// A segment reachable through `master_count` masters, with the link up.
    pub fn new(master_count: u32) -> Self {
        SimBus {
            inner: Arc::new(Mutex::new(SimState {
                master_count,
                reserved: None,
                link_up: true,
                receive_fails: false,
                state_fails: false,
                active: false,
                slaves: Vec::new(),
                domains: BTreeMap::new(),
                objects: HashMap::new(),
                aborts: HashMap::new(),
                requests: Vec::new(),
                events: Vec::new(),
                frames: 0,
            })),
        }
    }

    pub fn set_link_up(&self, up: bool) {
        self.inner.lock().link_up = up;
    }

    /// Make `receive` fail, like a broken network device.
    pub fn set_receive_error(&self, fail: bool) {
        self.inner.lock().receive_fails = fail;
    }

    /// Make the master state query fail.
    pub fn set_state_error(&self, fail: bool) {
        self.inner.lock().state_fails = fail;
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Override the reported state of a configured slave.
    pub fn set_slave_state(&self, addr: SlaveAddr, state: SlaveConfigState) {
        let mut sim = self.inner.lock();
        if let Some(slave) = sim.slaves.iter_mut().find(|s| s.addr == addr) {
            slave.state = Some(state);
        }
    }

    /// Override the reported state of an activated domain.
    pub fn set_domain_state(&self, domain: DomainIdx, state: DomainState) {
        if let Some(d) = self.inner.lock().domains.get_mut(&domain) {
            d.state = Some(state);
        }
    }

    /// Store an object in the dictionary of the slave at `position`.
    pub fn set_object(&self, position: u16, sdo: SdoIdx, data: &[u8]) {
        self.inner.lock().objects.insert((position, sdo), data.to_vec());
    }

    pub fn object(&self, position: u16, sdo: SdoIdx) -> Option<Vec<u8>> {
        self.inner.lock().objects.get(&(position, sdo)).cloned()
    }

    /// Make transfers of this object fail with `code`.
    pub fn reject_sdo(&self, position: u16, sdo: SdoIdx, code: u32) {
        self.inner.lock().aborts.insert((position, sdo), code);
    }

    /// SDO entries queued for a slave through [Bus::add_sdo].
    pub fn startup_sdos(&self, addr: SlaveAddr) -> Vec<SdoConfigEntry> {
        let sim = self.inner.lock();
        sim.slaves
            .iter()
            .find(|s| s.addr == addr)
            .map(|s| s.startup.clone())
            .unwrap_or_default()
    }

    /// Set the input data slaves deliver from the next exchange on.
    ///
    /// Only bits of input channels are used, the rest of `data` is ignored.
    pub fn write_input(&self, domain: DomainIdx, offset: usize, data: &[u8]) {
        if let Some(d) = self.inner.lock().domains.get_mut(&domain) {
            let end = (offset + data.len()).min(d.inputs.len());
            if offset < end {
                d.inputs[offset..end].copy_from_slice(&data[..end - offset]);
            }
        }
    }

    /// Domain data as last queued by the master.
    pub fn sent(&self, domain: DomainIdx) -> Option<Vec<u8>> {
        self.inner.lock().domains.get(&domain).map(|d| d.wire.clone())
    }

    pub fn frames_sent(&self) -> u64 {
        self.inner.lock().frames
    }

    /// Drain the recorded bus calls.
    pub fn take_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut self.inner.lock().events)
    }
}

impl SimState {
    fn slave(&self, config: SlaveConfigIdx) -> Result<&SimSlave> {
        self.slaves
            .get(config as usize)
            .ok_or_else(|| not_found(format!("no slave config {}", config)))
    }

    fn default_al_state(&self) -> AlState {
        if self.active {
            AlState::Op
        } else {
            AlState::Preop
        }
    }

    fn complete_requests(&mut self) {
        for i in 0..self.requests.len() {
            if self.requests[i].state != SdoRequestState::Busy {
                continue;
            }
            let position = self.slaves[self.requests[i].config as usize].addr.position();
            let key = (position, self.requests[i].sdo);
            let request = &mut self.requests[i];
            match self.objects.get(&key) {
                Some(data) if !self.aborts.contains_key(&key) => {
                    let n = data.len().min(request.size);
                    request.data = data[..n].to_vec();
                    request.state = SdoRequestState::Success;
                }
                _ => request.state = SdoRequestState::Error,
            }
        }
    }
}

impl Bus for SimBus {
    fn reserve(&mut self, idx: MasterIdx) -> Result<()> {
        let mut sim = self.inner.lock();
        if idx >= sim.master_count || sim.reserved.is_some() {
            return Err(Error::NoSuchMaster(idx));
        }
        sim.reserved = Some(idx);
        Ok(())
    }

    fn configure_slave(&mut self, addr: SlaveAddr, _id: SlaveId) -> Result<SlaveConfigIdx> {
        let mut sim = self.inner.lock();
        sim.slaves.push(SimSlave {
            addr,
            startup: Vec::new(),
            state: None,
        });
        Ok((sim.slaves.len() - 1) as SlaveConfigIdx)
    }

    fn add_sdo(&mut self, config: SlaveConfigIdx, entry: &SdoConfigEntry) -> Result<()> {
        let mut sim = self.inner.lock();
        sim.slave(config)?;
        sim.slaves[config as usize].startup.push(entry.clone());
        Ok(())
    }

    fn create_sdo_request(
        &mut self,
        config: SlaveConfigIdx,
        sdo: SdoIdx,
        size: usize,
    ) -> Result<SdoRequestIdx> {
        let mut sim = self.inner.lock();
        sim.slave(config)?;
        sim.requests.push(SimRequest {
            config,
            sdo,
            size,
            state: SdoRequestState::Unused,
            data: vec![0; size],
        });
        Ok(sim.requests.len() - 1)
    }

    fn activate(&mut self, domains: &[Domain]) -> Result<()> {
        let mut sim = self.inner.lock();
        if !sim.link_up {
            return Err(Error::LinkDown);
        }
        if sim.active {
            return Err(Error::AlreadyActive);
        }
        for domain in domains {
            let mut input_mask = vec![0; domain.size()];
            for reg in domain.registrations() {
                if reg.direction == SyncDirection::Input {
                    channel_mut(&mut input_mask, reg.offset, reg.bit_len).set_raw(u64::MAX);
                }
            }
            sim.domains.insert(
                domain.idx(),
                SimDomain {
                    wire: vec![0; domain.size()],
                    input_mask,
                    inputs: vec![0; domain.size()],
                    slaves: domain.slave_count() as u32,
                    state: None,
                },
            );
        }
        // startup SDOs are applied while the slaves are brought up
        let startup: Vec<_> = sim
            .slaves
            .iter()
            .flat_map(|s| {
                let pos = s.addr.position();
                s.startup.iter().map(move |e| ((pos, e.sdo), e.data.clone()))
            })
            .collect();
        sim.objects.extend(startup);
        sim.active = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<()> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::Receive);
        if sim.receive_fails {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated receive failure",
            )));
        }
        if sim.link_up {
            sim.complete_requests();
        }
        Ok(())
    }

    fn process(&mut self, domain: DomainIdx, image: &mut [u8]) -> Result<()> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::Process(domain));
        let d = sim
            .domains
            .get(&domain)
            .ok_or_else(|| not_found(format!("domain {} is not bound", domain)))?;
        let merged = d.wire.iter().zip(&d.inputs).zip(&d.input_mask);
        for (dst, ((wire, input), mask)) in image.iter_mut().zip(merged) {
            *dst = (wire & !mask) | (input & mask);
        }
        Ok(())
    }

    fn queue(&mut self, domain: DomainIdx, image: &[u8]) -> Result<()> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::Queue(domain));
        let d = sim
            .domains
            .get_mut(&domain)
            .ok_or_else(|| not_found(format!("domain {} is not bound", domain)))?;
        let n = d.wire.len().min(image.len());
        d.wire[..n].copy_from_slice(&image[..n]);
        Ok(())
    }

    fn send(&mut self) -> Result<()> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::Send);
        sim.frames += 1;
        Ok(())
    }

    fn state(&self) -> Result<MasterState> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::MasterState);
        if sim.state_fails {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated state query failure",
            )));
        }
        if !sim.link_up {
            return Ok(MasterState::default());
        }
        let default = sim.default_al_state();
        let al_states = sim
            .slaves
            .iter()
            .map(|s| s.state.map_or(default, |st| st.al_state) as u8)
            .fold(0, |acc, st| acc | st);
        Ok(MasterState {
            slaves_responding: sim.slaves.len() as u32,
            al_states,
            link_up: true,
        })
    }

    fn domain_state(&self, domain: DomainIdx) -> Result<DomainState> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::DomainState(domain));
        let link_up = sim.link_up;
        let d = sim
            .domains
            .get(&domain)
            .ok_or_else(|| not_found(format!("domain {} is not bound", domain)))?;
        Ok(match d.state {
            Some(state) => state,
            None if link_up => DomainState {
                working_counter: d.slaves,
                wc_state: WcState::Complete,
                redundancy_active: false,
            },
            None => DomainState::default(),
        })
    }

    fn config_state(&self, config: SlaveConfigIdx) -> Result<SlaveConfigState> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::ConfigState(config));
        let default = SlaveConfigState {
            online: sim.link_up,
            operational: sim.link_up && sim.active,
            al_state: sim.default_al_state(),
            error_flag: false,
        };
        Ok(sim.slave(config)?.state.unwrap_or(default))
    }

    fn sdo_download(&mut self, position: u16, sdo: SdoIdx, data: &[u8]) -> Result<()> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::SdoDownload(position, sdo));
        if !sim.link_up {
            return Err(Error::LinkDown);
        }
        if let Some(&code) = sim.aborts.get(&(position, sdo)) {
            return Err(Error::SdoAbort { sdo, code });
        }
        if !sim.slaves.iter().any(|s| s.addr.position() == position) {
            return Err(not_found(format!("no slave at position {}", position)));
        }
        sim.objects.insert((position, sdo), data.to_vec());
        Ok(())
    }

    fn sdo_request_read(&mut self, request: SdoRequestIdx) -> Result<()> {
        let mut sim = self.inner.lock();
        sim.events.push(SimEvent::SdoRead(request));
        let r = sim
            .requests
            .get_mut(request)
            .ok_or(Error::NoRequest(request))?;
        r.state = SdoRequestState::Busy;
        Ok(())
    }

    fn sdo_request_state(&self, request: SdoRequestIdx) -> SdoRequestState {
        self.inner
            .lock()
            .requests
            .get(request)
            .map_or(SdoRequestState::Error, |r| r.state)
    }

    fn sdo_request_data(&self, request: SdoRequestIdx, target: &mut [u8]) -> usize {
        let sim = self.inner.lock();
        match sim.requests.get(request) {
            Some(r) => {
                let n = r.data.len().min(target.len());
                target[..n].copy_from_slice(&r.data[..n]);
                n
            }
            None => 0,
        }
    }
}
