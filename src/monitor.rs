// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Master, domain and slave state polling.
//!
//! Every pass compares fresh states with the cached ones and reports each
//! difference as a [Transition]. The cache starts out zeroed, so the first
//! pass reports the initial bus state.

use crate::bus::Bus;
use crate::types::*;
use log::*;
use std::{collections::BTreeMap, fmt};

/// A change observed by the state monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Link(bool),
    SlavesResponding(u32),
    AlStates(u8),
    WorkingCounter {
        domain: DomainIdx,
        working_counter: u32,
        wc_state: WcState,
    },
    SlaveOnline {
        slave: SlaveHandle,
        addr: SlaveAddr,
        online: bool,
    },
    SlaveOperational {
        slave: SlaveHandle,
        addr: SlaveAddr,
        operational: bool,
    },
    SlaveAlState {
        slave: SlaveHandle,
        addr: SlaveAddr,
        al_state: AlState,
    },
    SlaveConfigError {
        slave: SlaveHandle,
        addr: SlaveAddr,
        error: bool,
    },
}

impl Transition {
    /// Whether the change makes the bus less healthy.
    pub fn is_degraded(&self) -> bool {
        match *self {
            Transition::Link(up) => !up,
            Transition::SlavesResponding(_) | Transition::AlStates(_) => false,
            Transition::WorkingCounter { wc_state, .. } => wc_state != WcState::Complete,
            Transition::SlaveOnline { online, .. } => !online,
            Transition::SlaveOperational { operational, .. } => !operational,
            Transition::SlaveAlState { .. } => false,
            Transition::SlaveConfigError { error, .. } => error,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Transition::Link(up) => write!(f, "Link is {}", if up { "up" } else { "down" }),
            Transition::SlavesResponding(n) => write!(f, "{} slave(s) responding", n),
            Transition::AlStates(st) => write!(f, "AL states: 0x{:02X}", st),
            Transition::WorkingCounter {
                domain,
                working_counter,
                wc_state,
            } => write!(
                f,
                "Domain {}: WC {} ({:?})",
                domain, working_counter, wc_state
            ),
            Transition::SlaveOnline { addr, online, .. } => write!(
                f,
                "Slave {}: {}",
                addr,
                if online { "online" } else { "offline" }
            ),
            Transition::SlaveOperational {
                addr, operational, ..
            } => write!(
                f,
                "Slave {}: {}operational",
                addr,
                if operational { "" } else { "not " }
            ),
            Transition::SlaveAlState { addr, al_state, .. } => write!(
                f,
                "Slave {}: state 0x{:02X} ({:?})",
                addr, al_state as u8, al_state
            ),
            Transition::SlaveConfigError { addr, error, .. } => write!(
                f,
                "Slave {}: configuration {}",
                addr,
                if error { "failed" } else { "error cleared" }
            ),
        }
    }
}

/// Copy of the last monitor pass, readable from other threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSnapshot {
    /// cycle number of the pass
    pub cycle: u64,
    pub master: MasterState,
    pub domains: BTreeMap<DomainIdx, DomainState>,
    pub slaves: Vec<(SlaveAddr, SlaveConfigState)>,
}

/// What the monitor needs to know about a registered slave.
#[derive(Debug, Clone, Copy)]
pub struct MonitoredSlave {
    pub handle: SlaveHandle,
    pub addr: SlaveAddr,
    pub config: SlaveConfigIdx,
}

#[derive(Debug, Default)]
pub struct StateMonitor {
    master: MasterState,
    domains: BTreeMap<DomainIdx, DomainState>,
    slaves: Vec<(SlaveAddr, SlaveConfigState)>,
    passes: u64,
}

impl StateMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn master_state(&self) -> MasterState {
        self.master
    }

    pub fn domain_state(&self, domain: DomainIdx) -> Option<DomainState> {
        self.domains.get(&domain).copied()
    }

    pub fn slave_state(&self, slave: SlaveHandle) -> Option<SlaveConfigState> {
        self.slaves.get(slave.0).map(|(_, st)| *st)
    }

    /// Run all three checks.
    ///
    /// A failed query is logged and leaves the cached state of that part
    /// untouched; the remaining parts are still checked.
    pub fn check<B: Bus>(
        &mut self,
        bus: &B,
        domains: impl IntoIterator<Item = DomainIdx>,
        slaves: &[MonitoredSlave],
    ) -> Vec<Transition> {
        let mut changes = Vec::new();
        match bus.state() {
            Ok(new) => self.update_master(new, &mut changes),
            Err(e) => warn!("Master state query failed: {}", e),
        }
        for domain in domains {
            match bus.domain_state(domain) {
                Ok(new) => self.update_domain(domain, new, &mut changes),
                Err(e) => warn!("Domain {}: state query failed: {}", domain, e),
            }
        }
        for slave in slaves {
            match bus.config_state(slave.config) {
                Ok(new) => self.update_slave(slave, new, &mut changes),
                Err(e) => warn!("Slave {}: state query failed: {}", slave.addr, e),
            }
        }
        self.passes += 1;
        changes
    }

    fn update_master(&mut self, new: MasterState, changes: &mut Vec<Transition>) {
        let old = std::mem::replace(&mut self.master, new);
        if new.slaves_responding != old.slaves_responding {
            changes.push(Transition::SlavesResponding(new.slaves_responding));
        }
        if new.al_states != old.al_states {
            changes.push(Transition::AlStates(new.al_states));
        }
        if new.link_up != old.link_up {
            changes.push(Transition::Link(new.link_up));
        }
    }

    fn update_domain(&mut self, domain: DomainIdx, new: DomainState, changes: &mut Vec<Transition>) {
        let old = self.domains.insert(domain, new).unwrap_or_default();
        if new.working_counter != old.working_counter || new.wc_state != old.wc_state {
            changes.push(Transition::WorkingCounter {
                domain,
                working_counter: new.working_counter,
                wc_state: new.wc_state,
            });
        }
    }

    fn update_slave(
        &mut self,
        slave: &MonitoredSlave,
        new: SlaveConfigState,
        changes: &mut Vec<Transition>,
    ) {
        let i = slave.handle.0;
        if self.slaves.len() <= i {
            self.slaves
                .resize(i + 1, (slave.addr, SlaveConfigState::default()));
        }
        let (_, old) = std::mem::replace(&mut self.slaves[i], (slave.addr, new));
        let (handle, addr) = (slave.handle, slave.addr);
        if new.al_state != old.al_state {
            changes.push(Transition::SlaveAlState {
                slave: handle,
                addr,
                al_state: new.al_state,
            });
        }
        if new.online != old.online {
            changes.push(Transition::SlaveOnline {
                slave: handle,
                addr,
                online: new.online,
            });
        }
        if new.operational != old.operational {
            changes.push(Transition::SlaveOperational {
                slave: handle,
                addr,
                operational: new.operational,
            });
        }
        if new.error_flag != old.error_flag {
            changes.push(Transition::SlaveConfigError {
                slave: handle,
                addr,
                error: new.error_flag,
            });
        }
    }

    pub fn snapshot(&self, cycle: u64) -> HealthSnapshot {
        HealthSnapshot {
            cycle,
            master: self.master,
            domains: self.domains.clone(),
            slaves: self.slaves.clone(),
        }
    }
}
