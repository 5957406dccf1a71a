// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use crate::bus::Bus;
use crate::domain::{Domain, DomainBuilder};
use crate::monitor::{HealthSnapshot, MonitoredSlave, StateMonitor, Transition};
use crate::request::{RequestManager, SdoRequest};
use crate::signal;
use crate::slave::Slave;
use crate::types::*;
use log::*;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

pub const DEFAULT_FREQUENCY: f64 = 1000.0;
pub const DEFAULT_CHECK_INTERVAL: u64 = 10;

/// Custom SIGINT handler, see [Master::set_ctrlc_handler].
pub type InterruptHandler = Box<dyn FnMut(&MasterHandle) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterPhase {
    Unconfigured,
    Configuring,
    Active,
    Running,
    Stopped,
}

struct SlaveEntry {
    addr: SlaveAddr,
    driver: Box<dyn Slave>,
}

#[derive(Default)]
struct Shared {
    stop: AtomicBool,
    running: AtomicBool,
    cycles: AtomicU64,
    elapsed_ns: AtomicU64,
    overruns: AtomicU64,
    errors: AtomicU64,
    health: Mutex<HealthSnapshot>,
}

/// Thread-safe access to a master's loop control and statistics.
#[derive(Clone)]
pub struct MasterHandle {
    shared: Arc<Shared>,
}

impl MasterHandle {
    /// Leave the cyclic loop before its next iteration.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn elapsed_cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    /// Time of the last completed cycle, measured from the start of `run`.
    pub fn elapsed_time(&self) -> Duration {
        Duration::from_nanos(self.shared.elapsed_ns.load(Ordering::SeqCst))
    }

    /// Cycles that started late because the previous one missed its deadline.
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::SeqCst)
    }

    /// Cycles in which a bus call failed.
    pub fn cycle_errors(&self) -> u64 {
        self.shared.errors.load(Ordering::SeqCst)
    }

    /// Result of the last state check.
    pub fn snapshot(&self) -> HealthSnapshot {
        self.shared.health.lock().clone()
    }
}

/// The EtherCAT bus master: owns slave drivers, domain images and the
/// cyclic loop.
pub struct Master<B> {
    bus: B,
    phase: MasterPhase,
    slaves: Vec<SlaveEntry>,
    monitored: Vec<MonitoredSlave>,
    builders: BTreeMap<DomainIdx, DomainBuilder>,
    domains: Vec<Domain>,
    monitor: StateMonitor,
    requests: RequestManager,
    shared: Arc<Shared>,
    interval: Duration,
    check_interval: u64,
    started: Option<Instant>,
    failing: bool,
    signal_token: Option<u64>,
}

impl<B: Bus> Master<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            phase: MasterPhase::Unconfigured,
            slaves: Vec::new(),
            monitored: Vec::new(),
            builders: BTreeMap::new(),
            domains: Vec::new(),
            monitor: StateMonitor::new(),
            requests: RequestManager::new(),
            shared: Arc::new(Shared::default()),
            interval: Duration::from_nanos((1e9 / DEFAULT_FREQUENCY) as u64),
            check_interval: DEFAULT_CHECK_INTERVAL,
            started: None,
            failing: false,
            signal_token: None,
        }
    }

    /// Reserve master `idx` on the bus.
    pub fn connect(&mut self, idx: MasterIdx) -> Result<()> {
        if self.phase != MasterPhase::Unconfigured {
            return Err(Error::AlreadyConnected);
        }
        self.bus.reserve(idx)?;
        self.phase = MasterPhase::Configuring;
        info!("Connected to EtherCAT master {}", idx);
        Ok(())
    }

    pub fn phase(&self) -> MasterPhase {
        self.phase
    }

    pub fn handle(&self) -> MasterHandle {
        MasterHandle {
            shared: self.shared.clone(),
        }
    }

    fn ensure_configuring(&self) -> Result<()> {
        match self.phase {
            MasterPhase::Unconfigured => Err(Error::NotConnected),
            MasterPhase::Configuring => Ok(()),
            _ => Err(Error::AlreadyActive),
        }
    }

    fn ensure_cycling(&self) -> Result<()> {
        match self.phase {
            MasterPhase::Active if self.shared.stop.load(Ordering::SeqCst) => Err(Error::Stopped),
            MasterPhase::Active | MasterPhase::Running => Ok(()),
            MasterPhase::Stopped => Err(Error::Stopped),
            _ => Err(Error::NotActivated),
        }
    }

    /// Register a slave driver at `alias:position`.
    ///
    /// The slave's startup SDOs are queued, its channels registered in the
    /// domains it names and its SDO read requests created.
    pub fn add_slave(
        &mut self,
        alias: u16,
        position: u16,
        slave: Box<dyn Slave>,
    ) -> Result<SlaveHandle> {
        self.ensure_configuring()?;
        let addr = SlaveAddr::new(alias, position);
        if self.slaves.iter().any(|s| s.addr == addr) {
            return Err(Error::DuplicateSlave(addr));
        }
        let domains = slave.domains();
        let count = slave.channels().len();
        if let Some(&channel) = domains.values().flatten().find(|&&c| c >= count) {
            return Err(Error::NoChannel {
                slave: addr,
                channel,
            });
        }

        let config = self.bus.configure_slave(addr, slave.id())?;
        for entry in slave.sdo_config() {
            debug!("Slave {}: startup SDO {} ({} bytes)", addr, entry.sdo, entry.size());
            self.bus.add_sdo(config, &entry)?;
        }
        let reads = slave.sdo_reads();

        let handle = SlaveHandle(self.slaves.len());
        self.slaves.push(SlaveEntry {
            addr,
            driver: slave,
        });
        self.monitored.push(MonitoredSlave {
            handle,
            addr,
            config,
        });
        for (domain, channels) in &domains {
            self.register_channels(handle, channels, *domain)?;
        }
        for (sdo, size) in reads {
            self.create_sdo_request(handle, sdo, size)?;
        }
        debug!("Slave {} added with {} channel(s)", addr, count);
        Ok(handle)
    }

    /// Append channels of a registered slave to a domain's image.
    ///
    /// Returns the offsets the channels will have in that image.
    pub fn register_channels(
        &mut self,
        slave: SlaveHandle,
        channels: &[usize],
        domain: DomainIdx,
    ) -> Result<Vec<Offset>> {
        self.ensure_configuring()?;
        let entry = self.slaves.get(slave.0).ok_or(Error::NoSlave(slave.0))?;
        let infos = channels
            .iter()
            .map(|&c| match entry.driver.channels().get(c) {
                Some(info) => Ok((c, *info)),
                None => Err(Error::NoChannel {
                    slave: entry.addr,
                    channel: c,
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        let offsets = self
            .builders
            .entry(domain)
            .or_insert_with(|| DomainBuilder::new(domain))
            .register(slave, infos);
        debug!(
            "Slave {}: {} channel(s) registered in domain {}",
            entry.addr,
            offsets.len(),
            domain
        );
        Ok(offsets)
    }

    /// Create an asynchronous read request for an object of a slave.
    pub fn create_sdo_request(
        &mut self,
        slave: SlaveHandle,
        sdo: SdoIdx,
        size: usize,
    ) -> Result<RequestHandle> {
        self.ensure_configuring()?;
        let config = self
            .monitored
            .get(slave.0)
            .ok_or(Error::NoSlave(slave.0))?
            .config;
        self.requests.create(&mut self.bus, slave, config, sdo, size)
    }

    /// Download an SDO value to the slave at `position` and wait for the result.
    pub fn config_slave_sdo(&mut self, position: u16, entry: &SdoConfigEntry) -> Result<()> {
        if self.phase == MasterPhase::Unconfigured {
            return Err(Error::NotConnected);
        }
        debug!("Slave {}: SDO download {}", position, entry.sdo);
        self.bus
            .sdo_download(position, entry.sdo, &entry.data)
            .map_err(|e| {
                warn!("Slave {}: SDO download {} failed: {}", position, entry.sdo, e);
                e
            })
    }

    /// Freeze all domains and hand them to the bus.
    pub fn activate(&mut self) -> Result<()> {
        self.ensure_configuring()?;
        if self.builders.is_empty() {
            return Err(Error::EmptyDomain(0));
        }
        if let Some(builder) = self.builders.values().find(|b| b.is_empty()) {
            return Err(Error::EmptyDomain(builder.idx()));
        }
        self.requests.validate()?;
        let domains = self
            .builders
            .values()
            .cloned()
            .map(DomainBuilder::build)
            .collect::<Result<Vec<_>>>()?;
        self.bus.activate(&domains)?;
        self.builders.clear();
        self.domains = domains;
        self.phase = MasterPhase::Active;
        for domain in &self.domains {
            debug!("Domain {}: {} bytes", domain.idx(), domain.size());
        }
        info!(
            "Master activated with {} slave(s) in {} domain(s)",
            self.slaves.len(),
            self.domains.len()
        );
        Ok(())
    }

    /// Domain and offset of a registered channel, once activated.
    pub fn channel_offset(&self, slave: SlaveHandle, channel: usize) -> Option<(DomainIdx, Offset)> {
        self.domains
            .iter()
            .find_map(|d| d.find(slave, channel).map(|r| (d.idx(), r.offset)))
    }

    pub fn domain(&self, idx: DomainIdx) -> Option<&Domain> {
        self.domains.iter().find(|d| d.idx() == idx)
    }

    pub fn slave(&self, slave: SlaveHandle) -> Option<&dyn Slave> {
        self.slaves.get(slave.0).map(|s| &*s.driver as &dyn Slave)
    }

    pub fn slave_mut(&mut self, slave: SlaveHandle) -> Option<&mut dyn Slave> {
        self.slaves
            .get_mut(slave.0)
            .map(|s| &mut *s.driver as &mut dyn Slave)
    }

    pub fn slave_addr(&self, slave: SlaveHandle) -> Option<SlaveAddr> {
        self.slaves.get(slave.0).map(|s| s.addr)
    }

    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    pub fn initiate_sdo_read(&mut self, request: RequestHandle) -> Result<()> {
        if self.phase == MasterPhase::Unconfigured {
            return Err(Error::NotConnected);
        }
        self.requests.initiate_read(&mut self.bus, request)
    }

    pub fn sdo_request(&self, request: RequestHandle) -> Option<&SdoRequest> {
        self.requests.get(request)
    }

    /// All SDO requests with the slave that owns them.
    pub fn sdo_requests(&self) -> impl Iterator<Item = (RequestHandle, &SdoRequest)> {
        self.requests.iter()
    }

    /// Set the cycle frequency in Hz.
    pub fn set_frequency(&mut self, hz: f64) -> Result<()> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::InvalidFrequency(hz));
        }
        self.interval = Duration::from_nanos((1e9 / hz) as u64);
        Ok(())
    }

    /// The cycle period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the state checks every `cycles` cycles.
    pub fn set_check_interval(&mut self, cycles: u64) {
        self.check_interval = cycles.max(1);
    }

    pub fn check_interval(&self) -> u64 {
        self.check_interval
    }

    pub fn elapsed_cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    pub fn elapsed_time(&self) -> Duration {
        self.handle().elapsed_time()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.shared.health.lock().clone()
    }

    /// Install the process SIGINT handler for this master.
    ///
    /// `None` installs the default handler, which stops the loop and logs
    /// the timing statistics. The handler is removed when the master is
    /// dropped.
    pub fn set_ctrlc_handler(&mut self, handler: Option<InterruptHandler>) -> Result<()> {
        let handle = self.handle();
        let mut handler: InterruptHandler = match handler {
            Some(handler) => handler,
            None => Box::new(default_interrupt),
        };
        let token = signal::install(Box::new(move || handler(&handle)))?;
        self.signal_token = Some(token);
        Ok(())
    }

    /// Whether this master's SIGINT handler is the one currently installed.
    pub fn has_ctrlc_handler(&self) -> bool {
        self.signal_token.map_or(false, signal::is_installed)
    }

    /// Run the cyclic loop until stopped.
    ///
    /// `callback` is called once per cycle, after the inputs have been
    /// decoded and before the outputs are encoded.
    pub fn run<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&mut Cycle<'_, B>),
    {
        match self.phase {
            MasterPhase::Active => (),
            MasterPhase::Stopped => return Err(Error::Stopped),
            _ => return Err(Error::NotActivated),
        }
        self.phase = MasterPhase::Running;
        self.shared.running.store(true, Ordering::SeqCst);
        info!("Entering cyclic operation, period {:?}", self.interval);

        let start = Instant::now();
        self.started = Some(start);
        let mut deadline = start;
        while !self.shared.stop.load(Ordering::SeqCst) {
            let result = self.read_domains(None);
            callback(&mut Cycle { master: &mut *self });
            let result = result.and(self.write_domains(None));
            let _ = self.complete_cycle(result);

            // wait until next cycle, never stacking late ones
            deadline += self.interval;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                self.shared.overruns.fetch_add(1, Ordering::SeqCst);
                deadline = now;
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        self.phase = MasterPhase::Stopped;
        let handle = self.handle();
        info!(
            "Cyclic operation stopped after {} cycles in {:?}, {} overrun(s), {} failed cycle(s)",
            handle.elapsed_cycles(),
            handle.elapsed_time(),
            handle.overruns(),
            handle.cycle_errors()
        );
        Ok(())
    }

    /// Perform one full cycle on all domains without a callback.
    pub fn update(&mut self) -> Result<()> {
        self.ensure_cycling()?;
        let result = self.read_domains(None);
        let result = result.and(self.write_domains(None));
        self.complete_cycle(result)
    }

    /// First half of a cycle on one domain: exchange and decode inputs.
    pub fn read_data(&mut self, domain: DomainIdx) -> Result<()> {
        self.ensure_cycling()?;
        self.ensure_domain(domain)?;
        self.read_domains(Some(domain))
    }

    /// Second half of a cycle on one domain: encode outputs and send.
    pub fn write_data(&mut self, domain: DomainIdx) -> Result<()> {
        self.ensure_cycling()?;
        self.ensure_domain(domain)?;
        let result = self.write_domains(Some(domain));
        self.complete_cycle(result)
    }

    fn ensure_domain(&self, domain: DomainIdx) -> Result<()> {
        match self.domain(domain) {
            Some(_) => Ok(()),
            None => Err(Error::EmptyDomain(domain)),
        }
    }

    fn read_domains(&mut self, only: Option<DomainIdx>) -> Result<()> {
        self.bus.receive()?;
        for domain in self.domains.iter_mut().filter(|d| selected(d, only)) {
            self.bus.process(domain.idx(), domain.data_mut())?;
        }
        if self.elapsed_cycles() % self.check_interval == 0 {
            self.check_states();
        }
        for domain in self.domains.iter().filter(|d| selected(d, only)) {
            for reg in domain.registrations() {
                if reg.direction != SyncDirection::Input {
                    continue;
                }
                if let Some(entry) = self.slaves.get_mut(reg.slave.0) {
                    entry.driver.decode(reg.channel, domain.input(reg));
                }
            }
        }
        Ok(())
    }

    fn write_domains(&mut self, only: Option<DomainIdx>) -> Result<()> {
        for domain in self.domains.iter_mut().filter(|d| selected(d, only)) {
            for i in 0..domain.registrations().len() {
                let reg = domain.registrations()[i];
                if reg.direction != SyncDirection::Output {
                    continue;
                }
                if let Some(entry) = self.slaves.get_mut(reg.slave.0) {
                    let mut output = domain.output(&reg);
                    entry.driver.encode(reg.channel, &mut output);
                }
            }
        }
        for domain in self.domains.iter().filter(|d| selected(d, only)) {
            self.bus.queue(domain.idx(), domain.data())?;
        }
        self.bus.send()
    }

    /// Poll SDO requests and run the state monitor. Failures are logged
    /// by the monitor and never fail the cycle.
    fn check_states(&mut self) {
        for request in self.requests.poll(&self.bus) {
            if let Some((slave, index, value)) = self.requests.process_data(request) {
                debug!("SDO 0x{:04X} of slave {} read: {}", index, slave.0, value);
                if let Some(entry) = self.slaves.get_mut(slave.0) {
                    entry.driver.process_sdo(index, value);
                }
            }
        }

        let changes = self.monitor.check(
            &self.bus,
            self.domains.iter().map(Domain::idx),
            &self.monitored,
        );
        for change in changes {
            if change.is_degraded() {
                warn!("{}", change);
            } else {
                info!("{}", change);
            }
            if let Transition::SlaveOperational {
                slave, operational, ..
            } = change
            {
                if let Some(entry) = self.slaves.get_mut(slave.0) {
                    entry.driver.set_operational(operational);
                }
            }
        }
        *self.shared.health.lock() = self.monitor.snapshot(self.elapsed_cycles());
    }

    fn complete_cycle(&mut self, result: Result<()>) -> Result<()> {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.shared.cycles.fetch_add(1, Ordering::SeqCst);
        self.shared
            .elapsed_ns
            .store(started.elapsed().as_nanos() as u64, Ordering::SeqCst);
        match &result {
            Ok(()) if self.failing => {
                info!("Cycle errors cleared");
                self.failing = false;
            }
            Ok(()) => (),
            Err(e) => {
                self.shared.errors.fetch_add(1, Ordering::SeqCst);
                if !self.failing {
                    warn!("error in cycle: {}", e);
                    self.failing = true;
                }
            }
        }
        result
    }
}

impl<B> Drop for Master<B> {
    fn drop(&mut self) {
        if let Some(token) = self.signal_token.take() {
            signal::clear(token);
        }
    }
}

fn selected(domain: &Domain, only: Option<DomainIdx>) -> bool {
    only.map_or(true, |idx| domain.idx() == idx)
}

fn default_interrupt(handle: &MasterHandle) {
    info!(
        "Interrupted after {} cycles ({:.3} s, {} overrun(s)), stopping",
        handle.elapsed_cycles(),
        handle.elapsed_time().as_secs_f64(),
        handle.overruns()
    );
    handle.stop();
}

/// Access to the master from inside the cyclic callback.
pub struct Cycle<'a, B> {
    master: &'a mut Master<B>,
}

impl<B: Bus> Cycle<'_, B> {
    /// Leave the loop after this cycle.
    pub fn stop(&self) {
        self.master.shared.stop.store(true, Ordering::SeqCst);
    }

    /// Number of the running cycle, counted from zero.
    pub fn elapsed_cycles(&self) -> u64 {
        self.master.elapsed_cycles()
    }

    pub fn elapsed_time(&self) -> Duration {
        self.master.elapsed_time()
    }

    pub fn handle(&self) -> MasterHandle {
        self.master.handle()
    }

    pub fn slave_mut(&mut self, slave: SlaveHandle) -> Option<&mut dyn Slave> {
        self.master.slave_mut(slave)
    }

    pub fn initiate_sdo_read(&mut self, request: RequestHandle) -> Result<()> {
        self.master.initiate_sdo_read(request)
    }

    pub fn sdo_request(&self, request: RequestHandle) -> Option<&SdoRequest> {
        self.master.sdo_request(request)
    }

    pub fn domain(&self, idx: DomainIdx) -> Option<&Domain> {
        self.master.domain(idx)
    }

    /// Raw image access; changes to output channels are overwritten by the
    /// slaves' `encode`.
    pub fn domain_mut(&mut self, idx: DomainIdx) -> Option<&mut Domain> {
        self.master.domains.iter_mut().find(|d| d.idx() == idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ChannelMut, ChannelRef};
    use crate::sim::SimBus;

    struct Dummy(Vec<ChannelInfo>);

    impl Slave for Dummy {
        fn id(&self) -> SlaveId {
            SlaveId::new(2, 0x03ec3052)
        }
        fn channels(&self) -> &[ChannelInfo] {
            &self.0
        }
        fn decode(&mut self, _: usize, _: ChannelRef<'_>) {}
        fn encode(&mut self, _: usize, _: &mut ChannelMut<'_>) {}
    }

    fn dummy() -> Box<dyn Slave> {
        Box::new(Dummy(vec![ChannelInfo::input(0x6000, 1, 8)]))
    }

    #[test]
    fn phases() {
        let mut master = Master::new(SimBus::default());
        assert!(matches!(master.add_slave(0, 0, dummy()), Err(Error::NotConnected)));
        assert!(matches!(master.update(), Err(Error::NotActivated)));
        master.connect(0).unwrap();
        assert!(matches!(master.connect(0), Err(Error::AlreadyConnected)));
        assert!(matches!(master.activate(), Err(Error::EmptyDomain(0))));
        master.add_slave(0, 0, dummy()).unwrap();
        assert!(matches!(master.run(|_| ()), Err(Error::NotActivated)));
        master.activate().unwrap();
        assert_eq!(master.phase(), MasterPhase::Active);
        master.update().unwrap();
        assert_eq!(master.elapsed_cycles(), 1);
    }

    #[test]
    fn frequency() {
        let mut master = Master::new(SimBus::default());
        assert_eq!(master.interval(), Duration::from_millis(1));
        master.set_frequency(250.0).unwrap();
        assert_eq!(master.interval(), Duration::from_millis(4));
        for hz in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(master.set_frequency(hz), Err(Error::InvalidFrequency(_))));
        }
        assert_eq!(master.interval(), Duration::from_millis(4));
    }

    #[test]
    fn unknown_channels_are_rejected() {
        struct Bad;
        impl Slave for Bad {
            fn id(&self) -> SlaveId {
                SlaveId::new(1, 1)
            }
            fn channels(&self) -> &[ChannelInfo] {
                &[]
            }
            fn domains(&self) -> DomainMap {
                let mut map = DomainMap::new();
                map.insert(0, vec![2]);
                map
            }
            fn decode(&mut self, _: usize, _: ChannelRef<'_>) {}
            fn encode(&mut self, _: usize, _: &mut ChannelMut<'_>) {}
        }

        let mut master = Master::new(SimBus::default());
        master.connect(0).unwrap();
        match master.add_slave(0, 4, Box::new(Bad)) {
            Err(Error::NoChannel { slave, channel: 2 }) => assert_eq!(slave, SlaveAddr::ByPos(4)),
            other => panic!("unexpected {:?}", other.map(|h| h.index())),
        }
        assert_eq!(master.slave_count(), 0);
        let handle = master.add_slave(0, 4, dummy()).unwrap();
        assert!(matches!(
            master.register_channels(handle, &[1], 0),
            Err(Error::NoChannel { channel: 1, .. })
        ));
    }

    #[test]
    fn default_interrupt_stops_the_loop() {
        let _guard = signal::TEST_LOCK.lock();
        let mut master = Master::new(SimBus::default());
        master.connect(0).unwrap();
        master.add_slave(0, 0, dummy()).unwrap();
        master.activate().unwrap();
        master.set_ctrlc_handler(None).unwrap();

        let handle = master.handle();
        let interrupter = thread::spawn(move || {
            while handle.elapsed_cycles() < 3 {
                thread::sleep(Duration::from_millis(1));
            }
            signal::dispatch();
        });
        master.run(|_| ()).unwrap();
        interrupter.join().unwrap();
        assert_eq!(master.phase(), MasterPhase::Stopped);
        assert!(master.elapsed_cycles() >= 3);
        assert!(!master.handle().is_running());
    }
}
