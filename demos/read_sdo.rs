//! Example: asynchronous SDO reads during cyclic operation
//!
//! A simulated terminal at position 0 asks for its firmware temperature
//! object (0x2000:0, u16). The read is armed from the cyclic callback, the
//! result arrives with one of the following state checks and is handed to
//! the slave's `process_sdo`.
//!
//! Usage
//! ```text
//! RUST_LOG=info cargo run --example read_sdo
//! ```
use ethercat_interface::{
    sim::SimBus, ChannelInfo, ChannelMut, ChannelRef, MasterBuilder, SdoIdx, Slave, SlaveId,
};

const TEMPERATURE: SdoIdx = SdoIdx {
    idx: 0x2000,
    sub_idx: 0,
};

struct Terminal {
    channels: [ChannelInfo; 1],
    temperature: Option<u16>,
}

impl Slave for Terminal {
    fn id(&self) -> SlaveId {
        SlaveId::new(0x2, 0x0c1e3052)
    }

    fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    fn sdo_reads(&self) -> Vec<(SdoIdx, usize)> {
        vec![(TEMPERATURE, 2)]
    }

    fn decode(&mut self, _: usize, _: ChannelRef<'_>) {}

    fn encode(&mut self, _: usize, _: &mut ChannelMut<'_>) {}

    fn process_sdo(&mut self, index: u16, value: u16) {
        if index == TEMPERATURE.idx && self.temperature != Some(value) {
            log::info!("temperature: {} (0.1 °C)", value);
            self.temperature = Some(value);
        }
    }
}

pub fn main() -> Result<(), std::io::Error> {
    env_logger::init();

    let sim = SimBus::default();
    let mut master = MasterBuilder::new()
        .cycle_freq(500.0)
        .check_interval(10)
        .build(sim.clone())?;
    master.add_slave(
        0,
        0,
        Box::new(Terminal {
            channels: [ChannelInfo::input(0x6000, 1, 16)],
            temperature: None,
        }),
    )?;
    master.activate()?;
    sim.set_object(0, TEMPERATURE, &300u16.to_le_bytes());

    let (request, _) = master
        .sdo_requests()
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "no SDO request"))?;
    master.set_ctrlc_handler(None)?;
    master.run(|cycle| {
        let n = cycle.elapsed_cycles();
        if n % 50 == 0 {
            // the "firmware" heats up
            sim.set_object(0, TEMPERATURE, &(300 + n as u16 / 10).to_le_bytes());
            if let Err(e) = cycle.initiate_sdo_read(request) {
                log::warn!("cannot read {}: {}", TEMPERATURE, e);
            }
        }
        if let Some(req) = cycle.sdo_request(request) {
            if n % 50 == 49 {
                log::debug!("cycle {}: request {:?}, value {:?}", n, req.state(), req.value::<u16>());
            }
        }
        if n >= 500 {
            cycle.stop();
        }
    })?;

    if let Some(req) = master.sdo_request(request) {
        println!("last read of {}: {:?}", req.sdo(), req.value::<u16>());
    }
    Ok(())
}
