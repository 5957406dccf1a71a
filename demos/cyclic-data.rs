//! Example: cyclic process data on a simulated bus
//!
//! A 4-channel digital input terminal and a 4-channel digital output terminal
//! share domain 0. The outputs mirror the inputs, which the callback changes
//! on the simulated bus every 100 cycles. Stops after 2000 cycles or on
//! Ctrl-C.
//!
//! Usage
//! ```text
//! RUST_LOG=info cargo run --example cyclic-data
//! ```
use ethercat_interface::{
    sim::SimBus, ChannelInfo, ChannelMut, ChannelRef, MasterBuilder, Slave, SlaveId,
};
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

struct DigitalInputs {
    channels: Vec<ChannelInfo>,
    state: Arc<AtomicU8>,
}

impl Slave for DigitalInputs {
    fn id(&self) -> SlaveId {
        SlaveId::new(0x2, 0x03ec3052)
    }

    fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    fn decode(&mut self, channel: usize, input: ChannelRef<'_>) {
        let mask = 1 << channel;
        if input.bit() {
            self.state.fetch_or(mask, Ordering::Relaxed);
        } else {
            self.state.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    fn encode(&mut self, _: usize, _: &mut ChannelMut<'_>) {}

    fn set_operational(&mut self, operational: bool) {
        log::info!("inputs operational: {}", operational);
    }
}

struct DigitalOutputs {
    channels: Vec<ChannelInfo>,
    state: Arc<AtomicU8>,
}

impl Slave for DigitalOutputs {
    fn id(&self) -> SlaveId {
        SlaveId::new(0x2, 0x07d43052)
    }

    fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    fn decode(&mut self, _: usize, _: ChannelRef<'_>) {}

    fn encode(&mut self, channel: usize, output: &mut ChannelMut<'_>) {
        output.set_bit(self.state.load(Ordering::Relaxed) & (1 << channel) != 0);
    }
}

pub fn main() -> Result<(), std::io::Error> {
    env_logger::init();

    let sim = SimBus::default();
    let mut master = MasterBuilder::new().cycle_freq(1000.0).build(sim.clone())?;

    let state = Arc::new(AtomicU8::new(0));
    let inputs = DigitalInputs {
        channels: (1..=4).map(|i| ChannelInfo::input(0x6000 + 0x10 * (i - 1), 1, 1)).collect(),
        state: state.clone(),
    };
    let outputs = DigitalOutputs {
        channels: (1..=4).map(|i| ChannelInfo::output(0x7000 + 0x10 * (i - 1), 1, 1)).collect(),
        state,
    };
    let din = master.add_slave(0, 0, Box::new(inputs))?;
    let dout = master.add_slave(0, 1, Box::new(outputs))?;
    master.activate()?;

    for slave in [din, dout] {
        for channel in 0..4 {
            if let Some((domain, offset)) = master.channel_offset(slave, channel) {
                log::info!("slave {} channel {}: domain {} {:?}", slave.index(), channel, domain, offset);
            }
        }
    }

    master.set_ctrlc_handler(None)?;
    let mut pattern = 0u8;
    master.run(|cycle| {
        let n = cycle.elapsed_cycles();
        if n % 100 == 0 {
            pattern = pattern.wrapping_add(1) & 0x0F;
            // inputs occupy the low nibble of byte 0
            sim.write_input(0, 0, &[pattern]);
            if let Some(domain) = cycle.domain(0) {
                log::info!("cycle {}: image {:02X?}", n, domain.data());
            }
        }
        if n >= 2000 {
            cycle.stop();
        }
    })?;

    let handle = master.handle();
    println!(
        "{} cycles in {:?}, {} overrun(s)",
        handle.elapsed_cycles(),
        handle.elapsed_time(),
        handle.overruns()
    );
    Ok(())
}
