//! Example: write configuration SDOs before cyclic operation
//!
//! Writes the mode of operation (0x6060:0) of a simulated drive at position 0
//! once as a startup SDO and once as a direct download, then shows how a
//! rejected download reports its abort code.
//!
//! Usage
//! ```text
//! RUST_LOG=debug cargo run --example write_sdo
//! ```
use ethercat_interface::{
    sim::SimBus, ChannelInfo, ChannelMut, ChannelRef, MasterBuilder, SdoConfigEntry, SdoIdx,
    Slave, SlaveId,
};

struct Drive {
    channels: [ChannelInfo; 2],
}

impl Slave for Drive {
    fn id(&self) -> SlaveId {
        SlaveId::new(0x0000_009a, 0x0003_0924)
    }

    fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    fn sdo_config(&self) -> Vec<SdoConfigEntry> {
        // cyclic synchronous position
        vec![SdoConfigEntry::value(0x6060, 0, 8u8)]
    }

    fn decode(&mut self, _: usize, _: ChannelRef<'_>) {}

    fn encode(&mut self, _: usize, _: &mut ChannelMut<'_>) {}
}

pub fn main() -> Result<(), std::io::Error> {
    env_logger::init();

    let sim = SimBus::default();
    let mut master = MasterBuilder::new().build(sim.clone())?;
    master.add_slave(
        0,
        0,
        Box::new(Drive {
            channels: [
                ChannelInfo::output(0x6040, 0, 16),
                ChannelInfo::input(0x6041, 0, 16),
            ],
        }),
    )?;

    // profile velocity mode, written right away
    let mode = SdoConfigEntry::value(0x6060, 0, 3u8);
    master.config_slave_sdo(0, &mode)?;
    println!("Wrote SDO {} = {:02X?}", mode.sdo, sim.object(0, mode.sdo));

    let protected = SdoIdx::new(0x1000, 0);
    sim.reject_sdo(0, protected, 0x0601_0002);
    match master.config_slave_sdo(0, &SdoConfigEntry::value(0x1000, 0, 0u32)) {
        Ok(()) => println!("SDO {} unexpectedly accepted", protected),
        Err(e) => println!("SDO {} rejected, abort code {:08X?}", protected, e.abort_code()),
    }

    // startup SDOs are applied during activation
    master.activate()?;
    println!("After activation {} = {:02X?}", mode.sdo, sim.object(0, mode.sdo));

    Ok(())
}
