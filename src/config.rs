// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Builder for a connected [Master].

use crate::bus::Bus;
use crate::master::Master;
use crate::types::*;

#[derive(Debug, Default, Clone)]
pub struct MasterBuilder {
    master_id: Option<MasterIdx>,
    cycle_freq: Option<f64>,
    check_interval: Option<u64>,
}

impl MasterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master_id(mut self, id: MasterIdx) -> Self {
        self.master_id = Some(id);
        self
    }

    /// Cycle frequency in Hz, 1000 by default.
    pub fn cycle_freq(mut self, freq: f64) -> Self {
        self.cycle_freq = Some(freq);
        self
    }

    /// Number of cycles between two state checks, 10 by default.
    pub fn check_interval(mut self, cycles: u64) -> Self {
        self.check_interval = Some(cycles);
        self
    }

    pub fn build<B: Bus>(self, bus: B) -> Result<Master<B>> {
        let mut master = Master::new(bus);
        if let Some(freq) = self.cycle_freq {
            master.set_frequency(freq)?;
        }
        if let Some(cycles) = self.check_interval {
            master.set_check_interval(cycles);
        }
        master.connect(self.master_id.unwrap_or(0))?;
        Ok(master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::MasterPhase;
    use crate::sim::SimBus;
    use std::time::Duration;

    #[test]
    fn builds_connected_master() {
        let master = MasterBuilder::new()
            .master_id(1)
            .cycle_freq(500.0)
            .check_interval(0)
            .build(SimBus::new(2))
            .unwrap();
        assert_eq!(master.phase(), MasterPhase::Configuring);
        assert_eq!(master.interval(), Duration::from_millis(2));
        assert_eq!(master.check_interval(), 1);
    }

    #[test]
    fn invalid_settings() {
        let err = MasterBuilder::new().cycle_freq(0.0).build(SimBus::default());
        assert!(matches!(err, Err(Error::InvalidFrequency(_))));
        let err = MasterBuilder::new().master_id(3).build(SimBus::default());
        assert!(matches!(err, Err(Error::NoSuchMaster(3))));
    }
}
