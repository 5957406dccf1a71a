// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Cyclic EtherCAT master core.
//!
//! A [Master] collects [Slave] drivers, lays out their process data channels
//! in one or more domain images and runs the cyclic exchange through a
//! [Bus]: receive, decode inputs, call the user, encode outputs, send. Every
//! few cycles it also polls master, domain and slave states and finishes
//! asynchronous SDO reads.
//!
//! The bus itself is abstract. [sim::SimBus] implements it in memory for
//! tests and dry runs.

mod config;
mod convert;
mod domain;
mod image;
mod master;
mod monitor;
mod request;
mod signal;
mod slave;
mod types;

pub mod bus;
pub mod sim;
pub mod util;

pub use self::{
    bus::Bus,
    config::MasterBuilder,
    domain::{Domain, DomainBuilder, Registration},
    image::{ChannelMut, ChannelRef},
    master::{
        Cycle, InterruptHandler, Master, MasterHandle, MasterPhase, DEFAULT_CHECK_INTERVAL,
        DEFAULT_FREQUENCY,
    },
    monitor::{HealthSnapshot, MonitoredSlave, StateMonitor, Transition},
    request::{RequestManager, SdoRequest},
    slave::Slave,
    types::*,
};
