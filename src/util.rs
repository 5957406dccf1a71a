// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Scheduling helpers for the thread that runs the cyclic loop.
//!
//! Both need elevated privileges (`CAP_SYS_NICE`) and apply to the calling
//! process; call them before [crate::Master::run].

use crate::types::Result;
use log::*;
use std::io;

pub const HIGH_PRIORITY_NICE: libc::c_int = -19;
pub const REALTIME_PRIORITY: libc::c_int = 49;

/// Set the nice value of the process to -19.
pub fn set_thread_high_priority() -> Result<()> {
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, HIGH_PRIORITY_NICE) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        warn!("setpriority({}) failed: {}", HIGH_PRIORITY_NICE, err);
        return Err(err.into());
    }
    debug!("Nice value set to {}", HIGH_PRIORITY_NICE);
    Ok(())
}

/// Switch to `SCHED_FIFO` with priority 49.
pub fn set_thread_realtime() -> Result<()> {
    let param = libc::sched_param {
        sched_priority: REALTIME_PRIORITY,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        warn!("sched_setscheduler(SCHED_FIFO, {}) failed: {}", REALTIME_PRIORITY, err);
        return Err(err.into());
    }
    debug!("Scheduler set to SCHED_FIFO, priority {}", REALTIME_PRIORITY);
    Ok(())
}
