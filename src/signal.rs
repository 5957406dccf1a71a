// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Process-wide SIGINT dispatch.
//!
//! The OS hook can only be installed once per process, so it forwards to a
//! single replaceable slot. Every install returns a token; clearing with a
//! stale token (after somebody else installed a handler) does nothing.
//! Handlers run on the signal thread with the slot locked and must not call
//! back into this module.

use crate::types::Result;
use log::*;
use parking_lot::{const_mutex, Mutex};

type Handler = Box<dyn FnMut() + Send>;

static HOOKED: Mutex<bool> = const_mutex(false);
static SLOT: Mutex<Option<(u64, Handler)>> = const_mutex(None);
static NEXT_TOKEN: Mutex<u64> = const_mutex(1);

/// Serializes unit tests that touch the process-wide slot.
#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = const_mutex(());

pub(crate) fn install(handler: Handler) -> Result<u64> {
    let mut hooked = HOOKED.lock();
    if !*hooked {
        ctrlc::set_handler(dispatch)?;
        *hooked = true;
        debug!("SIGINT hook installed");
    }
    let token = {
        let mut next = NEXT_TOKEN.lock();
        let token = *next;
        *next += 1;
        token
    };
    *SLOT.lock() = Some((token, handler));
    Ok(token)
}

pub(crate) fn clear(token: u64) {
    let mut slot = SLOT.lock();
    if matches!(*slot, Some((current, _)) if current == token) {
        *slot = None;
    }
}

pub(crate) fn is_installed(token: u64) -> bool {
    matches!(*SLOT.lock(), Some((current, _)) if current == token)
}

pub(crate) fn dispatch() {
    match SLOT.lock().as_mut() {
        Some((_, handler)) => handler(),
        None => info!("Interrupt received, no handler registered"),
    }
}
