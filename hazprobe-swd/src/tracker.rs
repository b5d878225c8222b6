// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Process-Wide PIO Slot Tracker
//!
//! One slot (PIO block x state machine) per debug session, claimed on
//! [`crate::SwdInterface::connect()`] and released on disconnect - on
//! error paths too, the claim is dropped before `connect()` returns.  Up
//! to eight sessions can coexist, each independently single-threaded.
//!
//! The allocation logic itself lives in [`hazprobe_core::slots`]; this
//! module owns the single shared instance.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use hazprobe_core::slots::{Slot, SlotMap, SlotUsage};

use crate::SwdError;

static SLOTS: Mutex<CriticalSectionRawMutex, RefCell<SlotMap>> =
    Mutex::new(RefCell::new(SlotMap::new()));

/// Claim a specific slot for a session
pub(crate) fn claim(block: u8, sm: u8) -> Result<Slot, SwdError> {
    SLOTS
        .lock(|slots| slots.borrow_mut().claim(block, sm))
        .ok_or(SwdError::ResourceBusy)
}

/// Claim the first free slot on the given block for a session.
///
/// Find-and-claim under one lock, so two sessions connecting
/// concurrently can never pick the same slot.
pub(crate) fn claim_any(block: u8) -> Result<Slot, SwdError> {
    SLOTS
        .lock(|slots| slots.borrow_mut().claim_any(block))
        .ok_or(SwdError::ResourceBusy)
}

/// Release a session's slot
pub(crate) fn release(slot: Slot) {
    SLOTS.lock(|slots| slots.borrow_mut().release(slot));
}

/// Snapshot of slot usage: active session count and per-slot claimed
/// flags
pub fn usage() -> SlotUsage {
    SLOTS.lock(|slots| slots.borrow().usage())
}
