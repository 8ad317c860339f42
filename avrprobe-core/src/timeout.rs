//! Deadline driven command guard
//!
//! The protocol drivers poll the target in loops that would spin forever on
//! a dead wire. Every such loop checks a [`Deadline`] value and unwinds with
//! `Err(Error::Timeout)` when the budget is gone; [`guard`] turns that into
//! the numeric result the scope dispatcher reports to the host.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::link::Clock;
use crate::{Error, Result};
use log::debug;

/// Default budget for one host command.
pub const COMMAND_MS: u32 = 800;

/// A point in time an operation must not run past.
#[derive(Clone, Copy)]
pub struct Deadline<C: Clock> {
    clock: C,
    end_us: u64,
}

impl<C: Clock> Deadline<C> {
    pub fn new(clock: C, ms: u32) -> Deadline<C> {
        Deadline {
            clock,
            end_us: clock.now_us() + ms as u64 * 1000,
        }
    }

    pub fn expired(&self) -> bool {
        self.clock.now_us() >= self.end_us
    }

    /// `Err(Error::Timeout)` once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(Error::Timeout)
        } else {
            Ok(())
        }
    }

    pub fn clock(&self) -> C {
        self.clock
    }
}

/// Run one guarded operation and map it onto the EDBG result contract:
/// the returned size on success, `0` on any failure.
pub fn guard<C, F>(clock: C, ms: u32, mut op: F) -> usize
where
    C: Clock,
    F: FnMut(&Deadline<C>) -> Result<usize>,
{
    let deadline = Deadline::new(clock, ms);
    match op(&deadline) {
        Ok(size) => size,
        Err(e) => {
            debug!("command failed: {:?}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockClock;
    use std::cell::Cell;

    #[test]
    fn deadline_expires_with_the_clock() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let dl = Deadline::new(clock, 10);
        assert!(dl.check().is_ok());
        t.set(9_999);
        assert!(!dl.expired());
        t.set(10_000);
        assert!(dl.expired());
        assert_eq!(dl.check(), Err(Error::Timeout));
    }

    #[test]
    fn guard_maps_errors_to_zero() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        assert_eq!(guard(clock, 1, |_| Ok(5)), 5);
        assert_eq!(guard(clock, 1, |_| Err(Error::Echo)), 0);
        assert_eq!(
            guard(clock, 1, |dl| {
                t.set(2_000);
                dl.check()?;
                Ok(1)
            }),
            0
        );
    }
}
