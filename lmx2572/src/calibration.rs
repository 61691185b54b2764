//! VCO calibration handshake and lock detect
use crate::{registers::*, Bus, Lmx2572, Pin, Result};
use log::{info, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

pub const POLL_INTERVAL: Duration = Duration::from_millis(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Calibration {
    /// CAL_START cleared before the timeout
    pub success: bool,
    pub locked: bool,
    /// VCO core reported by the chip
    pub vco: u8,
    pub elapsed: Duration,
}

impl<B: Bus, P: Pin> Lmx2572<B, P> {
    /// Start a VCO calibration and wait for the chip to finish it.
    ///
    /// A calibration still running at `timeout` is reported with `success`
    /// false; only bus faults are errors.
    pub fn trigger_calibration(&mut self, timeout: Duration) -> Result<Calibration> {
        let mut guard = self.readback()?;
        guard.CONTROL().modify(|c| c | Control::CAL_START)?;
        let start = Instant::now();

        let success = loop {
            if !guard.CONTROL().read()?.contains(Control::CAL_START) {
                break true;
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break false;
            }
            thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
        };

        let status = guard.STATUS().read()?;
        guard.release()?;

        let calibration = Calibration {
            success,
            locked: status.is_locked(),
            vco: status.vco,
            elapsed: start.elapsed(),
        };
        if success {
            info!("{calibration:?}");
        } else {
            warn!("VCO calibration timed out after {:?}", calibration.elapsed);
        }
        Ok(calibration)
    }

    pub fn status(&mut self) -> Result<Status> {
        self.STATUS().read()
    }

    pub fn is_locked(&mut self) -> Result<bool> {
        Ok(self.status()?.is_locked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    const LOCKED_VCO3: u16 = 2 << 9 | 3 << 5;

    #[test]
    fn completes_and_reads_status() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.bus.self_clearing.insert(0, Control::CAL_START.bits());
        synth.bus.regs[110] = LOCKED_VCO3;

        let cal = synth.trigger_calibration(DEFAULT_TIMEOUT)?;
        assert!(cal.success && cal.locked);
        assert_eq!(cal.vco, 3);
        assert!(cal.elapsed < DEFAULT_TIMEOUT);
        // R0 back to its value before the readback toggle
        assert_eq!(synth.bus.regs[0], default_value(0));
        assert_eq!(synth.CONTROL().cached(), Control::from(default_value(0)));
        Ok(())
    }

    #[test]
    fn times_out_without_error() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.bus.stuck.insert(0, Control::CAL_START.bits());
        let timeout = Duration::from_millis(50);

        let cal = synth.trigger_calibration(timeout)?;
        assert!(!cal.success);
        assert!(!cal.locked);
        assert!(cal.elapsed >= timeout);
        // Overshoot bounded by one poll plus scheduling slack
        assert!(cal.elapsed < timeout + POLL_INTERVAL + Duration::from_millis(10));
        let polls = synth.bus.frames.iter().filter(|f| *f == &Frame::read(0)).count();
        assert!(polls >= 2);
        Ok(())
    }

    #[test]
    fn zero_timeout_polls_once() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.bus.stuck.insert(0, Control::CAL_START.bits());
        let cal = synth.trigger_calibration(Duration::ZERO)?;
        assert!(!cal.success);
        let polls = synth.bus.frames.iter().filter(|f| *f == &Frame::read(0)).count();
        assert_eq!(polls, 1);
        Ok(())
    }

    #[test]
    fn fault_mid_poll_restores_readback() {
        let mut synth = mock::synth();
        synth.bus.stuck.insert(0, Control::CAL_START.bits());
        // readback clear, CAL_START, then the first poll fails
        synth.bus.fail_at = vec![2];
        assert!(synth.trigger_calibration(DEFAULT_TIMEOUT).is_err());
        assert_eq!(synth.bus.writes().last(), Some(&(0, default_value(0))));
    }

    #[test]
    fn lock_states() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        for (field, locked) in [(0, false), (1, false), (2, true), (3, false)] {
            synth.bus.regs[110] = field << 9;
            assert_eq!(synth.is_locked()?, locked);
        }
        Ok(())
    }
}
