/* In-memory chip and GPIO lines for exercising the driver without hardware */
use crate::{registers::*, Bus, Lmx2572, Pin, Result};
use std::{collections::HashMap, io, ops::RangeInclusive};

pub const REF_FREQ: u64 = 100_000_000;

/// Status registers the chip never overwrites from the bus
pub const READ_ONLY: RangeInclusive<u8> = 110..=112;

pub struct Chip {
    pub regs: [u16; REGISTERS],
    /// Every frame put on the bus, failed ones included
    pub frames: Vec<Frame>,
    /// Bits that always read back as set
    pub stuck: HashMap<u8, u16>,
    /// Bits the chip clears as soon as they are written
    pub self_clearing: HashMap<u8, u16>,
    /// Fail every exchange once this many frames are on record
    pub fail_after: Option<usize>,
    /// Fail the exchange that would become frame number n
    pub fail_at: Vec<usize>,
}

impl Default for Chip {
    fn default() -> Self {
        Self {
            regs: [0; REGISTERS],
            frames: Vec::new(),
            stuck: HashMap::new(),
            self_clearing: HashMap::new(),
            fail_after: None,
            fail_at: Vec::new(),
        }
    }
}

impl Chip {
    pub fn writes(&self) -> Vec<(u8, u16)> {
        self.frames
            .iter()
            .filter(|f| !f.is_read())
            .map(|f| (f.addr(), f.value()))
            .collect()
    }

    pub fn written(&self) -> Vec<u8> {
        self.writes().into_iter().map(|(addr, _)| addr).collect()
    }

    pub fn last_write(&self, addr: u8) -> Option<u16> {
        self.writes()
            .into_iter()
            .rev()
            .find(|&(a, _)| a == addr)
            .map(|(_, v)| v)
    }
}

impl Bus for Chip {
    fn exchange(&mut self, tx: &[u8; 3], rx: &mut [u8; 3]) -> Result<()> {
        let frame = Frame(*tx);
        let n = self.frames.len();
        self.frames.push(frame);
        if self.fail_at.contains(&n) || self.fail_after.is_some_and(|after| n >= after) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "bus fault").into());
        }

        let addr = frame.addr();
        let slot = usize::from(addr);
        if frame.is_read() {
            let value = self.regs[slot] | self.stuck.get(&addr).copied().unwrap_or(0);
            *rx = Frame::write(0, value).0;
        } else if !READ_ONLY.contains(&addr) {
            let clear = self.self_clearing.get(&addr).copied().unwrap_or(0);
            self.regs[slot] = frame.value() & !clear;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct Line {
    pub high: bool,
    pub lows: usize,
    pub rises: usize,
}

impl Pin for Line {
    fn set_high(&mut self) -> Result<()> {
        self.high = true;
        self.rises += 1;
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.high = false;
        self.lows += 1;
        Ok(())
    }
}

pub fn synth() -> Lmx2572<Chip, Line> {
    Lmx2572::new(Chip::default(), Line::default(), Line::default(), REF_FREQ)
        .expect("mock lines never fail")
}
