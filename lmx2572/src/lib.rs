use log::{debug, error, trace};
use std::{
    marker::PhantomData,
    ops::{Deref, DerefMut, RangeInclusive},
    thread,
    time::Duration,
};
use thiserror::Error;

use registers::*;

pub mod calibration;
pub mod config;
pub mod frequency;
pub mod linux;
#[cfg(test)]
mod mock;
pub mod output;
pub mod reference;
pub mod registers;

pub use calibration::Calibration;
pub use frequency::{FrequencyPlan, TuneOptions, VcoCalibration};
pub use linux::{open, GpioLine};
pub use output::Output;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SPI communication failed")]
    Io(#[from] std::io::Error),
    #[error("GPIO line request failed")]
    Gpio(#[from] gpiocdev::Error),
    #[error("Register address out of range: {0}")]
    Address(u8),
    #[error("Register bit out of range: {0}")]
    Bit(u8),
    #[error("Output power out of range (0-63): {0}")]
    Power(u8),
    #[error("Charge pump gain out of range (0-15): {0}")]
    Gain(u8),
    #[error("No output port selected")]
    NoPort,
    #[error("Invalid reference path: {0}")]
    Reference(&'static str),
    #[error("Frequency unreachable: {0} Hz")]
    Unreachable(u64),
    #[error("R{addr} readback mismatch: wrote 0x{wrote:04X}, read 0x{read:04X}")]
    Verify { addr: u8, wrote: u16, read: u16 },
    #[error("Invalid config file")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Serial control bus carrying one 24-bit frame per chip-select assertion.
pub trait Bus {
    /// Full-duplex exchange of a single frame. Chip-select is driven by the
    /// caller.
    fn exchange(&mut self, tx: &[u8; 3], rx: &mut [u8; 3]) -> Result<()>;
}

/// Digital output used for chip-select (active low) and chip enable.
pub trait Pin {
    fn set_high(&mut self) -> Result<()>;
    fn set_low(&mut self) -> Result<()>;
}

/// Delay after toggling the enable line before the chip accepts frames
pub const SETTLE: Duration = Duration::from_millis(10);

pub struct Lmx2572<B, P> {
    bus: B,
    cs: P,
    en: P,
    enabled: bool,
    ref_freq: u64,
    pfd_freq: u64,
    last_calibration: Option<u64>,
    cache: RegisterCache,
}

impl<B: Bus, P: Pin> Lmx2572<B, P> {
    /// Takes ownership of the bus and lines and leaves the chip disabled.
    ///
    /// Until `set_ref` is called the phase detector runs at the reference
    /// frequency.
    pub fn new(bus: B, mut cs: P, mut en: P, ref_freq: u64) -> Result<Self> {
        if ref_freq == 0 {
            return Err(Error::Reference("reference frequency is zero"));
        }
        cs.set_high()?;
        en.set_low()?;
        Ok(Self {
            bus,
            cs,
            en,
            enabled: false,
            ref_freq,
            pfd_freq: ref_freq,
            last_calibration: None,
            cache: RegisterCache::default(),
        })
    }

    pub fn ref_freq(&self) -> u64 {
        self.ref_freq
    }

    pub fn pfd_freq(&self) -> u64 {
        self.pfd_freq
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Target of the most recent band calibration, if any
    pub fn last_calibration(&self) -> Option<u64> {
        self.last_calibration
    }

    pub fn cache(&self) -> &RegisterCache {
        &self.cache
    }

    pub fn free(self) -> (B, P, P) {
        (self.bus, self.cs, self.en)
    }

    pub fn enable(&mut self) -> Result<()> {
        if !self.enabled {
            self.en.set_high()?;
            self.enabled = true;
            thread::sleep(SETTLE);
        }
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        if self.enabled {
            self.en.set_low()?;
            self.enabled = false;
            thread::sleep(SETTLE);
        }
        Ok(())
    }

    fn transfer(&mut self, frame: Frame) -> Result<Frame> {
        trace!("{frame}");
        let mut rx = [0; 3];
        self.cs.set_low()?;
        let result = self.bus.exchange(&frame.0, &mut rx);
        let released = self.cs.set_high();
        result.and(released)?;
        Ok(Frame(rx))
    }

    pub fn write(&mut self, addr: u8, value: u16) -> Result<()> {
        if addr > MAX_ADDR {
            return Err(Error::Address(addr));
        }
        self.transfer(Frame::write(addr, value))?;
        self.cache.set(addr, value);
        Ok(())
    }

    // Read without touching the readback mux
    fn fetch(&mut self, addr: u8) -> Result<u16> {
        let value = self.transfer(Frame::read(addr))?.value();
        self.cache.set(addr, value);
        Ok(value)
    }

    pub fn read(&mut self, addr: u8) -> Result<u16> {
        if addr > MAX_ADDR {
            return Err(Error::Address(addr));
        }
        let mut guard = self.readback()?;
        let value = guard.fetch(addr)?;
        guard.release()?;
        Ok(value)
    }

    /// Route MUXout to register readback until the guard is released or
    /// dropped.
    pub fn readback(&mut self) -> Result<Readback<'_, B, P>> {
        Readback::new(self)
    }

    /// MUXout carries register readback permanently
    pub fn enable_readback(&mut self) -> Result<()> {
        self.CONTROL().modify(|c| c - Control::MUXOUT_LD_SEL)
    }

    /// MUXout carries lock detect; reads toggle it temporarily
    pub fn disable_readback(&mut self) -> Result<()> {
        self.CONTROL().modify(|c| c | Control::MUXOUT_LD_SEL)
    }

    pub fn read_bit(&mut self, addr: u8, bit: u8) -> Result<bool> {
        if bit > 15 {
            return Err(Error::Bit(bit));
        }
        Ok(self.read(addr)? & (1 << bit) != 0)
    }

    pub fn set_bit(&mut self, addr: u8, bit: u8, value: bool) -> Result<()> {
        if bit > 15 {
            return Err(Error::Bit(bit));
        }
        let reg = self.read(addr)?;
        let reg = if value { reg | 1 << bit } else { reg & !(1 << bit) };
        self.write(addr, reg)
    }

    /// Read a contiguous block of registers with a single readback toggle.
    pub fn dump(&mut self, range: RangeInclusive<u8>) -> Result<Vec<(u8, u16)>> {
        if *range.end() > MAX_ADDR {
            return Err(Error::Address(*range.end()));
        }
        let mut guard = self.readback()?;
        let values = range
            .map(|addr| guard.fetch(addr).map(|value| (addr, value)))
            .collect::<Result<Vec<_>>>()?;
        guard.release()?;
        Ok(values)
    }

    /// Replace every cache entry in the power-on image with the hardware value.
    pub fn sync_from_hardware(&mut self) -> Result<()> {
        let last = (DEFAULTS.len() - 1) as u8;
        self.dump(0..=last)?;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        let control = self.CONTROL().cached() - Control::RESET;
        self.CONTROL().write(control | Control::RESET)?;
        self.CONTROL().write(control)?;

        self.cache.clear();
        self.cache.set(0, control.bits());
        self.last_calibration = None;
        Ok(())
    }

    pub fn power_down(&mut self, down: bool) -> Result<()> {
        self.CONTROL().modify(|c| {
            if down {
                c | Control::POWERDOWN
            } else {
                c - Control::POWERDOWN
            }
        })
    }

    /// Program a register image of `(addr << 16) | value` words.
    ///
    /// The chip expects the image from the highest address down, so `reverse`
    /// is set for an image stored in ascending order.
    pub fn configure(&mut self, image: &[u32], reverse: bool) -> Result<()> {
        let mut program = |word: &u32| {
            let (addr, value) = unpack(*word);
            self.write(addr, value)
        };
        if reverse {
            image.iter().rev().try_for_each(&mut program)
        } else {
            image.iter().try_for_each(&mut program)
        }
    }

    pub fn configure_default(&mut self) -> Result<()> {
        self.configure(&DEFAULTS, true)
    }
}

/// Scoped register readback.
///
/// With MUXOUT_LD_SEL set the chip drives lock detect instead of read data,
/// so the guard clears the bit and puts the saved R0 back when it goes away.
pub struct Readback<'a, B: Bus, P: Pin> {
    synth: &'a mut Lmx2572<B, P>,
    restore: Option<Control>,
}

impl<'a, B: Bus, P: Pin> Readback<'a, B, P> {
    fn new(synth: &'a mut Lmx2572<B, P>) -> Result<Self> {
        let control = synth.CONTROL().cached();
        let restore = if control.contains(Control::MUXOUT_LD_SEL) {
            debug!("temporarily enabling register readback");
            synth.CONTROL().write(control - Control::MUXOUT_LD_SEL)?;
            Some(control)
        } else {
            None
        };
        Ok(Self { synth, restore })
    }

    // R0 read here lacks MUXOUT_LD_SEL; report and restore what the chip
    // will hold once the guard is gone.
    fn fetch(&mut self, addr: u8) -> Result<u16> {
        let mut value = self.synth.fetch(addr)?;
        if let (0, Some(control)) = (addr, self.restore.as_mut()) {
            value |= Control::MUXOUT_LD_SEL.bits();
            *control = Control::from(value);
        }
        Ok(value)
    }

    /// Restore R0, reporting a failure the drop path would only log.
    pub fn release(mut self) -> Result<()> {
        match self.restore.take() {
            Some(control) => self.synth.CONTROL().write(control),
            None => Ok(()),
        }
    }
}

impl<B: Bus, P: Pin> Drop for Readback<'_, B, P> {
    fn drop(&mut self) {
        if let Some(control) = self.restore.take() {
            if let Err(e) = self.synth.CONTROL().write(control) {
                error!("failed to restore R0 after readback: {e}");
            }
        }
    }
}

impl<B: Bus, P: Pin> Deref for Readback<'_, B, P> {
    type Target = Lmx2572<B, P>;
    fn deref(&self) -> &Self::Target {
        &*self.synth
    }
}

impl<B: Bus, P: Pin> DerefMut for Readback<'_, B, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.synth
    }
}

pub struct ReadWrite<'a, B, P, V> {
    data: PhantomData<V>,
    synth: &'a mut Lmx2572<B, P>,
    addr: u8,
}

impl<B: Bus, P: Pin, V: From<u16> + Into<u16>> ReadWrite<'_, B, P, V> {
    pub fn read(&mut self) -> Result<V> {
        self.synth.read(self.addr).map(V::from)
    }

    pub fn write(&mut self, value: V) -> Result<()> {
        self.synth.write(self.addr, value.into())
    }

    /// Last known value, without bus activity
    pub fn cached(&self) -> V {
        V::from(self.synth.cache.value(self.addr))
    }

    pub fn modify<F: FnOnce(V) -> V>(&mut self, f: F) -> Result<()> {
        let value = f(self.cached());
        self.write(value)
    }
}

pub struct ReadOnly<'a, B, P, V> {
    data: PhantomData<V>,
    synth: &'a mut Lmx2572<B, P>,
    addr: u8,
}

impl<B: Bus, P: Pin, V: From<u16>> ReadOnly<'_, B, P, V> {
    pub fn read(&mut self) -> Result<V> {
        self.synth.read(self.addr).map(V::from)
    }
}

// Name: Type [Addr, Access],
macro_rules! registers {
    (
        $($reg:ident: $T:ty [ $addr:literal, $access:ident ],)*
    ) => {
        #[allow(non_snake_case)]
        impl<B: Bus, P: Pin> Lmx2572<B, P> {
            $(
                pub fn $reg(&mut self) -> $access<'_, B, P, $T> {
                    $access {
                        data: PhantomData,
                        synth: self,
                        addr: $addr,
                    }
                }
            )*
        }
    }
}

/* Subset of the LMX2572 register map driven by this crate */
registers! {
    /* Control */
    CONTROL:           Control [0,   ReadWrite], // Ramp, phase sync, calibration, MUXout, reset, powerdown
    /* Reference path */
    INBUF:             u16     [5,   ReadWrite], // Input buffer mode
    OSC_2X:            u16     [9,   ReadWrite], // Reference doubler
    MULT:              u16     [10,  ReadWrite], // Reference multiplier
    PLL_R:             u16     [11,  ReadWrite], // Post-R divider
    PLL_R_PRE:         u16     [12,  ReadWrite], // Pre-R divider
    CPG:               u16     [14,  ReadWrite], // Charge pump gain
    /* VCO calibration */
    VCO_CTRL:          u16     [8,   ReadWrite],
    VCO_DACISET:       u16     [16,  ReadWrite], // Current seed
    VCO_DACISET_STRT:  u16     [17,  ReadWrite], // Current start
    VCO_CAPCTRL:       u16     [19,  ReadWrite], // Capacitance seed
    VCO_SEL:           u16     [20,  ReadWrite], // Band select
    QUICK_RECAL:       u16     [78,  ReadWrite], // Capacitance start, reuse previous calibration
    /* Fractional-N */
    PLL_N_HI:          u16     [34,  ReadWrite],
    PLL_N:             u16     [36,  ReadWrite],
    PFD_DLY:           u16     [37,  ReadWrite],
    PLL_DEN_HI:        u16     [38,  ReadWrite],
    PLL_DEN_LO:        u16     [39,  ReadWrite],
    PLL_NUM_HI:        u16     [42,  ReadWrite],
    PLL_NUM_LO:        u16     [43,  ReadWrite],
    /* Outputs */
    OUTA_PWR:          OutAPwr [44,  ReadWrite], // Output A power, output powerdowns
    OUTB_PWR:          u16     [45,  ReadWrite], // Output B power, output A mux
    OUTB_MUX:          u16     [46,  ReadWrite],
    CHDIV:             u16     [75,  ReadWrite], // Channel divider
    /* Phase sync */
    INPIN_IGNORE:      u16     [58,  ReadWrite],
    MASH_RST_COUNT_HI: u16     [69,  ReadWrite],
    MASH_RST_COUNT_LO: u16     [70,  ReadWrite],
    /* Readback */
    STATUS:            Status  [110, ReadOnly ], // Lock detect, VCO band
}
