/* Register type definitions
 *
 * Register addresses live in the `registers!` table in lib.rs. This file holds
 * the wire frame, the power-on register image, the register cache and the
 * typed views of the fields the driver manipulates.
 * */
use crate::Error;
use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(test)] use proptest::prelude::*;
#[cfg(test)] use proptest_derive::Arbitrary;

pub const REGISTERS: usize = 128;
pub const MAX_ADDR: u8 = 127;
pub const READ: u8 = 0x80;

// byte 0: R/W bit and 7-bit address, bytes 1-2: big endian payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame(pub [u8; 3]);

impl Frame {
    pub fn write(addr: u8, value: u16) -> Self {
        let [hi, lo] = value.to_be_bytes();
        Self([addr & MAX_ADDR, hi, lo])
    }

    pub fn read(addr: u8) -> Self {
        Self([(addr & MAX_ADDR) | READ, 0, 0])
    }

    pub fn addr(&self) -> u8 {
        self.0[0] & MAX_ADDR
    }

    pub fn is_read(&self) -> bool {
        self.0[0] & READ != 0
    }

    /// Payload, or for a received frame the register contents.
    pub fn value(&self) -> u16 {
        u16::from_be_bytes([self.0[1], self.0[2]])
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = if self.is_read() { 'R' } else { 'W' };
        write!(f, "{}{:03}=0x{:04X}", op, self.addr(), self.value())
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn frame_write_layout(addr in 0..=MAX_ADDR, value: u16) {
        let frame = Frame::write(addr, value);
        assert_eq!(frame.0, [addr, (value >> 8) as u8, value as u8]);
        assert!(!frame.is_read());
    }

    #[test]
    fn frame_read_layout(addr in 0..=MAX_ADDR) {
        let frame = Frame::read(addr);
        assert_eq!(frame.0, [addr | 0x80, 0, 0]);
        assert_eq!(frame.addr(), addr);
    }
}

/// Power-on register image, `(addr << 16) | value`, R0 through R125.
#[rustfmt::skip]
pub const DEFAULTS: [u32; 126] = [
    0x00211C, 0x010808, 0x020500, 0x030782, 0x040A43, 0x0530C8, 0x06C802, 0x0700B2,
    0x082000, 0x090004, 0x0A10F8, 0x0BB018, 0x0C5001, 0x0D4000, 0x0E1820, 0x0F060E,
    0x100080, 0x110096, 0x120064, 0x1327B7, 0x144848, 0x150409, 0x160001, 0x17007C,
    0x18071A, 0x190624, 0x1A0808, 0x1B0002, 0x1C0488, 0x1D0000, 0x1E18A6, 0x1FC3E6,
    0x2005BF, 0x211E01, 0x220010, 0x230004, 0x24003C, 0x250305, 0x260000, 0x2703E8,
    0x280000, 0x290000, 0x2A0000, 0x2B0000, 0x2C1FA3, 0x2DC61F, 0x2E07F0, 0x2F0300,
    0x3003E0, 0x314180, 0x320080, 0x330080, 0x340421, 0x350000, 0x360000, 0x370000,
    0x380000, 0x390020, 0x3A9001, 0x3B0001, 0x3C03E8, 0x3D00A8, 0x3E00AF, 0x3F0000,
    0x401388, 0x410000, 0x4201F4, 0x430000, 0x4403E8, 0x450000, 0x46C350, 0x470081,
    0x480001, 0x49003F, 0x4A0000, 0x4B0800, 0x4C000C, 0x4D0000, 0x4E0001, 0x4F0000,
    0x500000, 0x510000, 0x520000, 0x530000, 0x540000, 0x550000, 0x560000, 0x570000,
    0x580000, 0x590000, 0x5A0000, 0x5B0000, 0x5C0000, 0x5D0000, 0x5E0000, 0x5F0000,
    0x600000, 0x610000, 0x620000, 0x630000, 0x640000, 0x650000, 0x660000, 0x670000,
    0x680000, 0x694440, 0x6A0007, 0x6B0000, 0x6C0000, 0x6D0000, 0x6E0000, 0x6F0000,
    0x700000, 0x710000, 0x727802, 0x730000, 0x740000, 0x750000, 0x760000, 0x770000,
    0x780000, 0x790000, 0x7A0000, 0x7B0000, 0x7C0000, 0x7D2288,
];

/// Split an image word into address and value.
pub fn unpack(word: u32) -> (u8, u16) {
    (((word >> 16) & u32::from(MAX_ADDR)) as u8, (word & 0xFFFF) as u16)
}

pub fn default_value(addr: u8) -> u16 {
    DEFAULTS
        .get(usize::from(addr))
        .map_or(0, |&word| unpack(word).1)
}

#[test]
fn defaults_are_in_address_order() {
    for (i, &word) in DEFAULTS.iter().enumerate() {
        assert_eq!(usize::from(unpack(word).0), i);
    }
}

/// Last value written to or read from each register.
///
/// Entries are filled lazily. A register the driver has not touched reports
/// the power-on image value, which is only accurate if nothing else has
/// programmed the chip since it was reset.
#[derive(Clone, Debug)]
pub struct RegisterCache {
    values: [Option<u16>; REGISTERS],
}

impl Default for RegisterCache {
    fn default() -> Self {
        Self {
            values: [None; REGISTERS],
        }
    }
}

impl RegisterCache {
    pub fn get(&self, addr: u8) -> Option<u16> {
        self.values.get(usize::from(addr)).copied().flatten()
    }

    pub fn value(&self, addr: u8) -> u16 {
        self.get(addr).unwrap_or_else(|| default_value(addr))
    }

    pub fn set(&mut self, addr: u8, value: u16) {
        if let Some(slot) = self.values.get_mut(usize::from(addr)) {
            *slot = Some(value);
        }
    }

    pub fn clear(&mut self) {
        self.values = [None; REGISTERS];
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, u16)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(addr, v)| v.map(|v| (addr as u8, v)))
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn cache_falls_back_to_image(addr in 0..=MAX_ADDR, value: u16) {
        let mut cache = RegisterCache::default();
        assert_eq!(cache.get(addr), None);
        assert_eq!(cache.value(addr), default_value(addr));
        cache.set(addr, value);
        assert_eq!(cache.value(addr), value);
        cache.clear();
        assert_eq!(cache.iter().count(), 0);
    }
}

#[test]
fn cache_ignores_out_of_range() {
    let mut cache = RegisterCache::default();
    cache.set(200, 0x1234);
    assert_eq!(cache.get(200), None);
    assert_eq!(cache.value(126), 0);
}

bitflags! {
    /// R0, main control
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Control: u16 {
        const RAMP_EN        = 1 << 15;
        const VCO_PHASE_SYNC = 1 << 14;
        const CAL_START      = 1 << 6; // self-clearing when the VCO calibration finishes
        const FCAL_EN        = 1 << 3;
        const MUXOUT_LD_SEL  = 1 << 2; // lock detect on MUXout, disables register readback
        const RESET          = 1 << 1;
        const POWERDOWN      = 1 << 0;
    }
}

// Unnamed bits are reserved but must be written back unchanged
impl From<u16> for Control {
    fn from(item: u16) -> Self {
        Self::from_bits_retain(item)
    }
}

impl From<Control> for u16 {
    fn from(item: Control) -> Self {
        item.bits()
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn control_keeps_reserved_bits(b: u16) {
        assert_eq!(b, u16::from(Control::from(b)));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[cfg_attr(test, derive(Arbitrary))]
#[repr(u8)]
#[rustfmt::skip]
pub enum LockDetect {
    UnlockedLow  = 0, // Vtune low
    UnlockedHigh = 1, // Vtune high
    Locked       = 2,
    #[num_enum(default)]
    Invalid      = 3,
}

/// R110, lock detect and VCO readback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status {
    pub lock: LockDetect,
    pub vco: u8,
}

impl Status {
    pub fn is_locked(&self) -> bool {
        self.lock == LockDetect::Locked
    }
}

impl From<u16> for Status {
    fn from(item: u16) -> Self {
        Self {
            lock: LockDetect::from(((item >> 9) & 0b11) as u8),
            vco: ((item >> 5) & 0b111) as u8,
        }
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn status_decode(lock: LockDetect, vco in 0..8_u8, noise in prop::bits::u16::masked(0xF91F)) {
        let raw = noise | u16::from(u8::from(lock)) << 9 | u16::from(vco) << 5;
        let status = Status::from(raw);
        assert_eq!(status.lock, lock);
        assert_eq!(status.vco, vco);
        assert_eq!(status.is_locked(), lock == LockDetect::Locked);
    }
}

#[test]
fn lock_encodings() {
    for (field, locked) in [(0, false), (1, false), (2, true), (3, false)] {
        assert_eq!(Status::from(field << 9).is_locked(), locked);
    }
}

/*
 * VCO calibration fields
 *
 * The force flags sit above the seed fields so that no capacitance or
 * current seed can alias a force flag.
 */
pub const VCO_CTRL_CAL: u16 = 0x6000; // R8
pub const VCO_DACISET_FORCE: u16 = 1 << 15; // R16
pub const VCO_CAPCTRL_BASE: u16 = 0x2700; // R19
pub const VCO_CAPCTRL_FORCE: u16 = 1 << 15; // R19
pub const VCO_SEL_BASE: u16 = 0x4448; // R20
pub const VCO_SEL_FORCE: u16 = 1 << 4; // R20
pub const VCO_SEL_SHIFT: u16 = 11; // R20
pub const QUICK_RECAL_EN: u16 = 1 << 9; // R78, reuse the previous band calibration

/* PLL */
pub const PLL_N_HI_BASE: u16 = 0x10; // R34
pub const PFD_DLY_BASE: u16 = 0x05; // R37
pub const PFD_DLY_SHIFT: u16 = 8;
pub const PFD_DLY_MASK: u16 = 0x3F;

/* Output path */
pub const OUTA_MUX: u16 = 0b11 << 11; // R45
pub const OUTA_MUX_VCO: u16 = 1 << 11;
pub const OUTB_PWR_MASK: u16 = 0x3F; // R45
pub const OUTB_MUX_VCO: u16 = 0x07F1; // R46
pub const OUTB_MUX_CHDIV: u16 = 0x07F0;
pub const CHDIV_BASE: u16 = 0x0800; // R75
pub const CHDIV_SHIFT: u16 = 6;

/* Phase sync */
pub const INPIN_IGNORE: u16 = 1 << 15; // R58
pub const PHASE_SYNC_COUNT: u16 = 30_000; // R70

/* Reference path */
pub const OSC_2X_BASE: u16 = 0x0004; // R9
pub const OSC_2X: u16 = 1 << 12;
pub const OSC_HIGH_PFD: u16 = 1 << 14;
pub const MULT_BASE: u16 = 0x1078; // R10
pub const MULT_SHIFT: u16 = 7;
pub const PLL_R_BASE: u16 = 0xB008; // R11
pub const PLL_R_SHIFT: u16 = 4;
pub const PLL_R_PRE_BASE: u16 = 0x5000; // R12
pub const INBUF_DIFFERENTIAL: u16 = 0x28C8; // R5
pub const INBUF_SINGLE_ENDED: u16 = 0x30C8;
pub const INBUF_SE: u16 = 1 << 2;
pub const CPG_SHIFT: u16 = 3; // R14
pub const CPG_MASK: u16 = 0xF << CPG_SHIFT;

/*
 * Output ports and power
 */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum Port {
    A,
    B,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Ports: u8 {
        const A = 1 << 0;
        const B = 1 << 1;
    }
}

impl From<Port> for Ports {
    fn from(port: Port) -> Self {
        match port {
            Port::A => Ports::A,
            Port::B => Ports::B,
        }
    }
}

/// Output power level, 0-63
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Power(u8);

impl Power {
    pub const MAX: Power = Power(63);
    pub const DEFAULT: Power = Power(40);

    pub const fn saturating(level: u8) -> Self {
        if level > Self::MAX.0 {
            Self::MAX
        } else {
            Self(level)
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Power {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Power {
    type Error = Error;
    fn try_from(level: u8) -> Result<Self, Self::Error> {
        if level > Self::MAX.0 {
            Err(Error::Power(level))
        } else {
            Ok(Self(level))
        }
    }
}

impl From<Power> for u8 {
    fn from(item: Power) -> Self {
        item.0
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn power_range(level: u8) {
        assert_eq!(Power::try_from(level).is_ok(), level <= 63);
        assert!(Power::saturating(level) <= Power::MAX);
    }
}

/// R44: output A power and the active-low output power-downs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutAPwr {
    pub power: Power,
    pub a_enabled: bool,
    pub b_enabled: bool,
}

const OUTA_PWR_BASE: u16 = 0x0022; // MASH order and reset, fixed
const OUTA_PD: u16 = 1 << 6;
const OUTB_PD: u16 = 1 << 7;

impl From<OutAPwr> for u16 {
    fn from(item: OutAPwr) -> Self {
        let mut reg = OUTA_PWR_BASE | u16::from(item.power.get() & Power::MAX.0) << 8;
        if !item.a_enabled {
            reg |= OUTA_PD;
        }
        if !item.b_enabled {
            reg |= OUTB_PD;
        }
        reg
    }
}

impl From<u16> for OutAPwr {
    fn from(item: u16) -> Self {
        Self {
            power: Power::saturating(((item >> 8) & 0x3F) as u8),
            a_enabled: item & OUTA_PD == 0,
            b_enabled: item & OUTB_PD == 0,
        }
    }
}

#[cfg(test)]
proptest! {
    #[test]
    fn outapwr_inverse(power in 0..=63_u8, a_enabled: bool, b_enabled: bool) {
        let reg = OutAPwr { power: Power::saturating(power), a_enabled, b_enabled };
        assert_eq!(reg, OutAPwr::from(u16::from(reg)));
    }
}

#[test]
fn outapwr_layout() {
    let reg = OutAPwr {
        power: Power::saturating(50),
        a_enabled: true,
        b_enabled: false,
    };
    assert_eq!(u16::from(reg), 0x22 | 50 << 8 | 0x80);
}

/// Charge pump gain, 0-15
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChargePumpGain(u8);

impl ChargePumpGain {
    pub const MAX: u8 = 15;

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ChargePumpGain {
    type Error = Error;
    fn try_from(gain: u8) -> Result<Self, Self::Error> {
        if gain > Self::MAX {
            Err(Error::Gain(gain))
        } else {
            Ok(Self(gain))
        }
    }
}

#[test]
fn port_sets() {
    assert_eq!(Ports::from(Port::A), Ports::A);
    assert_eq!(Ports::from(Port::B), Ports::B);
}
