//! Fractional-N frequency planning
//!
//! A target frequency is reached by running the VCO between 3.2 and 6.4 GHz
//! and dividing it down by a power of two. The VCO frequency is split into an
//! integer ratio N and a 24-bit fraction of the phase detector frequency.
//! When the target moves far enough from the last calibrated one, the VCO
//! calibration is seeded with a band and interpolated capacitance/current
//! starting points.
use crate::{registers::*, Bus, Error, Lmx2572, Pin, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
#[cfg(test)] use proptest::prelude::*;

pub const VCO_MIN: u64 = 3_200_000_000;
pub const VCO_MAX: u64 = 6_400_000_000;
pub const MAX_DIVIDER: u8 = 8;
pub const DENOMINATOR: u32 = 0xFF_FFFF;
pub const N_MAX: u64 = 0x7_FFFF;
/// Retuning further than this from the last calibrated target recalibrates
pub const RECAL_THRESHOLD: u64 = 100_000_000;

const PFD_DLY_THRESHOLD: u64 = 4_000_000_000;
// Targets that couple the 6.9 GHz VCO harmonic into the output
const SPUR_WINDOW: RangeInclusive<u64> = 5_810_000_000..=5_990_000_000;
const SPUR_VCO: RangeInclusive<u64> = 5_750_000_000..=VCO_MAX;
const SPUR_BAND: u8 = 5;
const CAPACITANCE_OFFSET: u64 = 10;

// Channel divider code by divider exponent
const CHDIV: [u16; 9] = [0, 0, 1, 3, 5, 7, 9, 12, 14];

// MHz bounds with (start, end) capacitance and current seeds
struct Band {
    fmin: u64,
    fmax: u64,
    capacitance: (u64, u64),
    current: (u64, u64),
}

#[rustfmt::skip]
const BANDS: [Band; 6] = [
    Band { fmin: 3200, fmax: 3650, capacitance: (131, 19), current: (138, 137) },
    Band { fmin: 3650, fmax: 4200, capacitance: (143, 25), current: (162, 142) },
    Band { fmin: 4200, fmax: 4650, capacitance: (135, 34), current: (126, 114) },
    Band { fmin: 4650, fmax: 5200, capacitance: (136, 25), current: (195, 172) },
    Band { fmin: 5200, fmax: 5750, capacitance: (133, 20), current: (190, 163) },
    Band { fmin: 5750, fmax: 6400, capacitance: (151, 27), current: (256, 204) },
];

fn div_nearest(dividend: u64, divisor: u64) -> u64 {
    (dividend + (divisor >> 1)) / divisor
}

impl Band {
    fn interpolate(&self, mhz: u64, (start, end): (u64, u64)) -> u64 {
        let mhz = mhz.clamp(self.fmin, self.fmax);
        div_nearest(
            start * (self.fmax - mhz) + end * (mhz - self.fmin),
            self.fmax - self.fmin,
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneOptions {
    /// Arm VCO phase synchronization
    pub sync: bool,
    /// Recalibrate regardless of distance, with forced band selection
    pub force_calibration: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VcoCalibration {
    /// VCO core, 1-6
    pub vco: u8,
    pub capacitance: u16,
    pub current: u16,
    /// Band, capacitance and current are forced rather than searched
    pub forced: bool,
    /// Band moved down to avoid the 6.9 GHz spur
    pub spur_avoidance: bool,
}

impl VcoCalibration {
    pub fn new(freq: u64, vco_freq: u64, force: bool) -> Self {
        let mhz = vco_freq / 1_000_000;
        // Boundaries belong to the upper band
        let index = BANDS
            .iter()
            .rposition(|b| (b.fmin..=b.fmax).contains(&mhz))
            .unwrap_or(if mhz < BANDS[0].fmin { 0 } else { BANDS.len() - 1 });
        let band = &BANDS[index];

        let mut vco = index as u8 + 1;
        let mut capacitance = band.interpolate(mhz, band.capacitance) + CAPACITANCE_OFFSET;
        let mut current = band.interpolate(mhz, band.current);

        let forced = force || SPUR_WINDOW.contains(&freq);
        let spur_avoidance = forced && SPUR_VCO.contains(&vco_freq);
        if spur_avoidance {
            vco = SPUR_BAND;
            capacitance += 5;
            current = current.saturating_sub(10);
        }

        Self {
            vco,
            capacitance: capacitance as u16,
            current: current as u16,
            forced,
            spur_avoidance,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrequencyPlan {
    pub freq: u64,
    pub vco: u64,
    /// Output division is 2^divider
    pub divider: u8,
    pub n: u32,
    pub frac: u32,
    pub sync: bool,
    /// Present when the VCO band needs recalibrating
    pub calibration: Option<VcoCalibration>,
}

pub fn needs_calibration(last: Option<u64>, freq: u64, force: bool) -> bool {
    force || last.map_or(true, |last| last.abs_diff(freq) > RECAL_THRESHOLD)
}

impl FrequencyPlan {
    pub fn new(freq: u64, pfd: u64, tune: TuneOptions, last: Option<u64>) -> Result<Self> {
        if pfd == 0 {
            return Err(Error::Reference("phase detector frequency is zero"));
        }
        if freq == 0 {
            return Err(Error::Unreachable(freq));
        }

        let mut vco = freq;
        let mut divider = 0;
        while vco < VCO_MIN {
            if divider == MAX_DIVIDER {
                return Err(Error::Unreachable(freq));
            }
            vco *= 2;
            divider += 1;
        }

        // Phase sync below the VCO range takes the ratio from the half-rate VCO
        let sync_halved = tune.sync && freq < VCO_MIN;
        let ratio = if sync_halved { vco / 2 } else { vco };
        let n = ratio / pfd;
        if n > N_MAX {
            return Err(Error::Unreachable(freq));
        }
        let frac = (ratio - n * pfd) * u64::from(DENOMINATOR) / pfd;

        let calibration = needs_calibration(last, freq, tune.force_calibration)
            .then(|| VcoCalibration::new(freq, vco, tune.force_calibration));

        Ok(Self {
            freq,
            vco,
            divider,
            n: n as u32,
            frac: frac as u32,
            sync: tune.sync,
            calibration,
        })
    }

    /// R37 PFD_DLY_SEL
    pub fn pfd_delay(&self) -> u16 {
        if self.vco > PFD_DLY_THRESHOLD {
            2
        } else {
            1
        }
    }

    pub fn chdiv(&self) -> u16 {
        CHDIV_BASE | CHDIV[usize::from(self.divider)] << CHDIV_SHIFT
    }

    pub fn vco_direct(&self) -> bool {
        self.divider == 0
    }
}

impl<B: Bus, P: Pin> Lmx2572<B, P> {
    pub fn plan(&self, freq: u64, tune: TuneOptions) -> Result<FrequencyPlan> {
        FrequencyPlan::new(freq, self.pfd_freq, tune, self.last_calibration)
    }

    /// Program the divider path for `freq`.
    ///
    /// Nothing is written when the target is unreachable. R34 goes out last
    /// since writing it applies the new ratio.
    pub fn set_freq(&mut self, freq: u64, tune: TuneOptions) -> Result<FrequencyPlan> {
        let plan = self.plan(freq, tune)?;
        debug!("{plan:?}");

        let mut quick_recal = self.QUICK_RECAL().cached();
        if let Some(cal) = plan.calibration {
            let force = |bit: u16| if cal.forced { bit } else { 0 };
            self.VCO_SEL()
                .write(force(VCO_SEL_FORCE) | VCO_SEL_BASE | u16::from(cal.vco) << VCO_SEL_SHIFT)?;
            self.VCO_DACISET_STRT().write(cal.current)?;
            self.VCO_CTRL().write(VCO_CTRL_CAL)?;
            self.VCO_DACISET().write(force(VCO_DACISET_FORCE) | cal.current)?;
            self.VCO_CAPCTRL()
                .write(force(VCO_CAPCTRL_FORCE) | VCO_CAPCTRL_BASE | cal.capacitance)?;
            quick_recal = cal.capacitance << 1;
            self.last_calibration = Some(freq);
            info!(
                "VCO{} seeded for {} Hz (capacitance {}, current {}{})",
                cal.vco,
                freq,
                cal.capacitance,
                cal.current,
                if cal.forced { ", forced" } else { "" },
            );
        } else {
            quick_recal |= QUICK_RECAL_EN;
        }

        let delay = plan.pfd_delay();
        if (self.PFD_DLY().cached() >> PFD_DLY_SHIFT) & PFD_DLY_MASK != delay {
            self.PFD_DLY().write(delay << PFD_DLY_SHIFT | PFD_DLY_BASE)?;
        }

        self.QUICK_RECAL().write(quick_recal)?;
        self.CHDIV().write(plan.chdiv())?;
        if plan.vco_direct() {
            self.OUTB_MUX().write(OUTB_MUX_VCO)?;
            self.OUTB_PWR().modify(|r| r & !OUTA_MUX | OUTA_MUX_VCO)?;
        } else {
            self.OUTB_MUX().write(OUTB_MUX_CHDIV)?;
            self.OUTB_PWR().modify(|r| r & !OUTA_MUX)?;
        }

        self.PLL_DEN_LO().write((DENOMINATOR & 0xFFFF) as u16)?;
        self.PLL_DEN_HI().write((DENOMINATOR >> 16) as u16)?;
        self.PLL_NUM_LO().write((plan.frac & 0xFFFF) as u16)?;
        self.PLL_NUM_HI().write((plan.frac >> 16) as u16)?;
        self.PLL_N().write((plan.n & 0xFFFF) as u16)?;
        self.PLL_N_HI().write(((plan.n >> 16) & 0x7) as u16 | PLL_N_HI_BASE)?;

        if plan.sync {
            self.INPIN_IGNORE().modify(|r| r & !INPIN_IGNORE)?;
            self.MASH_RST_COUNT_HI().write(0)?;
            self.MASH_RST_COUNT_LO().write(PHASE_SYNC_COUNT)?;
            self.CONTROL().modify(|c| c | Control::VCO_PHASE_SYNC)?;
        } else {
            self.CONTROL()
                .modify(|c| (c - Control::VCO_PHASE_SYNC) | Control::FCAL_EN)?;
            self.INPIN_IGNORE().modify(|r| r | INPIN_IGNORE)?;
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    const PFD: u64 = 100_000_000;

    fn fresh(freq: u64) -> FrequencyPlan {
        FrequencyPlan::new(freq, PFD, TuneOptions::default(), None).unwrap()
    }

    #[test]
    fn plan_5g8() {
        let plan = fresh(5_800_000_000);
        assert_eq!((plan.divider, plan.n, plan.frac), (0, 58, 0));
        let cal = plan.calibration.unwrap();
        assert_eq!((cal.vco, cal.capacitance, cal.current), (6, 151, 252));
        assert!(!cal.forced && !cal.spur_avoidance);
    }

    #[test]
    fn plan_1g() {
        let plan = fresh(1_000_000_000);
        assert_eq!((plan.divider, plan.vco), (2, 4_000_000_000));
        assert_eq!((plan.n, plan.frac), (40, 0));
        assert_eq!(plan.chdiv(), 0x0800 | 1 << 6);
        assert_eq!(plan.pfd_delay(), 1);
    }

    #[test]
    fn plan_fraction() {
        let plan = fresh(5_870_000_000);
        assert_eq!(plan.n, 58);
        assert_eq!(u64::from(plan.frac), 70_000_000 * 0xFF_FFFF / PFD);
    }

    #[test]
    fn spur_window_moves_band() {
        let cal = fresh(5_900_000_000).calibration.unwrap();
        assert_eq!((cal.vco, cal.capacitance, cal.current), (5, 137, 234));
        assert!(cal.forced && cal.spur_avoidance);
    }

    #[test]
    fn forced_outside_spur_vco() {
        let tune = TuneOptions {
            sync: false,
            force_calibration: true,
        };
        let cal = FrequencyPlan::new(4_000_000_000, PFD, tune, Some(4_000_000_000))
            .unwrap()
            .calibration
            .unwrap();
        assert!(cal.forced && !cal.spur_avoidance);
        assert_eq!(cal.vco, 2);
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(VcoCalibration::new(3_650_000_000, 3_650_000_000, false).vco, 2);
        assert_eq!(VcoCalibration::new(3_649_000_000, 3_649_000_000, false).vco, 1);
        assert_eq!(VcoCalibration::new(6_400_000_000, 6_400_000_000, false).vco, 6);
        assert_eq!(VcoCalibration::new(3_200_000_000, 3_200_000_000, false).vco, 1);
    }

    #[test]
    fn above_band_clamps() {
        let top = VcoCalibration::new(6_400_000_000, 6_400_000_000, false);
        let over = VcoCalibration::new(6_500_000_000, 6_500_000_000, false);
        assert_eq!(top, over);
        assert_eq!((top.capacitance, top.current), (37, 204));
    }

    #[test]
    fn unreachable_targets() {
        assert!(matches!(FrequencyPlan::new(0, PFD, TuneOptions::default(), None), Err(Error::Unreachable(0))));
        assert!(matches!(
            FrequencyPlan::new(12_000_000, PFD, TuneOptions::default(), None),
            Err(Error::Unreachable(_))
        ));
        assert_eq!(fresh(12_500_000).divider, 8);
    }

    #[test]
    fn sync_halves_ratio() {
        let tune = TuneOptions {
            sync: true,
            force_calibration: false,
        };
        let plan = FrequencyPlan::new(2_000_000_000, PFD, tune, None).unwrap();
        assert_eq!(plan.vco, 4_000_000_000);
        assert_eq!(plan.n, 20);
        let direct = FrequencyPlan::new(4_000_000_000, PFD, tune, None).unwrap();
        assert_eq!(direct.n, 40);
    }

    #[test]
    fn hysteresis() {
        assert!(needs_calibration(None, 1, false));
        assert!(!needs_calibration(Some(5_000_000_000), 5_100_000_000, false));
        assert!(needs_calibration(Some(5_000_000_000), 5_100_000_001, false));
        assert!(needs_calibration(Some(5_000_000_000), 5_000_000_000, true));
    }

    proptest! {
        #[test]
        fn plan_invariants(freq in 12_500_000..=VCO_MAX) {
            let plan = fresh(freq);
            assert!(plan.divider <= MAX_DIVIDER);
            assert!((VCO_MIN..VCO_MIN * 2).contains(&plan.vco) || plan.divider == 0);
            assert_eq!(plan.vco, freq << plan.divider);
            assert!(u64::from(plan.frac) < u64::from(DENOMINATOR));
            let recovered = u64::from(plan.n) * PFD + u64::from(plan.frac) * PFD / u64::from(DENOMINATOR);
            // Truncated fraction loses less than one PFD step over the denominator
            assert!(plan.vco - recovered <= PFD / u64::from(DENOMINATOR) + 1);
        }

        #[test]
        fn seeds_in_range(freq in VCO_MIN..=VCO_MAX) {
            let cal = VcoCalibration::new(freq, freq, false);
            assert!((1..=6).contains(&cal.vco));
            assert!(cal.capacitance <= 151 + 15);
            assert!(cal.current <= 256);
            assert_eq!(cal.forced, SPUR_WINDOW.contains(&freq));
        }

        #[test]
        fn force_bits_follow_window(freq in 5_750_000_000..=VCO_MAX, force: bool) {
            let cal = VcoCalibration::new(freq, freq, force);
            let expected = force || SPUR_WINDOW.contains(&freq);
            assert_eq!(cal.forced, expected);
            assert_eq!(cal.spur_avoidance, expected);
            if expected {
                assert_eq!(cal.vco, 5);
            }
        }
    }

    #[test]
    fn write_order_with_calibration() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.set_freq(5_800_000_000, TuneOptions::default())?;
        assert_eq!(
            synth.bus.written(),
            vec![20, 17, 8, 16, 19, 37, 78, 75, 46, 45, 39, 38, 43, 42, 36, 34, 0, 58]
        );
        assert_eq!(synth.bus.last_write(34), Some(0x10));
        assert_eq!(synth.bus.last_write(36), Some(58));
        assert_eq!(synth.bus.last_write(38), Some(0xFF));
        assert_eq!(synth.bus.last_write(39), Some(0xFFFF));
        assert_eq!(synth.bus.last_write(20), Some(0x4448 | 6 << 11));
        assert_eq!(synth.bus.last_write(19), Some(0x2700 | 151));
        assert_eq!(synth.bus.last_write(16), Some(252));
        assert_eq!(synth.bus.last_write(78), Some(151 << 1));
        assert_eq!(synth.bus.last_write(37), Some(0x0205));
        assert_eq!(synth.bus.last_write(46), Some(0x07F1));
        assert_eq!(synth.bus.last_write(45).map(|r| r & OUTA_MUX), Some(OUTA_MUX_VCO));
        assert_eq!(synth.last_calibration(), Some(5_800_000_000));
        Ok(())
    }

    #[test]
    fn forced_registers() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.set_freq(5_900_000_000, TuneOptions::default())?;
        assert_ne!(synth.bus.last_write(20).unwrap() & VCO_SEL_FORCE, 0);
        assert_ne!(synth.bus.last_write(19).unwrap() & VCO_CAPCTRL_FORCE, 0);
        assert_ne!(synth.bus.last_write(16).unwrap() & VCO_DACISET_FORCE, 0);
        assert_eq!((synth.bus.last_write(20).unwrap() >> VCO_SEL_SHIFT) & 0x7, 5);

        synth.set_freq(4_500_000_000, TuneOptions::default())?;
        assert_eq!(synth.bus.last_write(20).unwrap() & VCO_SEL_FORCE, 0);
        assert_eq!(synth.bus.last_write(19).unwrap() & VCO_CAPCTRL_FORCE, 0);
        assert_eq!(synth.bus.last_write(16).unwrap() & VCO_DACISET_FORCE, 0);
        Ok(())
    }

    #[test]
    fn small_step_reuses_calibration() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.set_freq(5_000_000_000, TuneOptions::default())?;
        synth.bus.frames.clear();

        synth.set_freq(5_050_000_000, TuneOptions::default())?;
        let written = synth.bus.written();
        assert!(!written.iter().any(|a| [8, 16, 17, 19, 20].contains(a)));
        assert!(!written.contains(&37));
        assert_ne!(synth.bus.last_write(78).unwrap() & QUICK_RECAL_EN, 0);
        assert_eq!(synth.last_calibration(), Some(5_000_000_000));
        Ok(())
    }

    #[test]
    fn divided_output_mux() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.write(45, 0xFFFF)?;
        synth.set_freq(1_000_000_000, TuneOptions::default())?;
        assert_eq!(synth.bus.last_write(46), Some(0x07F0));
        assert_eq!(synth.bus.last_write(45), Some(0xE7FF));
        assert_eq!(synth.bus.last_write(75), Some(0x0840));
        assert_eq!(synth.bus.last_write(37), Some(0x0105));
        Ok(())
    }

    #[test]
    fn failure_writes_nothing() {
        let mut synth = mock::synth();
        synth.last_calibration = Some(1_000_000_000);
        assert!(synth.set_freq(1_000_000, TuneOptions::default()).is_err());
        assert!(synth.bus.frames.is_empty());
        assert_eq!(synth.last_calibration(), Some(1_000_000_000));
    }

    #[test]
    fn sync_arms_phase_sync() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        let tune = TuneOptions {
            sync: true,
            force_calibration: false,
        };
        synth.set_freq(2_000_000_000, tune)?;
        let tail = &synth.bus.writes()[16..];
        assert_eq!(
            tail,
            &[
                (58, 0x9001 & !INPIN_IGNORE),
                (69, 0),
                (70, 30_000),
                (0, 0x211C | Control::VCO_PHASE_SYNC.bits()),
            ]
        );
        Ok(())
    }

    #[test]
    fn no_sync_asserts_fcal() -> anyhow::Result<()> {
        let mut synth = mock::synth();
        synth.write(0, 0x4000)?;
        synth.set_freq(5_000_000_000, TuneOptions::default())?;
        let control = Control::from(synth.bus.last_write(0).unwrap());
        assert!(control.contains(Control::FCAL_EN));
        assert!(!control.contains(Control::VCO_PHASE_SYNC));
        assert_ne!(synth.bus.last_write(58).unwrap() & INPIN_IGNORE, 0);
        Ok(())
    }
}
