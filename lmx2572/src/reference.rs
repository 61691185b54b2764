//! Reference path: doubler, pre-divider, multiplier and post-divider feeding
//! the phase detector, plus the input buffer and charge pump.
use crate::{registers::*, Bus, Error, Lmx2572, Pin, Result};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reference {
    pub doubler: bool,
    /// 12 bits
    pub pre_divider: u16,
    /// 5 bits
    pub multiplier: u8,
    pub divider: u8,
    pub differential: bool,
}

impl Default for Reference {
    fn default() -> Self {
        Self {
            doubler: false,
            pre_divider: 1,
            multiplier: 1,
            divider: 1,
            differential: false,
        }
    }
}

impl Reference {
    fn fields(&self) -> Result<(u16, u16, u16)> {
        let pre = self.pre_divider & 0xFFF;
        let mult = u16::from(self.multiplier & 0x1F);
        let r = u16::from(self.divider);
        if pre == 0 {
            return Err(Error::Reference("pre-divider is zero"));
        }
        if mult == 0 {
            return Err(Error::Reference("multiplier is zero"));
        }
        if r == 0 {
            return Err(Error::Reference("divider is zero"));
        }
        Ok((pre, mult, r))
    }

    /// Phase detector frequency for a base reference of `ref_freq`
    pub fn pfd(&self, ref_freq: u64) -> Result<u64> {
        let (pre, mult, r) = self.fields()?;
        let ref_freq = if self.doubler { ref_freq * 2 } else { ref_freq };
        let pfd = ref_freq * u64::from(mult) / u64::from(pre) / u64::from(r);
        if pfd == 0 {
            return Err(Error::Reference("phase detector frequency is zero"));
        }
        Ok(pfd)
    }
}

impl<B: Bus, P: Pin> Lmx2572<B, P> {
    /// Program the reference path and return the new phase detector
    /// frequency.
    pub fn set_ref(&mut self, reference: Reference) -> Result<u64> {
        let (pre, mult, r) = reference.fields()?;
        let pfd = reference.pfd(self.ref_freq)?;

        let mut osc = OSC_2X_BASE;
        if reference.doubler {
            osc |= OSC_2X;
        }
        if pfd > 100_000_000 {
            osc |= OSC_HIGH_PFD;
        }
        self.OSC_2X().write(osc)?;
        self.MULT().write(MULT_BASE | mult << MULT_SHIFT)?;
        self.PLL_R().write(PLL_R_BASE | r << PLL_R_SHIFT)?;
        self.PLL_R_PRE().write(PLL_R_PRE_BASE | pre)?;
        self.INBUF().write(if reference.differential {
            INBUF_DIFFERENTIAL
        } else {
            INBUF_SINGLE_ENDED
        })?;

        debug!("PFD {pfd} Hz from {:?}", reference);
        self.pfd_freq = pfd;
        Ok(pfd)
    }

    pub fn set_pd_gain(&mut self, gain: u8) -> Result<()> {
        let gain = ChargePumpGain::try_from(gain)?;
        let reg = self.CPG().read()?;
        self.CPG()
            .write(reg & !CPG_MASK | u16::from(gain.get()) << CPG_SHIFT)
    }

    pub fn pd_gain(&mut self) -> Result<u8> {
        Ok(((self.CPG().read()? & CPG_MASK) >> CPG_SHIFT) as u8)
    }

    pub fn set_osc_single_ended(&mut self) -> Result<()> {
        let wrote = self.INBUF().read()? | INBUF_SE;
        self.INBUF().write(wrote)?;
        let read = self.INBUF().read()?;
        if read & INBUF_SE == 0 {
            return Err(Error::Verify {
                addr: 5,
                wrote,
                read,
            });
        }
        Ok(())
    }
}
