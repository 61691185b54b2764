//! Bring-up configuration
//!
//! Each section carries a `write` that applies it to a synthesizer. `Config`
//! ties them together in power-on order and can be loaded from TOML.
use crate::{
    reference::Reference, Bus, Calibration, FrequencyPlan, GpioLine, Lmx2572, Output, Pin,
    Result, TuneOptions,
};
use log::info;
use serde::{Deserialize, Serialize};
use spidev::Spidev;
use std::{fs, path::Path, path::PathBuf, thread, time::Duration};

pub mod presets;

/// Delay after a reset before the chip is reprogrammed
pub const RESET_SETTLE: Duration = Duration::from_millis(100);

/// Where the chip is attached on a Linux host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub spi: PathBuf,
    pub speed_hz: u32,
    pub gpiochip: PathBuf,
    pub chip_select: u32,
    pub enable: u32,
    pub ref_freq: u64,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            spi: PathBuf::from("/dev/spidev1.0"),
            speed_hz: crate::linux::SPI_SPEED,
            gpiochip: PathBuf::from("/dev/gpiochip0"),
            chip_select: 5,
            enable: 3,
            ref_freq: 100_000_000,
        }
    }
}

impl Device {
    pub fn open(&self) -> Result<Lmx2572<Spidev, GpioLine>> {
        let spi = crate::open(&self.spi, self.speed_hz)?;
        let cs = GpioLine::output(&self.gpiochip, self.chip_select, true)?;
        let en = GpioLine::output(&self.gpiochip, self.enable, false)?;
        Lmx2572::new(spi, cs, en, self.ref_freq)
    }
}

impl Reference {
    pub fn write<B: Bus, P: Pin>(self, synth: &mut Lmx2572<B, P>) -> Result<Self> {
        synth.set_ref(self)?;
        if !self.differential {
            synth.set_osc_single_ended()?;
        }
        Ok(self)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Outputs {
    pub a: Output,
    pub b: Output,
}

impl Outputs {
    pub fn write<B: Bus, P: Pin>(self, synth: &mut Lmx2572<B, P>) -> Result<Self> {
        synth.set_output(self.a, self.b)?;
        Ok(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tune {
    pub freq: u64,
    #[serde(flatten)]
    pub options: TuneOptions,
}

impl Tune {
    pub fn write<B: Bus, P: Pin>(self, synth: &mut Lmx2572<B, P>) -> Result<FrequencyPlan> {
        synth.set_freq(self.freq, self.options)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Charge pump gain, 0-15; left at the image value when absent
    pub charge_pump_gain: Option<u8>,
    pub calibration_timeout_ms: u64,
    /// Register image to program instead of the power-on defaults
    pub registers: Option<Vec<u32>>,
    pub device: Device,
    pub reference: Reference,
    pub outputs: Outputs,
    pub tune: Option<Tune>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            charge_pump_gain: None,
            calibration_timeout_ms: 1000,
            registers: None,
            device: Device::default(),
            reference: presets::REF_100MHZ,
            outputs: presets::PORT_A,
            tune: None,
        }
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    pub fn calibration_timeout(&self) -> Duration {
        Duration::from_millis(self.calibration_timeout_ms)
    }

    /// Power up, reset and program the chip, then tune and calibrate if a
    /// frequency is configured.
    pub fn write<B: Bus, P: Pin>(&self, synth: &mut Lmx2572<B, P>) -> Result<Option<Calibration>> {
        synth.enable()?;
        synth.reset()?;
        thread::sleep(RESET_SETTLE);

        match &self.registers {
            Some(image) => synth.configure(image, true)?,
            None => synth.configure_default()?,
        }
        self.reference.write(synth)?;
        if let Some(gain) = self.charge_pump_gain {
            synth.set_pd_gain(gain)?;
        }
        self.outputs.write(synth)?;

        let Some(tune) = self.tune else {
            return Ok(None);
        };
        let plan = tune.write(synth)?;
        let calibration = synth.trigger_calibration(self.calibration_timeout())?;
        info!(
            "{} Hz: VCO {} Hz, divider 2^{}, {}",
            plan.freq,
            plan.vco,
            plan.divider,
            if calibration.locked { "locked" } else { "not locked" },
        );
        Ok(Some(calibration))
    }
}
