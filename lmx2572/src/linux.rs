/* Linux userspace transport: spidev for the serial bus, GPIO character
 * device lines for chip-select and enable.
 * */
use crate::{Bus, Pin, Result};
use gpiocdev::{line::Value, Request};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::path::Path;

pub const SPI_SPEED: u32 = 20_000_000;

pub fn open<P: AsRef<Path>>(path: P, speed_hz: u32) -> std::io::Result<Spidev> {
    let mut spi = Spidev::open(path)?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(speed_hz)
        .mode(SpiModeFlags::SPI_MODE_3 | SpiModeFlags::SPI_NO_CS)
        .build();
    spi.configure(&options)?;
    Ok(spi)
}

impl Bus for Spidev {
    fn exchange(&mut self, tx: &[u8; 3], rx: &mut [u8; 3]) -> Result<()> {
        self.transfer(&mut SpidevTransfer::read_write(tx, rx))?;
        Ok(())
    }
}

/// A single requested output line
pub struct GpioLine {
    request: Request,
    offset: u32,
}

impl GpioLine {
    pub fn output<P: AsRef<Path>>(chip: P, offset: u32, high: bool) -> Result<Self> {
        let request = Request::builder()
            .on_chip(chip.as_ref())
            .with_consumer("lmx2572")
            .with_line(offset)
            .as_output(level(high))
            .request()?;
        Ok(Self { request, offset })
    }
}

fn level(high: bool) -> Value {
    if high {
        Value::Active
    } else {
        Value::Inactive
    }
}

impl Pin for GpioLine {
    fn set_high(&mut self) -> Result<()> {
        self.request.set_value(self.offset, Value::Active)?;
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.request.set_value(self.offset, Value::Inactive)?;
        Ok(())
    }
}
