use crate::{registers::*, Bus, Error, Lmx2572, Pin, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// One RF output port
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub enabled: bool,
    pub power: Power,
}

impl Output {
    pub const OFF: Output = Output {
        enabled: false,
        power: Power::DEFAULT,
    };

    pub const fn on(power: Power) -> Self {
        Self {
            enabled: true,
            power,
        }
    }
}

impl<B: Bus, P: Pin> Lmx2572<B, P> {
    pub fn set_output(&mut self, a: Output, b: Output) -> Result<()> {
        debug!("output A {a:?}, output B {b:?}");
        self.OUTA_PWR().write(OutAPwr {
            power: a.power,
            a_enabled: a.enabled,
            b_enabled: b.enabled,
        })?;
        self.OUTB_PWR()
            .modify(|r| r & !OUTB_PWR_MASK | u16::from(b.power.get()))
    }

    /// Enable exactly the given ports at the default power.
    pub fn set_output_port(&mut self, ports: Ports) -> Result<()> {
        if ports.is_empty() {
            return Err(Error::NoPort);
        }
        let output = |port| Output {
            enabled: ports.contains(port),
            power: Power::DEFAULT,
        };
        self.set_output(output(Ports::A), output(Ports::B))
    }

    /// Enable `port` alone at `power`.
    pub fn set_output_power(&mut self, port: Port, power: u8) -> Result<()> {
        let power = Power::try_from(power)?;
        match port {
            Port::A => self.set_output(Output::on(power), Output::OFF),
            Port::B => self.set_output(Output::OFF, Output::on(power)),
        }
    }
}
