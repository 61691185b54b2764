use crate::{config::*, registers::Power};

#[rustfmt::skip]
pub const REF_100MHZ: Reference = Reference {
    doubler:      false,
    pre_divider:  1,
    multiplier:   1,
    divider:      1,
    differential: false,
};

// 100 MHz reference doubled, PFD above 100 MHz
#[rustfmt::skip]
pub const REF_200MHZ: Reference = Reference {
    doubler:      true,
    pre_divider:  1,
    multiplier:   1,
    divider:      1,
    differential: false,
};

pub const PORT_A: Outputs = Outputs {
    a: Output::on(Power::saturating(50)),
    b: Output::OFF,
};

pub const PORT_B: Outputs = Outputs {
    a: Output::OFF,
    b: Output::on(Power::saturating(50)),
};

pub const TUNE_5870: Tune = Tune {
    freq: 5_870_000_000,
    options: TuneOptions {
        sync: false,
        force_calibration: false,
    },
};

pub const TUNE_5800: Tune = Tune {
    freq: 5_800_000_000,
    options: TuneOptions {
        sync: false,
        force_calibration: false,
    },
};
