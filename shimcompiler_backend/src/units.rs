//! Conversion between physical units and device codes.
//!
//! The DAC drives each amplifier input with a voltage around a mid-scale bias; the amplifier
//! turns the difference into coil current with a per-channel gain. The readback ADC measures the
//! voltage across a sense resistor after an instrumentation amplifier, offset by a fixed bias.
//!
//! [`Conversion::code_for_amps`] is where calibration meets playback: it uses a channel's
//! measured gain and zero offset to turn a requested current into a DAC code.

use serde::Deserialize;

use crate::calibration::ChannelCalibration;

/// Constants of the DAC and readback chain.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Conversion {
    /// DAC output voltage at full-scale code.
    pub dac_full_scale_volts: f32,
    /// Largest DAC code.
    pub dac_max_code: u16,
    /// DAC voltage that corresponds to zero amplifier current.
    pub dac_midpoint_volts: f32,
    /// ADC volts per count.
    pub adc_volts_per_count: f32,
    /// Largest ADC code.
    pub adc_max_code: u16,
    /// ADC voltage at zero current.
    pub adc_bias_volts: f32,
    /// Gain of the current-sense amplifier.
    pub sense_amp_gain: f32,
    /// Current-sense resistor in ohms.
    pub sense_resistance_ohms: f32,
}

impl Default for Conversion {
    fn default() -> Self {
        Self {
            dac_full_scale_volts: 5.0,
            dac_max_code: u16::MAX,
            dac_midpoint_volts: 2.5,
            adc_volts_per_count: 4.096 / 4096.0,
            adc_max_code: 4095,
            adc_bias_volts: 1.25,
            sense_amp_gain: 10.0,
            sense_resistance_ohms: 0.2,
        }
    }
}

impl Conversion {
    fn volts_to_code(&self, volts: f32) -> u16 {
        let max = self.dac_max_code as f32;
        (max * volts / self.dac_full_scale_volts).clamp(0.0, max) as u16
    }

    /// DAC code for a raw output voltage, corrected by `zero_offset` volts.
    pub fn code_for_volts(&self, volts: f32, zero_offset: f32) -> u16 {
        self.volts_to_code(volts - zero_offset)
    }

    /// DAC code that makes the channel drive `amps`.
    ///
    /// Results outside the DAC range saturate at `0` or `dac_max_code`. A zero or non-finite
    /// gain cannot be inverted, so the channel is held at its zero-current code.
    pub fn code_for_amps(&self, amps: f32, cal: &ChannelCalibration) -> u16 {
        let drive = if cal.gain.is_finite() && cal.gain != 0.0 {
            amps / cal.gain
        } else {
            0.0
        };
        self.volts_to_code(drive + self.dac_midpoint_volts - cal.zero_offset)
    }

    /// DAC output voltage produced by `code`.
    pub fn volts_for_code(&self, code: u16) -> f32 {
        code as f32 * self.dac_full_scale_volts / self.dac_max_code as f32
    }

    /// Voltage seen by the readback ADC.
    pub fn readback_volts(&self, raw: u16) -> f32 {
        raw as f32 * self.adc_volts_per_count
    }

    /// Output current reported by the readback ADC.
    pub fn readback_amps(&self, raw: u16) -> f32 {
        (self.readback_volts(raw) - self.adc_bias_volts)
            / self.sense_amp_gain
            / self.sense_resistance_ohms
    }

    /// ADC code the readback chain would produce for `amps`. Saturates at the ADC range.
    pub fn raw_for_amps(&self, amps: f32) -> u16 {
        let volts = amps * self.sense_resistance_ohms * self.sense_amp_gain + self.adc_bias_volts;
        (volts / self.adc_volts_per_count)
            .round()
            .clamp(0.0, self.adc_max_code as f32) as u16
    }
}
