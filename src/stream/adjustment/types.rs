use serde::{Deserialize, Serialize};

use crate::stream::format::DataFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentMode {
    #[default]
    Disabled,
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainMode {
    #[default]
    Disabled,
    Manual,
    FixExposure,
    AutomaticCompensation,
    /// Automatic, but each sensor is adjusted on its own.
    AutomaticCompensationIndependent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoExposureRoi {
    #[default]
    FullImage,
    Bottom50,
    Top50,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmearCorrection {
    #[default]
    Disabled,
    Remove,
    /// Also interpolates saturated smear from neighbouring pixels.
    RemoveFill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMappingMode {
    #[default]
    None,
    OpenGl,
    Cpu,
}

/// Post-processing applied to frames that were not adjusted on camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentParameters {
    pub do_adjustment: bool,
    pub black_level_enabled: bool,
    /// 0.0 to 0.07.
    pub black_level: f32,
    pub gain_mode: GainMode,
    pub gain_roi: AutoExposureRoi,
    pub consider_gamma_in_gain: bool,
    /// dB, 0.0 to 24.0.
    pub gain_manual_value: f32,
    /// Target pixel mean for [`GainMode::FixExposure`], 0 to 65535.
    pub exposure_target: f32,
    /// -100 to 100.
    pub exposure_compensation: f32,
    pub white_balance: AdjustmentMode,
    /// dB relative to green, -12 to 12.
    pub gain_red: f32,
    pub gain_blue: f32,
    pub gamma_enabled: bool,
    /// 0.5 to 4.
    pub gamma: f32,
    pub smear_correction: SmearCorrection,
    pub noise_reduction: bool,
    pub saturation: f32,
    pub black_levelling: AdjustmentMode,
    pub white_levelling: AdjustmentMode,
    pub black_point: f64,
    pub white_point: f64,
}

impl Default for AdjustmentParameters {
    fn default() -> Self {
        Self {
            do_adjustment: true,
            black_level_enabled: false,
            black_level: 0.0,
            gain_mode: GainMode::Disabled,
            gain_roi: AutoExposureRoi::FullImage,
            consider_gamma_in_gain: false,
            gain_manual_value: 0.0,
            exposure_target: 32768.0,
            exposure_compensation: 0.0,
            white_balance: AdjustmentMode::Disabled,
            gain_red: 0.0,
            gain_blue: 0.0,
            gamma_enabled: false,
            gamma: 1.0,
            smear_correction: SmearCorrection::Disabled,
            noise_reduction: false,
            saturation: 1.0,
            black_levelling: AdjustmentMode::Automatic,
            white_levelling: AdjustmentMode::Automatic,
            black_point: 0.0,
            white_point: 1.0,
        }
    }
}

impl AdjustmentParameters {
    /// Range checks on the numeric fields.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let checks: [(&str, f64, f64, f64); 8] = [
            ("black_level", self.black_level as f64, 0.0, 0.07),
            ("gain_manual_value", self.gain_manual_value as f64, 0.0, 24.0),
            ("exposure_target", self.exposure_target as f64, 0.0, 65535.0),
            ("exposure_compensation", self.exposure_compensation as f64, -100.0, 100.0),
            ("gain_red", self.gain_red as f64, -12.0, 12.0),
            ("gain_blue", self.gain_blue as f64, -12.0, 12.0),
            ("gamma", self.gamma as f64, 0.5, 4.0),
            ("saturation", self.saturation as f64, 0.0, f64::MAX),
        ];
        for (name, value, min, max) in checks {
            if !(min..=max).contains(&value) {
                return Err(format!("{name} = {value} is outside {min}..={max}"));
            }
        }
        if !(0.0..=1.0).contains(&self.black_point) || !(0.0..=1.0).contains(&self.white_point) {
            return Err("black and white points must lie in 0..=1".to_string());
        }
        if self.black_point + 0.05 > self.white_point {
            return Err(format!(
                "black point {} must be at least 0.05 below white point {}",
                self.black_point, self.white_point
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMappingParams {
    /// 0.1 to 40.0, OpenGL mode only.
    pub compression_scale: f64,
    /// 0 to 10; 0 makes the operator global.
    pub local_area_size: f64,
    pub mode: ToneMappingMode,
}

impl Default for ToneMappingParams {
    fn default() -> Self {
        Self {
            compression_scale: 1.0,
            local_area_size: 10.0,
            mode: ToneMappingMode::None,
        }
    }
}

/// Everything the imaging engine needs to post-process one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FullAdjustment {
    pub post_processing: AdjustmentParameters,
    pub tone_mapping: ToneMappingParams,
    pub sharpening: bool,
    pub false_color_removal: bool,
}

impl FullAdjustment {
    /// Fallback overlay for frames of `format`. Formats adjusted on camera
    /// get a pass-through record.
    pub fn default_for(format: DataFormat) -> Self {
        let mut adjustment = Self::default();
        if !format.requires_post_processing() {
            adjustment.post_processing.do_adjustment = false;
        }
        adjustment
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.post_processing.validate()?;
        let tone = &self.tone_mapping;
        if !(0.1..=40.0).contains(&tone.compression_scale) {
            return Err(format!(
                "compression_scale = {} is outside 0.1..=40",
                tone.compression_scale
            ));
        }
        if !(0.0..=10.0).contains(&tone.local_area_size) {
            return Err(format!(
                "local_area_size = {} is outside 0..=10",
                tone.local_area_size
            ));
        }
        Ok(())
    }
}
