//! Thermal comfort: PMV bands, PPD, comfort indices and surface temperatures

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Upper temperature bound (inclusive) of each PMV band from −3 to +2.
const TEMP_BANDS: [f64; 6] = [18.0, 20.0, 23.0, 27.0, 29.0, 32.0];

const T_NEUTRAL: f64 = 24.0;
const STEP_DEGC_PER_INDEX: f64 = 2.0;
const MAX_WIND_EFFECT: f64 = 2.0;

/// Outdoor reference temperature of the non-AC surface table.
pub const T_OUT_REF: f64 = 32.0;
/// Indoor reference temperature of the AC surface table.
pub const T_IN_REF: f64 = 24.0;

/// Seven-point thermal sensation scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PmvLabel {
    VeryCold,
    Cold,
    SlightlyCold,
    Neutral,
    SlightlyWarm,
    Warm,
    Hot,
}

impl PmvLabel {
    /// Label for an index, rounded to the nearest level and clamped to ±3.
    pub fn from_index(index: f64) -> Self {
        let level = if index.is_nan() {
            0
        } else {
            index.round().clamp(-3.0, 3.0) as i8
        };
        match level {
            i8::MIN..=-3 => PmvLabel::VeryCold,
            -2 => PmvLabel::Cold,
            -1 => PmvLabel::SlightlyCold,
            0 => PmvLabel::Neutral,
            1 => PmvLabel::SlightlyWarm,
            2 => PmvLabel::Warm,
            _ => PmvLabel::Hot,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PmvLabel::VeryCold => "very cold",
            PmvLabel::Cold => "cold",
            PmvLabel::SlightlyCold => "slightly cold",
            PmvLabel::Neutral => "neutral",
            PmvLabel::SlightlyWarm => "slightly warm",
            PmvLabel::Warm => "warm",
            PmvLabel::Hot => "hot",
        }
    }
}

impl fmt::Display for PmvLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete PMV from air temperature. NaN maps to neutral.
pub fn temp_to_pmv(temp_c: f64) -> i8 {
    if temp_c.is_nan() {
        return 0;
    }
    TEMP_BANDS
        .iter()
        .position(|&bound| temp_c <= bound)
        .map(|band| band as i8 - 3)
        .unwrap_or(3)
}

/// Predicted percentage dissatisfied (Fanger), clipped to [0, 100].
pub fn pmv_to_ppd(pmv: f64) -> f64 {
    let ppd = 100.0 - 95.0 * (-0.03353 * pmv.powi(4) - 0.2179 * pmv.powi(2)).exp();
    ppd.clamp(0.0, 100.0)
}

/// Effective-temperature comfort index in [−3, 3].
///
/// Humidity above 50 % warms, wind up to 2 m/s cools; 2 °C per level around
/// a 24 °C neutral point.
pub fn comfort_index(t_in: f64, humidity: f64, wind_speed: f64) -> f64 {
    let t_eff = t_in + 0.02 * (humidity - 50.0) - 0.5 * wind_speed.clamp(0.0, MAX_WIND_EFFECT);
    ((t_eff - T_NEUTRAL) / STEP_DEGC_PER_INDEX).clamp(-3.0, 3.0)
}

pub fn index_label(index: f64) -> PmvLabel {
    PmvLabel::from_index(index)
}

fn clip01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Comfort score in [−3, 3] from a weighted discomfort index.
///
/// +3 means no discomfort at all; heat, cold, humidity far from 50 % and
/// particulates each push the score down. Wind relieves heat but worsens cold.
pub fn weighted_comfort(temp: f64, humidity: f64, wind: f64, pm25: f64) -> f64 {
    let temp_hot = clip01((temp - 27.0) / 6.0);
    let temp_cold = clip01((20.0 - temp) / 5.0);
    let humidity_dev = clip01((humidity - 50.0).abs() / 30.0);
    let pm_norm = clip01(pm25 / 150.0);
    let wind_norm = clip01(wind / 8.0);

    let wind_effect = -wind_norm * temp_hot + wind_norm * temp_cold;
    let (w_temp, w_hum, w_wind, w_pm) = (0.5, 0.2, 0.15, 0.15);

    let discomfort = clip01(
        w_temp * (0.6 * temp_hot + 0.4 * temp_cold)
            + w_hum * humidity_dev
            + w_pm * pm_norm
            + w_wind * wind_effect,
    );

    (3.0 - 6.0 * discomfort).clamp(-3.0, 3.0)
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComfortError {
    #[error("unknown construction element '{0}'")]
    UnknownElement(String),
}

/// Building envelope element with tabulated inner-surface temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SurfaceElement {
    InsulatedExternalWall,
    ShadedExternalWall,
    InternalWall,
    FloorCeiling,
    ReflectiveCeiling40,
    InsulatedExternalCeiling,
    ReflectiveCeiling80,
    SingleGlazedWindow,
    DoubleGlazedWindow,
}

impl SurfaceElement {
    pub const ALL: [SurfaceElement; 9] = [
        SurfaceElement::InsulatedExternalWall,
        SurfaceElement::ShadedExternalWall,
        SurfaceElement::InternalWall,
        SurfaceElement::FloorCeiling,
        SurfaceElement::ReflectiveCeiling40,
        SurfaceElement::InsulatedExternalCeiling,
        SurfaceElement::ReflectiveCeiling80,
        SurfaceElement::SingleGlazedWindow,
        SurfaceElement::DoubleGlazedWindow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SurfaceElement::InsulatedExternalWall => "Insulated External Wall",
            SurfaceElement::ShadedExternalWall => "Non-insulated External Wall (Shaded)",
            SurfaceElement::InternalWall => "Internal Wall",
            SurfaceElement::FloorCeiling => "Floor/Ceiling",
            SurfaceElement::ReflectiveCeiling40 => {
                "Non-insulated External Ceiling (40% Reflective)"
            }
            SurfaceElement::InsulatedExternalCeiling => "Insulated External Ceiling",
            SurfaceElement::ReflectiveCeiling80 => {
                "Non-Insulated External Ceiling (80% Reflective)"
            }
            SurfaceElement::SingleGlazedWindow => "SGU Window (Shaded)",
            SurfaceElement::DoubleGlazedWindow => "DGU Window (Shaded)",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            SurfaceElement::InsulatedExternalWall => &["insulated wall"],
            SurfaceElement::ShadedExternalWall => &["non insulated external wall shaded"],
            SurfaceElement::InternalWall => &["internal"],
            SurfaceElement::FloorCeiling => &["floor ceiling"],
            SurfaceElement::ReflectiveCeiling40 => &["ceiling 40"],
            SurfaceElement::InsulatedExternalCeiling => &[],
            SurfaceElement::ReflectiveCeiling80 => &["ceiling 80"],
            SurfaceElement::SingleGlazedWindow => &["sgu window"],
            SurfaceElement::DoubleGlazedWindow => &["dgu window"],
        }
    }

    /// Surface temperature at `T_OUT_REF` without air conditioning.
    fn base_non_ac(&self) -> f64 {
        match self {
            SurfaceElement::InsulatedExternalWall => 30.0,
            SurfaceElement::ShadedExternalWall => 32.0,
            SurfaceElement::InternalWall => 31.0,
            SurfaceElement::FloorCeiling => 31.0,
            SurfaceElement::ReflectiveCeiling40 => 41.0,
            SurfaceElement::InsulatedExternalCeiling => 31.0,
            SurfaceElement::ReflectiveCeiling80 => 32.0,
            SurfaceElement::SingleGlazedWindow => 36.0,
            SurfaceElement::DoubleGlazedWindow => 33.0,
        }
    }

    /// Surface temperature at `T_IN_REF` with air conditioning.
    fn base_ac(&self) -> f64 {
        match self {
            SurfaceElement::InsulatedExternalWall => 25.0,
            SurfaceElement::ShadedExternalWall => 29.0,
            SurfaceElement::InternalWall => 24.0,
            SurfaceElement::FloorCeiling => 24.0,
            SurfaceElement::ReflectiveCeiling40 => 40.0,
            SurfaceElement::InsulatedExternalCeiling => 26.0,
            SurfaceElement::ReflectiveCeiling80 => 30.0,
            SurfaceElement::SingleGlazedWindow => 31.0,
            SurfaceElement::DoubleGlazedWindow => 26.0,
        }
    }

    /// Inner-surface temperature in a free-running building.
    pub fn surface_non_ac(&self, t_out: f64) -> f64 {
        self.base_non_ac() + (t_out - T_OUT_REF)
    }

    /// Inner-surface temperature in an air-conditioned building.
    pub fn surface_ac(&self, t_in: f64) -> f64 {
        self.base_ac() + (t_in - T_IN_REF)
    }
}

impl fmt::Display for SurfaceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn normalize_name(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl FromStr for SurfaceElement {
    type Err = ComfortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_name(s);
        SurfaceElement::ALL
            .into_iter()
            .find(|element| {
                normalize_name(element.name()) == key
                    || element.aliases().iter().any(|alias| *alias == key)
            })
            .ok_or_else(|| ComfortError::UnknownElement(s.trim().to_string()))
    }
}

/// Surface temperatures of one element with the indoor comfort index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceComfort {
    pub element: &'static str,
    pub t_out: f64,
    pub t_in: f64,
    pub surface_non_ac: f64,
    pub surface_ac: f64,
    pub index: f64,
    pub label: PmvLabel,
}

pub fn surface_comfort(
    element: SurfaceElement,
    t_out: f64,
    t_in: f64,
    humidity: f64,
    wind_speed: f64,
) -> SurfaceComfort {
    let index = comfort_index(t_in, humidity, wind_speed);
    SurfaceComfort {
        element: element.name(),
        t_out,
        t_in,
        surface_non_ac: element.surface_non_ac(t_out),
        surface_ac: element.surface_ac(t_in),
        index,
        label: index_label(index),
    }
}
