//! Read-only views of the dashboard's fertigation records.
//!
//! Field names follow this crate; the aliases accept the column names used
//! by the dashboard's database so exported rows load unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IrrigationType {
    /// Plain water
    #[default]
    #[serde(rename = "air")]
    Water,
    /// Water with nutrient dosing
    #[serde(rename = "air_nutrisi")]
    WaterNutrient,
}

impl fmt::Display for IrrigationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrrigationType::Water => f.write_str("air"),
            IrrigationType::WaterNutrient => f.write_str("air_nutrisi"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantingPhase {
    pub id: String,
    #[serde(alias = "nama_fase_tanam")]
    pub name: String,
    /// Litres per day
    #[serde(default, alias = "kebutuhan_air")]
    pub water_requirement: Option<f64>,
    /// mS/cm
    #[serde(default)]
    pub target_ec: Option<f64>,
    #[serde(default, alias = "jenis_irigasi")]
    pub irrigation_type: IrrigationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FertigationLand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub current_phase_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationSchedule {
    pub id: String,
    #[serde(default)]
    pub land_id: Option<String>,
    #[serde(default)]
    pub phase_id: Option<String>,
    /// `HH:MM`
    pub time: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}
