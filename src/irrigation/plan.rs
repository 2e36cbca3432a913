//! Irrigation configuration payloads.
//!
//! A configuration is rebuilt from the store on every send and published
//! retained; the device keeps only the latest one per `configId`.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::model::{FertigationLand, IrrigationSchedule, IrrigationType, PlantingPhase};
use crate::persistence::{IrrigationStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub time: String,
    pub is_active: bool,
}

impl From<&IrrigationSchedule> for ScheduleEntry {
    fn from(schedule: &IrrigationSchedule) -> Self {
        Self {
            time: schedule.time.clone(),
            is_active: schedule.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrrigationConfig {
    pub config_id: u32,
    pub land_name: String,
    pub phase_name: String,
    /// Litres per day
    pub water_requirement: f64,
    /// Litres per active schedule
    pub water_per_schedule: f64,
    #[serde(rename = "targetEC")]
    pub target_ec: f64,
    pub irrigation_type: IrrigationType,
    pub schedules: Vec<ScheduleEntry>,
}

impl IrrigationConfig {
    /// `lands` is the full land list, used for the ordinal fallback of the
    /// config id.
    pub fn build(
        land: &FertigationLand,
        phase: &PlantingPhase,
        schedules: &[IrrigationSchedule],
        lands: &[FertigationLand],
    ) -> Self {
        let water_requirement = phase.water_requirement.unwrap_or(0.0);
        Self {
            config_id: derive_config_id(land, lands),
            land_name: land.name.clone(),
            phase_name: phase.name.clone(),
            water_requirement,
            water_per_schedule: water_per_schedule(water_requirement, schedules),
            target_ec: phase.target_ec.unwrap_or(0.0),
            irrigation_type: phase.irrigation_type,
            schedules: schedules.iter().map(ScheduleEntry::from).collect(),
        }
    }
}

/// Daily requirement split across active schedules, rounded to 2 decimals.
pub fn water_per_schedule(requirement: f64, schedules: &[IrrigationSchedule]) -> f64 {
    let active = schedules.iter().filter(|s| s.is_active).count();
    if active == 0 {
        return 0.0;
    }
    (requirement / active as f64 * 100.0).round() / 100.0
}

/// Device-side slot for a land.
///
/// Names containing "lahan 1" to "lahan 3" map to that slot; anything else
/// falls back to the land's 1-based position in `lands`, or 1 if absent.
pub fn derive_config_id(land: &FertigationLand, lands: &[FertigationLand]) -> u32 {
    let name = land.name.to_lowercase();
    for slot in 1..=3 {
        if name.contains(&format!("lahan {slot}")) {
            return slot;
        }
    }

    lands
        .iter()
        .position(|candidate| candidate.id == land.id)
        .and_then(|index| u32::try_from(index + 1).ok())
        .unwrap_or(1)
}

/// Builds the configuration for one land from its current phase.
///
/// `Ok(None)` when the land has no phase assigned.
pub async fn plan_for_land<S: IrrigationStore>(
    store: &S,
    land_id: &str,
) -> Result<Option<IrrigationConfig>, StoreError> {
    let lands = store.fertigation_lands().await?;
    let land = lands
        .iter()
        .find(|land| land.id == land_id)
        .ok_or_else(|| StoreError::NotFound {
            kind: "land",
            id: land_id.to_string(),
        })?;

    let Some(phase_id) = land.current_phase_id.as_deref() else {
        debug!("Land {} has no current phase", land.name);
        return Ok(None);
    };

    let phases = store.planting_phases().await?;
    let phase = phases
        .iter()
        .find(|phase| phase.id == phase_id)
        .ok_or_else(|| StoreError::NotFound {
            kind: "phase",
            id: phase_id.to_string(),
        })?;

    let schedules = store.schedules_by_phase(phase_id).await?;
    Ok(Some(IrrigationConfig::build(land, phase, &schedules, &lands)))
}

/// Configurations for every land that has a resolvable phase.
///
/// Lands whose phase is missing or whose schedules cannot be read are
/// skipped and logged.
pub async fn plan_for_all_lands<S: IrrigationStore>(
    store: &S,
) -> Result<Vec<IrrigationConfig>, StoreError> {
    let lands = store.fertigation_lands().await?;
    let phases = store.planting_phases().await?;
    let mut configs = Vec::new();

    for land in &lands {
        let Some(phase_id) = land.current_phase_id.as_deref() else {
            continue;
        };
        let Some(phase) = phases.iter().find(|phase| phase.id == phase_id) else {
            warn!("Phase not found for land {}", land.name);
            continue;
        };
        let schedules = match store.schedules_by_phase(phase_id).await {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("Failed to read schedules for {}: {}", land.name, e);
                continue;
            }
        };
        configs.push(IrrigationConfig::build(land, phase, &schedules, &lands));
    }

    Ok(configs)
}
