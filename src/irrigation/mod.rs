//! Fertigation domain: store records, the configuration payloads built from
//! them, and the device's sensor telemetry.

pub mod model;
pub mod plan;
pub mod sensor;

pub use model::{FertigationLand, IrrigationSchedule, IrrigationType, PlantingPhase};
pub use plan::{
    derive_config_id, plan_for_all_lands, plan_for_land, water_per_schedule, IrrigationConfig,
    ScheduleEntry,
};
pub use sensor::{sensor_handler, SensorReading};
