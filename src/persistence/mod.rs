//! # Persistence Module
//!
//! Read side of the fertigation data store. The dashboard's real store is an
//! external service; the supervisor's callers only need to look up phases,
//! lands and schedules when they build an irrigation configuration, so that
//! is all [`IrrigationStore`] exposes.
//!
//! [`plan_file::PlanFile`] is the local implementation: a TOML snapshot of
//! the three tables, loaded once and reloadable on demand.

pub mod plan_file;

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

use crate::irrigation::{FertigationLand, IrrigationSchedule, PlantingPhase};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("No {kind} with id {id}")]
    NotFound { kind: &'static str, id: String },
}

pub trait IrrigationStore: Send + Sync {
    fn planting_phases(
        &self,
    ) -> impl Future<Output = Result<Vec<PlantingPhase>, StoreError>> + Send;

    /// Ordered by name.
    fn fertigation_lands(
        &self,
    ) -> impl Future<Output = Result<Vec<FertigationLand>, StoreError>> + Send;

    /// Schedules of one phase, ordered by time.
    fn schedules_by_phase(
        &self,
        phase_id: &str,
    ) -> impl Future<Output = Result<Vec<IrrigationSchedule>, StoreError>> + Send;
}
