use super::{IrrigationStore, StoreError};
use crate::irrigation::{FertigationLand, IrrigationSchedule, PlantingPhase};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Contents of a plan file.
///
/// ```toml
/// [[phases]]
/// id = "p1"
/// name = "Vegetatif"
/// water_requirement = 4.0
/// target_ec = 1.6
/// irrigation_type = "air_nutrisi"
///
/// [[lands]]
/// id = "l1"
/// name = "Lahan 1"
/// current_phase_id = "p1"
///
/// [[schedules]]
/// id = "s1"
/// phase_id = "p1"
/// time = "07:00"
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PlanSnapshot {
    #[serde(default)]
    pub phases: Vec<PlantingPhase>,
    #[serde(default)]
    pub lands: Vec<FertigationLand>,
    #[serde(default)]
    pub schedules: Vec<IrrigationSchedule>,
}

impl PlanSnapshot {
    pub fn parse(path: &Path, content: &str) -> Result<Self, StoreError> {
        toml::from_str(content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// File-backed [`IrrigationStore`].
pub struct PlanFile {
    path: Option<PathBuf>,
    snapshot: RwLock<PlanSnapshot>,
}

impl PlanFile {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = read_snapshot(&path).await?;
        info!(
            "Loaded plan {} ({} phases, {} lands, {} schedules)",
            path.display(),
            snapshot.phases.len(),
            snapshot.lands.len(),
            snapshot.schedules.len()
        );
        Ok(Self {
            path: Some(path),
            snapshot: RwLock::new(snapshot),
        })
    }

    /// In-memory store, not backed by a file.
    pub fn from_snapshot(snapshot: PlanSnapshot) -> Self {
        Self {
            path: None,
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-reads the backing file. The previous snapshot stays in place if
    /// reading fails.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            debug!("Plan has no backing file, nothing to reload");
            return Ok(());
        };
        let fresh = read_snapshot(path).await?;
        *self.snapshot.write().await = fresh;
        info!("Reloaded plan {}", path.display());
        Ok(())
    }

    pub async fn snapshot(&self) -> PlanSnapshot {
        self.snapshot.read().await.clone()
    }
}

async fn read_snapshot(path: &Path) -> Result<PlanSnapshot, StoreError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    PlanSnapshot::parse(path, &content)
}

impl IrrigationStore for PlanFile {
    async fn planting_phases(&self) -> Result<Vec<PlantingPhase>, StoreError> {
        Ok(self.snapshot.read().await.phases.clone())
    }

    async fn fertigation_lands(&self) -> Result<Vec<FertigationLand>, StoreError> {
        let mut lands = self.snapshot.read().await.lands.clone();
        lands.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(lands)
    }

    async fn schedules_by_phase(
        &self,
        phase_id: &str,
    ) -> Result<Vec<IrrigationSchedule>, StoreError> {
        let mut schedules: Vec<IrrigationSchedule> = self
            .snapshot
            .read()
            .await
            .schedules
            .iter()
            .filter(|schedule| schedule.phase_id.as_deref() == Some(phase_id))
            .cloned()
            .collect();
        schedules.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(schedules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irrigation::{plan_for_all_lands, plan_for_land, IrrigationType};
    use std::io::Write;

    const PLAN: &str = r#"
[[phases]]
id = "p1"
nama_fase_tanam = "Vegetatif"
kebutuhan_air = 9.0
target_ec = 1.6
jenis_irigasi = "air_nutrisi"

[[phases]]
id = "p2"
name = "Generatif"

[[lands]]
id = "l2"
name = "Lahan 2"
current_phase_id = "p1"

[[lands]]
id = "l1"
name = "Kebun Belakang"
current_phase_id = "p2"

[[lands]]
id = "l3"
name = "Lahan Kosong"

[[lands]]
id = "l4"
name = "Lahan Hilang"
current_phase_id = "missing"

[[schedules]]
id = "s2"
phase_id = "p1"
time = "17:00"

[[schedules]]
id = "s1"
phase_id = "p1"
time = "06:00"

[[schedules]]
id = "s3"
phase_id = "p1"
time = "12:00"
is_active = false
"#;

    fn write_plan(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_rows_with_database_column_names() {
        let file = write_plan(PLAN);
        let store = PlanFile::load(file.path()).await.unwrap();

        let phases = store.planting_phases().await.unwrap();
        assert_eq!(phases[0].name, "Vegetatif");
        assert_eq!(phases[0].water_requirement, Some(9.0));
        assert_eq!(phases[0].irrigation_type, IrrigationType::WaterNutrient);
        assert_eq!(phases[1].irrigation_type, IrrigationType::Water);

        let times: Vec<String> = store
            .schedules_by_phase("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.time)
            .collect();
        assert_eq!(times, vec!["06:00", "12:00", "17:00"]);
    }

    #[tokio::test]
    async fn plans_skip_lands_without_resolvable_phase() {
        let file = write_plan(PLAN);
        let store = PlanFile::load(file.path()).await.unwrap();

        let configs = plan_for_all_lands(&store).await.unwrap();
        let names: Vec<&str> = configs.iter().map(|c| c.land_name.as_str()).collect();
        assert_eq!(names, vec!["Kebun Belakang", "Lahan 2"]);

        let lahan2 = &configs[1];
        assert_eq!(lahan2.config_id, 2);
        assert_eq!(lahan2.water_per_schedule, 4.5);
        assert_eq!(lahan2.schedules.len(), 3);

        assert_eq!(configs[0].config_id, 1);
        assert_eq!(configs[0].water_per_schedule, 0.0);
    }

    #[tokio::test]
    async fn single_land_plan() {
        let store = PlanFile::from_snapshot(PlanSnapshot::parse(Path::new("inline"), PLAN).unwrap());

        assert!(plan_for_land(&store, "l3").await.unwrap().is_none());
        assert!(matches!(
            plan_for_land(&store, "nope").await,
            Err(StoreError::NotFound { kind: "land", .. })
        ));
        assert!(matches!(
            plan_for_land(&store, "l4").await,
            Err(StoreError::NotFound { kind: "phase", .. })
        ));
        let config = plan_for_land(&store, "l2").await.unwrap().unwrap();
        assert_eq!(config.target_ec, 1.6);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error_and_reload_keeps_old_snapshot() {
        let bad = write_plan("[[lands]\nid = ");
        assert!(matches!(
            PlanFile::load(bad.path()).await,
            Err(StoreError::Parse { .. })
        ));

        let file = write_plan(PLAN);
        let store = PlanFile::load(file.path()).await.unwrap();
        std::fs::write(file.path(), "not = [valid").unwrap();
        assert!(store.reload().await.is_err());
        assert_eq!(store.snapshot().await.lands.len(), 4);
    }
}
