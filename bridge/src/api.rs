//! Application facade
//!
//! [`ObservatoryService`] owns the telescope link, the orchestrator and the
//! planning collaborators, and is the only surface a UI or CLI needs.

use crate::config::SkywardConfig;
use crate::error::{BridgeError, BridgeResult};
use chrono::NaiveDate;
use skyward_link::{ConnectionInfo, LinkError, TelescopeLink};
use skyward_planner::{
    Plan, PlanRequest, SchedulerConfig, SchedulingConstraints, SessionScheduler, SharedCatalog, SharedWeather,
};
use skyward_sequencer::{ExecutionError, ExecutionEvent, ExecutionHandle, ExecutionOrchestrator, ExecutionProgress};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{info, warn};

// =============================================================================
// Plan storage
// =============================================================================

/// Keeps generated plans
pub trait PlanStore: Send + Sync {
    fn save(&self, plan: &Plan) -> BridgeResult<()>;

    /// Most recently generated plan
    fn latest(&self) -> BridgeResult<Option<Plan>>;
}

/// Plans held in memory; used in tests and when no plan directory is configured
#[derive(Default)]
pub struct MemoryPlanStore {
    plans: Mutex<Vec<Plan>>,
}

impl MemoryPlanStore {
    pub fn len(&self) -> usize {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlanStore for MemoryPlanStore {
    fn save(&self, plan: &Plan) -> BridgeResult<()> {
        self.plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(plan.clone());
        Ok(())
    }

    fn latest(&self) -> BridgeResult<Option<Plan>> {
        let plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(plans.iter().max_by_key(|p| p.generated_at).cloned())
    }
}

/// One pretty-printed JSON file per plan
pub struct JsonPlanStore {
    directory: PathBuf,
}

impl JsonPlanStore {
    pub fn new(directory: impl Into<PathBuf>) -> BridgeResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, plan: &Plan) -> PathBuf {
        self.directory
            .join(format!("plan-{}-{}.json", plan.date.format("%Y-%m-%d"), plan.id))
    }
}

impl PlanStore for JsonPlanStore {
    fn save(&self, plan: &Plan) -> BridgeResult<()> {
        let path = self.path_for(plan);
        let json = serde_json::to_string_pretty(plan).map_err(|e| BridgeError::Io(e.to_string()))?;
        std::fs::write(&path, json)?;
        info!("Saved plan {} to {}", plan.id, path.display());
        Ok(())
    }

    fn latest(&self) -> BridgeResult<Option<Plan>> {
        let mut latest: Option<Plan> = None;

        for entry in std::fs::read_dir(&self.directory)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let plan: Plan = match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
            {
                Ok(plan) => plan,
                Err(e) => {
                    warn!("Skipping unreadable plan file {}: {}", path.display(), e);
                    continue;
                }
            };
            if latest.as_ref().map_or(true, |l| plan.generated_at > l.generated_at) {
                latest = Some(plan);
            }
        }

        Ok(latest)
    }
}

// =============================================================================
// Observatory service
// =============================================================================

pub struct ObservatoryService {
    config: SkywardConfig,
    link: Arc<TelescopeLink>,
    orchestrator: ExecutionOrchestrator,
    catalog: SharedCatalog,
    weather: SharedWeather,
    plans: Arc<dyn PlanStore>,
}

impl ObservatoryService {
    /// Validate `config` and build the service. Plans are written to
    /// `config.plan_directory` when set.
    pub fn new(config: SkywardConfig, catalog: SharedCatalog, weather: SharedWeather) -> BridgeResult<Self> {
        config.validate()?;
        let plans: Arc<dyn PlanStore> = match &config.plan_directory {
            Some(dir) => Arc::new(JsonPlanStore::new(dir)?),
            None => Arc::new(MemoryPlanStore::default()),
        };
        Ok(Self::with_plan_store(config, catalog, weather, plans))
    }

    pub fn with_plan_store(
        config: SkywardConfig,
        catalog: SharedCatalog,
        weather: SharedWeather,
        plans: Arc<dyn PlanStore>,
    ) -> Self {
        let link = Arc::new(TelescopeLink::new(config.link.clone()));
        let orchestrator = ExecutionOrchestrator::new(link.clone(), config.executor.clone());
        Self {
            config,
            link,
            orchestrator,
            catalog,
            weather,
            plans,
        }
    }

    pub fn config(&self) -> &SkywardConfig {
        &self.config
    }

    // =========================================================================
    // Planning
    // =========================================================================

    /// Plan the night starting on `date` at the configured site
    pub fn generate_plan(&self, constraints: SchedulingConstraints, date: NaiveDate) -> BridgeResult<Plan> {
        let request = PlanRequest::new(self.config.location.clone(), date);
        self.generate_plan_for(&request, constraints)
    }

    /// Plan with an explicit request (custom window or catalog filter)
    pub fn generate_plan_for(&self, request: &PlanRequest, constraints: SchedulingConstraints) -> BridgeResult<Plan> {
        let scheduler = SessionScheduler::new(SchedulerConfig {
            constraints,
            instrument: self.config.scheduler.instrument.clone(),
        });
        let plan = scheduler.generate_plan(request, self.catalog.as_ref(), self.weather.as_ref())?;
        info!(
            "Generated plan {} for {}: {} targets, {} exclusions",
            plan.id,
            plan.date,
            plan.targets.len(),
            plan.exclusions.len()
        );
        self.plans.save(&plan)?;
        Ok(plan)
    }

    pub fn latest_plan(&self) -> BridgeResult<Option<Plan>> {
        self.plans.latest()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub fn execute_plan(&self, plan: Plan) -> BridgeResult<ExecutionHandle> {
        if !self.link.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        Ok(self.orchestrator.execute_plan(plan)?)
    }

    pub fn get_execution_progress(&self) -> ExecutionProgress {
        self.orchestrator.progress()
    }

    pub fn subscribe_execution(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.orchestrator.subscribe()
    }

    pub fn is_executing(&self) -> bool {
        self.orchestrator.is_running()
    }

    /// Returns false when nothing was running
    pub fn abort_execution(&self) -> bool {
        self.orchestrator.abort()
    }

    // =========================================================================
    // Telescope
    // =========================================================================

    pub fn connection_info(&self) -> ConnectionInfo {
        self.link.connection_info()
    }

    pub async fn connect_telescope(&self, host: &str, port: u16) -> BridgeResult<ConnectionInfo> {
        if self.orchestrator.is_running() {
            return Err(BridgeError::ExecutionActive("reconnect the telescope".to_string()));
        }
        self.link.connect(host, port).await?;
        Ok(self.link.connection_info())
    }

    /// Connect to the configured telescope if `telescope.auto_connect` is set
    pub async fn auto_connect(&self) -> BridgeResult<Option<ConnectionInfo>> {
        if !self.config.telescope.auto_connect {
            return Ok(None);
        }
        let telescope = &self.config.telescope;
        self.connect_telescope(&telescope.host, telescope.port).await.map(Some)
    }

    pub async fn disconnect_telescope(&self) -> BridgeResult<()> {
        if self.orchestrator.is_running() {
            return Err(BridgeError::ExecutionActive("disconnect the telescope".to_string()));
        }
        self.link.disconnect().await?;
        Ok(())
    }

    /// Park, aborting any active run first
    pub async fn park_telescope(&self) -> BridgeResult<()> {
        match self.orchestrator.park_telescope().await {
            Ok(()) => Ok(()),
            Err(ExecutionError::Telescope(LinkError::NotConnected)) => Err(BridgeError::NotConnected),
            Err(e) => Err(e.into()),
        }
    }
}
