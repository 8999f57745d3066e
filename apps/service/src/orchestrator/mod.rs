/// Orchestrator module - the engine's entry point
///
/// The orchestrator sits between callers and the probers:
/// - Resolves regions and checks enablement before anything is dialed
/// - Bounds every probe by a per-call deadline and a per-region permit
/// - Persists every result it hands back
///
/// The `retention` submodule keeps the result store bounded.
pub mod retention;


pub use retention::{RetentionPolicy, RetentionSweeper};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::ProbeSettings;
use crate::database::{CheckResultStore, MetricPoint, RollingSummary, Summary};
use crate::error::{EngineError, ProbeError};
use crate::flags::{Capability, Enablement};
use crate::monitoring::checker::Connector;
use crate::monitoring::validation::{normalize_parameters, validate_history_limit, validate_summary_window};
use crate::monitoring::{ProbeExecutor, ProbeKind, ProbeParameters, ProbeRequest, ProbeResult};
use crate::registry::{Region, RegionLocation, RegionRegistry};

/// Target for actor-attributed probe records
pub const AUDIT_TARGET: &str = "regionpulse::audit";

/// Per-call inputs that come from outside the engine
#[derive(Clone)]
pub struct CallContext {
    pub actor_key: Option<String>,
    pub enablement: Arc<dyn Enablement>,
}

impl CallContext {
    pub fn new(enablement: Arc<dyn Enablement>) -> Self {
        Self { actor_key: None, enablement }
    }

    pub fn with_actor(mut self, actor_key: impl Into<String>) -> Self {
        self.actor_key = Some(actor_key.into());
        self
    }

    fn actor(&self) -> Option<&str> {
        self.actor_key.as_deref()
    }

    fn require(&self, capability: Capability) -> Result<(), EngineError> {
        if self.enablement.capability_enabled(capability, self.actor()) {
            Ok(())
        } else {
            Err(EngineError::CapabilityDisabled(capability))
        }
    }
}

/// Issues probes against registered regions and records the results
#[derive(Clone)]
pub struct ProbeOrchestrator {
    registry: Arc<RegionRegistry>,
    executor: Arc<ProbeExecutor>,
    store: Arc<dyn CheckResultStore>,
    /// Built once; one permit pool per region
    permits: Arc<HashMap<String, Arc<Semaphore>>>,
    deadline: Duration,
    default_iterations: u32,
    default_concurrency: u32,
}

impl ProbeOrchestrator {
    pub fn new(
        registry: Arc<RegionRegistry>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn CheckResultStore>,
        settings: &ProbeSettings,
    ) -> Self {
        let per_region = settings.max_concurrent_per_region.max(1);
        let permits = registry.ids().into_iter().map(|id| (id, Arc::new(Semaphore::new(per_region)))).collect();

        Self {
            registry,
            executor: Arc::new(ProbeExecutor::new(connector, settings.connect_timeout())),
            store,
            permits: Arc::new(permits),
            deadline: settings.deadline(),
            default_iterations: settings.default_iterations,
            default_concurrency: settings.default_concurrency,
        }
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn CheckResultStore> {
        &self.store
    }

    /// Map markers for the regions this caller may probe
    pub fn region_locations(&self, ctx: &CallContext) -> Vec<RegionLocation> {
        self.registry.locations(ctx.enablement.as_ref(), ctx.actor())
    }

    /// Whether this caller may probe `region`
    pub fn region_enabled(&self, region: &Region, ctx: &CallContext) -> bool {
        ctx.enablement.region_enabled(region, ctx.actor())
    }

    /// Parameters used when a kind is dispatched without explicit ones
    pub fn default_parameters(&self, kind: ProbeKind) -> ProbeParameters {
        match kind {
            ProbeKind::Connection => ProbeParameters::Connection,
            ProbeKind::Latency => ProbeParameters::Latency { iterations: self.default_iterations },
            ProbeKind::Load => ProbeParameters::Load { concurrency: self.default_concurrency },
            ProbeKind::Health => ProbeParameters::Health,
        }
    }

    fn known_region(&self, region_id: &str) -> Result<&Region, EngineError> {
        self.registry.get(region_id).ok_or_else(|| EngineError::UnknownRegion(region_id.to_string()))
    }

    fn resolve(&self, region_id: &str, ctx: &CallContext) -> Result<&Region, EngineError> {
        let region = self.known_region(region_id)?;
        if !ctx.enablement.region_enabled(region, ctx.actor()) {
            return Err(EngineError::RegionUnavailable(region_id.to_string()));
        }
        Ok(region)
    }

    /// Validate, probe, persist.
    ///
    /// Only rejections surface as `Err`; a probe that ran always comes back
    /// as a result, successful or not.
    pub async fn dispatch(&self, request: ProbeRequest, ctx: &CallContext) -> Result<ProbeResult, EngineError> {
        let region = self.resolve(&request.region_id, ctx)?;
        if let Some(capability) = Capability::for_kind(request.kind()) {
            ctx.require(capability)?;
        }
        let parameters = normalize_parameters(request.parameters)?;

        Ok(self.run(region, parameters, ctx.actor_key.clone()).await)
    }

    /// Probe every enabled region concurrently, one task per region
    pub async fn dispatch_all(
        &self,
        kind: ProbeKind,
        ctx: &CallContext,
    ) -> Result<BTreeMap<String, ProbeResult>, EngineError> {
        ctx.require(Capability::TestAllRegions)?;
        if let Some(capability) = Capability::for_kind(kind) {
            ctx.require(capability)?;
        }
        let parameters = normalize_parameters(self.default_parameters(kind))?;

        let regions: Vec<Region> =
            self.registry.all().filter(|r| ctx.enablement.region_enabled(r, ctx.actor())).cloned().collect();
        if regions.is_empty() {
            return Err(EngineError::NoRegionsAvailable);
        }

        let handles: Vec<_> = regions
            .iter()
            .map(|region| {
                let orchestrator = self.clone();
                let region = region.clone();
                let actor_key = ctx.actor_key.clone();
                tokio::spawn(async move { orchestrator.run(&region, parameters, actor_key).await })
            })
            .collect();

        let mut results = BTreeMap::new();
        for (region, joined) in regions.into_iter().zip(join_all(handles).await) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(region = %region.id, kind = %kind, "Probe task failed: {}", e);
                    let result = ProbeResult::failed(&region.id, kind, ProbeError::unknown(format!("probe task failed: {e}")))
                        .with_actor(ctx.actor_key.clone());
                    self.persist(&result).await;
                    result
                }
            };
            results.insert(region.id, result);
        }

        let succeeded = results.values().filter(|r| r.success()).count();
        info!(kind = %kind, regions = results.len(), succeeded, "Probed all regions");
        Ok(results)
    }

    async fn run(&self, region: &Region, parameters: ProbeParameters, actor_key: Option<String>) -> ProbeResult {
        let kind = parameters.kind();
        // Waiting for a permit counts against the deadline
        let work = async {
            // Every registry region has a pool and pools are never closed
            let _permit = match self.permits.get(&region.id) {
                Some(permits) => permits.clone().acquire_owned().await.ok(),
                None => None,
            };
            self.executor.execute(region, parameters).await
        };

        let result = match tokio::time::timeout(self.deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(region = %region.id, kind = %kind, "Probe exceeded deadline of {:?}", self.deadline);
                ProbeResult::failed(
                    &region.id,
                    kind,
                    ProbeError::timeout(format!(
                        "{kind} probe exceeded deadline of {}ms",
                        self.deadline.as_millis()
                    )),
                )
            }
        };
        let result = result.with_actor(actor_key);

        if let Some(actor) = &result.actor_key {
            info!(
                target: AUDIT_TARGET,
                actor = %actor,
                region = %region.id,
                kind = %kind,
                success = result.success(),
                result_id = %result.id,
                "Probe executed"
            );
        }

        self.persist(&result).await;
        result
    }

    async fn persist(&self, result: &ProbeResult) {
        if let Err(e) = self.store.save(result).await {
            warn!(region = %result.region_id, result_id = %result.id, "Failed to persist probe result: {:#}", e);
        }
    }

    pub async fn test_connection(&self, region_id: &str, ctx: &CallContext) -> Result<ProbeResult, EngineError> {
        self.dispatch(ProbeRequest::new(region_id, ProbeParameters::Connection), ctx).await
    }

    pub async fn measure_latency(
        &self,
        region_id: &str,
        iterations: u32,
        ctx: &CallContext,
    ) -> Result<ProbeResult, EngineError> {
        self.dispatch(ProbeRequest::new(region_id, ProbeParameters::Latency { iterations }), ctx).await
    }

    pub async fn run_load_test(
        &self,
        region_id: &str,
        concurrency: u32,
        ctx: &CallContext,
    ) -> Result<ProbeResult, EngineError> {
        self.dispatch(ProbeRequest::new(region_id, ProbeParameters::Load { concurrency }), ctx).await
    }

    pub async fn inspect_health(&self, region_id: &str, ctx: &CallContext) -> Result<ProbeResult, EngineError> {
        self.dispatch(ProbeRequest::new(region_id, ProbeParameters::Health), ctx).await
    }

    pub async fn test_all_regions(&self, ctx: &CallContext) -> Result<BTreeMap<String, ProbeResult>, EngineError> {
        self.dispatch_all(ProbeKind::Connection, ctx).await
    }

    pub async fn get_recent(&self, region_id: &str, limit: usize) -> Result<Vec<ProbeResult>, EngineError> {
        self.known_region(region_id)?;
        let limit = validate_history_limit(limit)?;
        Ok(self.store.recent(region_id, limit).await?)
    }

    /// History of every enabled region, newest first
    pub async fn get_recent_all(&self, limit: usize, ctx: &CallContext) -> Result<Vec<ProbeResult>, EngineError> {
        let limit = validate_history_limit(limit)?;
        let ids: Vec<String> = self
            .registry
            .all()
            .filter(|r| ctx.enablement.region_enabled(r, ctx.actor()))
            .map(|r| r.id.clone())
            .collect();
        Ok(self.store.recent_across(&ids, limit).await?)
    }

    pub async fn get_summary(&self, region_id: &str, window: Duration) -> Result<Summary, EngineError> {
        self.known_region(region_id)?;
        let window = validate_summary_window(window)?;
        Ok(self.store.summary(region_id, window).await?)
    }

    pub async fn get_metric_series(
        &self,
        region_id: &str,
        kind: ProbeKind,
        limit: usize,
    ) -> Result<Vec<MetricPoint>, EngineError> {
        self.known_region(region_id)?;
        let limit = validate_history_limit(limit)?;
        Ok(self.store.metric_series(region_id, kind, limit).await?)
    }

    pub async fn get_rolling_summary(&self) -> Result<Vec<RollingSummary>, EngineError> {
        Ok(self.store.rolling_24h().await?)
    }
}
