use std::sync::Arc;

use crate::backend::AssignmentBackend;
use crate::bus::EventBus;
use crate::config::Config;
use crate::error::AppError;
use crate::gateway::Gateway;
use crate::gateway::auth::Authenticator;
use crate::location::LocationService;
use crate::matching::{MatchingPolicy, MatchingService};
use crate::observability::metrics::Metrics;
use crate::spatial::CandidateSearch;
use crate::spatial::honeycomb::HoneycombGrid;

pub struct AppState {
    pub config: Config,
    pub gateway: Gateway,
    pub auth: Authenticator,
    pub grid: Arc<HoneycombGrid>,
    pub location: Arc<LocationService>,
    pub matching: MatchingService,
    pub bus: EventBus,
    pub backend: Arc<dyn AssignmentBackend>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn AssignmentBackend>) -> Result<Self, AppError> {
        let metrics = Metrics::new();
        let bus = EventBus::new(config.event_buffer_size);
        let grid = Arc::new(HoneycombGrid::new(
            config.h3_resolution,
            config.honeycomb_k_ring,
            config.honeycomb_enabled,
            config.honeycomb_zones.clone(),
        )?);
        let location = Arc::new(LocationService::new(grid.clone(), config.disconnect_grace));
        let search = CandidateSearch::new(grid.clone(), location.clone());
        let matching = MatchingService::new(
            search,
            location.clone(),
            backend.clone(),
            bus.clone(),
            metrics.clone(),
            MatchingPolicy {
                offer_deadline: config.offer_deadline,
                default_radius_km: config.search_radius_km,
                cascade_radius_multiplier: config.cascade_radius_multiplier,
                max_cascades: config.max_cascades,
            },
            config.assignment_lock_ttl,
        );

        Ok(Self {
            auth: Authenticator::new(config.auth_secret.clone()),
            gateway: Gateway::new(),
            grid,
            location,
            matching,
            bus,
            backend,
            metrics,
            config,
        })
    }
}
