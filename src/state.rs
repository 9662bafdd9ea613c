// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::Config;
use crate::core::attempt::AttemptService;
use crate::core::grading::GradingPipeline;
use crate::core::materializer::Materializer;
use crate::grader::TextGrader;
use crate::observe::Metrics;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub materializer: Arc<Materializer>,
    pub attempts: Arc<AttemptService>,
    pub metrics: Arc<Metrics>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    /// Wires the core services against the given collaborators.
    pub fn new(config: Config, store: Arc<dyn Store>, grader: Arc<dyn TextGrader>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

        let materializer = Arc::new(Materializer::new(
            store.clone(),
            metrics.clone(),
            audit.clone(),
        ));
        let pipeline = GradingPipeline::new(grader, metrics.clone());
        let attempts = Arc::new(AttemptService::new(
            store.clone(),
            pipeline,
            audit.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            store,
            materializer,
            attempts,
            metrics,
            audit,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
