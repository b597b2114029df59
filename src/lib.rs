pub mod agent;
pub mod config;
pub mod errors;
pub mod executor;
pub mod grounding;
pub mod knowledge;
pub mod llm;
pub mod operations;
pub mod session;
pub mod steplog;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use crate::agent::engine::AgentEngine;
use crate::config::AppConfig;
use crate::errors::PilotResult;
use crate::executor::actuator::EnigoActuator;
use crate::executor::run::BatchExecutor;
use crate::grounding::detector::{DisabledDetector, YoloLabelDetector};
use crate::grounding::ocr_http::HttpOcrEngine;
use crate::grounding::resolver::GroundingResolver;
use crate::grounding::ElementDetector;
use crate::knowledge::JsonKnowledgeStore;
use crate::llm::dispatch::{Dispatcher, SYSTEM_PROMPT};
use crate::llm::registry::AdapterRegistry;
use crate::session::Session;
use crate::steplog::StepLogger;

fn log_dir(config: &AppConfig) -> PathBuf {
    if !config.logging.log_dir.is_empty() {
        return PathBuf::from(&config.logging.log_dir);
    }
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("screenpilot")
        .join("logs")
}

/// Run one objective to completion against `provider_id` and return the
/// model's closing summary. The step log is written whichever way the
/// session ends.
pub async fn submit(
    objective: &str,
    provider_id: &str,
    config: &AppConfig,
    cancel: watch::Receiver<bool>,
) -> PilotResult<String> {
    let registry = Arc::new(AdapterRegistry::from_config(&config.llm)?);

    let ocr = Arc::new(HttpOcrEngine::new(&config.ocr));
    let detector: Arc<dyn ElementDetector> = if config
        .llm
        .providers
        .values()
        .any(|p| p.grounding == "labels")
    {
        Arc::new(YoloLabelDetector::new(&config.detector)?)
    } else {
        Arc::new(DisabledDetector)
    };
    let resolver = Arc::new(GroundingResolver::new(ocr, detector));

    let actuator = Arc::new(EnigoActuator::new()?);
    let knowledge = Arc::new(JsonKnowledgeStore::new(&config.knowledge));

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        resolver.clone(),
        actuator.clone(),
    ));
    let executor = Arc::new(BatchExecutor::new(actuator, resolver, knowledge));
    let engine = AgentEngine::new(dispatcher, executor, config.agent.clone(), cancel);

    let mut session = Session::new(objective, SYSTEM_PROMPT);
    let mut logger = StepLogger::new(objective, provider_id, &log_dir(config));
    engine.run(provider_id, &mut session, &mut logger).await
}
