use super::{log_report, Agent, Failure, AGENT_VERSION, EXIT_SUCCESS};
use nodeagent_controller::{ControllerSettings, KubeClient, NodeController};
use nodeagent_core::{AgentConfig, AgentLock, ShutdownSignal};
use std::sync::Arc;
use tracing::info;

/// Converge the node once, then hand over to the controller until shutdown.
pub fn run(config: &AgentConfig, shutdown: &ShutdownSignal) -> Result<u8, Failure> {
    let _lock = AgentLock::try_acquire(&config.lock_file)?;
    let agent = Agent::from_config(config, shutdown)?;
    let metadata = agent.node_metadata()?;

    info!(
        "converging node {} to cluster version {}",
        metadata.name, metadata.pool_version
    );
    let report = agent
        .engine
        .converge(&metadata)
        .map_err(|e| Failure::from(e).context("failed to process components"))?;
    log_report(&report);
    info!("components processed successfully");

    if shutdown.is_requested() {
        return Ok(EXIT_SUCCESS);
    }

    let client = KubeClient::from_metadata(&metadata)
        .map_err(|e| Failure::from(e).context("failed to create node controller"))?;
    let settings = ControllerSettings::from_config(&config.controller, &metadata.name, AGENT_VERSION);
    let controller = Arc::new(NodeController::new(
        settings,
        Arc::new(client),
        Arc::clone(&agent.engine),
        Arc::clone(&agent.credentials),
        Arc::clone(&agent.fetcher),
        shutdown.clone(),
    ));
    controller
        .run()
        .map_err(|e| Failure::from(e).context("failed to run node controller"))?;
    info!("controller stopped");
    Ok(EXIT_SUCCESS)
}
