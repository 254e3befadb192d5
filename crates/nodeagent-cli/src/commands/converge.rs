use super::{json_pretty, log_report, Agent, Failure, EXIT_SUCCESS};
use nodeagent_core::{AgentConfig, AgentLock, ShutdownSignal};

/// One convergence pass, without starting the controller.
pub fn run(config: &AgentConfig, shutdown: &ShutdownSignal, json: bool) -> Result<u8, Failure> {
    let _lock = AgentLock::try_acquire(&config.lock_file)?;
    let agent = Agent::from_config(config, shutdown)?;
    let metadata = agent.node_metadata()?;
    tracing::info!(
        "converging node {} to cluster version {}",
        metadata.name,
        metadata.pool_version
    );

    let report = agent
        .engine
        .converge(&metadata)
        .map_err(|e| Failure::from(e).context("failed to process components"))?;
    log_report(&report);

    if json {
        let out = serde_json::json!({
            "uninstalled": report.uninstalled,
            "installed": report.installed,
            "unchanged": report.unchanged,
        });
        println!("{}", json_pretty(&out)?);
    }
    Ok(EXIT_SUCCESS)
}
