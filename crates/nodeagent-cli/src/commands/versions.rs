use super::{json_pretty, Failure, EXIT_SUCCESS};
use nodeagent_core::AgentConfig;
use nodeagent_store::{FileVersionStore, VersionStore};

/// Print the installed component versions.
pub fn run(config: &AgentConfig, json: bool) -> Result<u8, Failure> {
    let versions = FileVersionStore::new(&config.versions_file).list()?;

    if json {
        println!("{}", json_pretty(&versions)?);
    } else if versions.is_empty() {
        println!("no components installed");
    } else {
        let width = versions.keys().map(String::len).max().unwrap_or(0);
        for (component, version) in &versions {
            println!("{component:<width$}  {version}");
        }
    }
    Ok(EXIT_SUCCESS)
}
