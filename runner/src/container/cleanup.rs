//! Unconditional teardown of session resources

use tracing::{debug, info};

use super::manager::ContainerManager;
use super::session::Session;

/// Teardown steps that failed; never escalated
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub warnings: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn warn(&mut self, step: &str, message: String) {
        debug!(step = step, error = %message, "Cleanup step failed");
        self.warnings.push(format!("{}: {}", step, message));
    }
}

/// Stop both containers and remove the network, each independently, then
/// clear the session whatever happened
pub async fn cleanup_all(
    manager: &ContainerManager,
    session: &mut Session,
    grace_seconds: u64,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    // Handles are taken before stopping so no container is stopped twice
    if let Some(main) = session.take_main() {
        if let Err(e) = manager.stop_container(&main.id, grace_seconds).await {
            report.warn("stop main container", e.to_string());
        }
    }

    if let Some(sidecar) = session.take_sidecar() {
        if let Err(e) = manager.stop_container(&sidecar.id, grace_seconds).await {
            report.warn("stop sidecar container", e.to_string());
        }
    }

    let network = session.take_network();
    if let Err(e) = manager.remove_network(network.as_ref()).await {
        report.warn("remove network", e.to_string());
    }

    session.clear();

    info!(
        session_id = %session.session_id,
        warnings = report.warnings.len(),
        "Cleanup finished"
    );

    report
}
