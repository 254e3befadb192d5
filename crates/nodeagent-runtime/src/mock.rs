use crate::{Action, ApplyRequest, ResourceApplier, RuntimeError};
use nodeagent_remote::RepositoryReader;
use nodeagent_schema::ResourceGroup;
use std::sync::Mutex;

/// One `apply_group` call seen by the `MockApplier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedGroup {
    pub component: String,
    pub version: String,
    pub action: Action,
    pub group: ResourceGroup,
}

/// Records every applied group instead of touching the host.
///
/// `fail_on` makes the next applies for one component fail, which is how
/// engine tests inject resource-application errors.
#[derive(Default)]
pub struct MockApplier {
    applied: Mutex<Vec<AppliedGroup>>,
    fail_on: Mutex<Option<(String, Action)>>,
}

impl MockApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, component: &str, action: Action) {
        if let Ok(mut fail) = self.fail_on.lock() {
            *fail = Some((component.to_owned(), action));
        }
    }

    pub fn clear_failure(&self) {
        if let Ok(mut fail) = self.fail_on.lock() {
            *fail = None;
        }
    }

    pub fn applied(&self) -> Vec<AppliedGroup> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// `(action, component, version)` per applied group, in call order.
    pub fn calls(&self) -> Vec<(Action, String, String)> {
        self.applied()
            .into_iter()
            .map(|a| (a.action, a.component, a.version))
            .collect()
    }

    pub fn reset(&self) {
        if let Ok(mut applied) = self.applied.lock() {
            applied.clear();
        }
    }
}

impl ResourceApplier for MockApplier {
    fn apply_group(
        &self,
        _repo: &dyn RepositoryReader,
        req: &ApplyRequest<'_>,
        group: &ResourceGroup,
    ) -> Result<(), RuntimeError> {
        let failing = self
            .fail_on
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .as_ref()
            .is_some_and(|(component, action)| component == req.component && *action == req.action);
        if failing {
            return Err(RuntimeError::ExecFailed(format!(
                "injected {} failure for {}",
                req.action, req.component
            )));
        }

        let mut applied = self
            .applied
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        applied.push(AppliedGroup {
            component: req.component.to_owned(),
            version: req.version.to_owned(),
            action: req.action,
            group: group.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeagent_remote::DirectoryRepository;
    use nodeagent_schema::{NodeMetadata, ScriptOp};

    fn metadata() -> NodeMetadata {
        NodeMetadata::from_json(
            br#"{"name":"n","cluster_url":"u","cluster_ca":"c","pool_version":"1.30","repo_uri":"r"}"#,
        )
        .unwrap()
    }

    #[test]
    fn records_groups_in_order() {
        let mock = MockApplier::new();
        let meta = metadata();
        let repo = DirectoryRepository::new("/nonexistent");
        let group = ResourceGroup {
            scripts: vec![ScriptOp { cmd: "true".to_owned() }],
            ..Default::default()
        };
        for (component, action) in [("cni", Action::Uninstall), ("kubelet", Action::Install)] {
            let req = ApplyRequest {
                component,
                version: "1.30",
                metadata: &meta,
                action,
            };
            mock.apply_groups(&repo, &req, &[group.clone(), ResourceGroup::default()])
                .unwrap();
        }
        let calls = mock.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], (Action::Uninstall, "cni".to_owned(), "1.30".to_owned()));
        assert_eq!(calls[3].1, "kubelet");
        assert_eq!(mock.applied()[0].group, group);
    }

    #[test]
    fn injected_failure_only_hits_matching_action() {
        let mock = MockApplier::new();
        mock.fail_on("kubelet", Action::Install);
        let meta = metadata();
        let repo = DirectoryRepository::new("/nonexistent");
        let mut req = ApplyRequest {
            component: "kubelet",
            version: "1.30",
            metadata: &meta,
            action: Action::Uninstall,
        };
        mock.apply_group(&repo, &req, &ResourceGroup::default()).unwrap();
        req.action = Action::Install;
        assert!(mock.apply_group(&repo, &req, &ResourceGroup::default()).is_err());
        mock.clear_failure();
        mock.apply_group(&repo, &req, &ResourceGroup::default()).unwrap();
        assert_eq!(mock.applied().len(), 2);
    }
}
