use crate::ownership::Accounts;
use crate::service::{ServiceManager, Systemctl};
use crate::template::TemplateContext;
use crate::{ApplyRequest, ResourceApplier, RuntimeError};
use nodeagent_remote::RepositoryReader;
use nodeagent_schema::{FileMode, FileOp, FileSpec, ResourceGroup, ScriptOp, ServiceOp, ServiceState};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Applies resource groups to the running host.
pub struct HostApplier {
    shell: PathBuf,
    services: Arc<dyn ServiceManager>,
    accounts: Accounts,
}

impl HostApplier {
    pub fn new(shell: impl Into<PathBuf>, systemctl: impl Into<PathBuf>) -> Self {
        Self::with_service_manager(shell, Arc::new(Systemctl::new(systemctl)))
    }

    pub fn with_service_manager(
        shell: impl Into<PathBuf>,
        services: Arc<dyn ServiceManager>,
    ) -> Self {
        Self {
            shell: shell.into(),
            services,
            accounts: Accounts::default(),
        }
    }

    #[must_use]
    pub fn with_accounts(mut self, accounts: Accounts) -> Self {
        self.accounts = accounts;
        self
    }

    fn apply_file(
        &self,
        repo: &dyn RepositoryReader,
        req: &ApplyRequest<'_>,
        op: &FileOp,
    ) -> Result<(), RuntimeError> {
        let paths = TemplateContext::for_path(req.version);
        match op {
            FileOp::File(spec) => {
                let (src, dst) = resolve_paths(&paths, spec)?;
                let data = repo.read_file(&format!("{}/{src}", req.component))?;
                self.install_file(&dst, &data, spec)?;
                tracing::info!(component = req.component, path = %dst.display(), "file copied");
            }
            FileOp::Template(spec) => {
                let (src, dst) = resolve_paths(&paths, spec)?;
                let raw = repo.read_file(&format!("{}/{src}", req.component))?;
                let text = String::from_utf8(raw).map_err(|_| {
                    RuntimeError::Template(format!("{}/{src} is not UTF-8", req.component))
                })?;
                let rendered = TemplateContext::for_file(req.version, req.metadata).render(&text)?;
                self.install_file(&dst, rendered.as_bytes(), spec)?;
                tracing::info!(component = req.component, path = %dst.display(), "template rendered");
            }
            FileOp::Directory {
                dst,
                mode,
                owner,
                group,
            } => {
                let dst = PathBuf::from(paths.render(dst)?);
                ensure_directory(&dst, *mode)?;
                self.accounts.chown(&dst, owner, group)?;
                tracing::info!(component = req.component, path = %dst.display(), "directory ensured");
            }
            FileOp::Absent { dst } => {
                let dst = PathBuf::from(paths.render(dst)?);
                remove_path(&dst)?;
                tracing::info!(component = req.component, path = %dst.display(), "path removed");
            }
        }
        Ok(())
    }

    /// Atomically replace `dst` with `data`, then apply mode and ownership.
    fn install_file(&self, dst: &Path, data: &[u8], spec: &FileSpec) -> Result<(), RuntimeError> {
        let file_err = |op: &'static str| {
            let path = dst.display().to_string();
            move |source| RuntimeError::File { op, path, source }
        };
        let dir = match dst.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(file_err("create"))?;
        tmp.write_all(data).map_err(file_err("write"))?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(spec.mode.bits()))
            .map_err(file_err("chmod"))?;
        tmp.as_file().sync_all().map_err(file_err("sync"))?;
        tmp.persist(dst).map_err(|e| RuntimeError::File {
            op: "rename",
            path: dst.display().to_string(),
            source: e.error,
        })?;
        self.accounts.chown(dst, &spec.owner, &spec.group)
    }

    fn apply_service(&self, req: &ApplyRequest<'_>, svc: &ServiceOp) -> Result<(), RuntimeError> {
        let unit = svc.name.as_str();
        if svc.enabled {
            self.services.enable(unit)?;
            tracing::info!(component = req.component, unit, "service enabled");
        } else {
            match self.services.disable(unit) {
                Ok(()) => tracing::info!(component = req.component, unit, "service disabled"),
                Err(RuntimeError::UnitNotFound(_)) => {
                    tracing::debug!(component = req.component, unit, "unit absent, nothing to disable");
                }
                Err(e) => return Err(e),
            }
        }

        match svc.state {
            ServiceState::Started => {
                self.services.start(unit)?;
                tracing::info!(component = req.component, unit, "service started");
            }
            ServiceState::Stopped => match self.services.stop(unit) {
                Ok(()) => tracing::info!(component = req.component, unit, "service stopped"),
                Err(RuntimeError::UnitNotFound(_)) => {
                    tracing::debug!(component = req.component, unit, "unit absent, nothing to stop");
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }

    fn run_script(&self, req: &ApplyRequest<'_>, script: &ScriptOp) -> Result<(), RuntimeError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&script.cmd)
            .output()
            .map_err(|e| RuntimeError::Script {
                cmd: script.cmd.clone(),
                detail: format!("cannot run {}: {e}", self.shell.display()),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::Script {
                cmd: script.cmd.clone(),
                detail: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        tracing::info!(component = req.component, cmd = %script.cmd, "script executed");
        Ok(())
    }
}

impl ResourceApplier for HostApplier {
    fn apply_group(
        &self,
        repo: &dyn RepositoryReader,
        req: &ApplyRequest<'_>,
        group: &ResourceGroup,
    ) -> Result<(), RuntimeError> {
        for op in &group.files {
            self.apply_file(repo, req, op)?;
        }
        if !group.services.is_empty() {
            self.services.daemon_reload()?;
            for svc in &group.services {
                self.apply_service(req, svc)?;
            }
        }
        for script in &group.scripts {
            self.run_script(req, script)?;
        }
        Ok(())
    }
}

/// Template `src` and `dst`; a `dst` ending in `/` receives the source's base
/// name.
fn resolve_paths(ctx: &TemplateContext, spec: &FileSpec) -> Result<(String, PathBuf), RuntimeError> {
    let src = ctx.render(&spec.src)?;
    let dst = ctx.render(&spec.dst)?;
    let dst = if dst.ends_with('/') {
        let base = Path::new(&src)
            .file_name()
            .ok_or_else(|| RuntimeError::Template(format!("source '{src}' has no file name")))?;
        Path::new(&dst).join(base)
    } else {
        PathBuf::from(dst)
    };
    Ok((src, dst))
}

fn ensure_directory(dst: &Path, mode: FileMode) -> Result<(), RuntimeError> {
    match fs::create_dir(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists && dst.is_dir() => {}
        Err(source) => {
            return Err(RuntimeError::File {
                op: "mkdir",
                path: dst.display().to_string(),
                source,
            })
        }
    }
    fs::set_permissions(dst, fs::Permissions::from_mode(mode.bits())).map_err(|source| {
        RuntimeError::File {
            op: "chmod",
            path: dst.display().to_string(),
            source,
        }
    })
}

fn remove_path(dst: &Path) -> Result<(), RuntimeError> {
    let result = match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dst),
        Ok(_) => fs::remove_file(dst),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RuntimeError::File {
            op: "remove",
            path: dst.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Action;
    use nodeagent_remote::DirectoryRepository;
    use nodeagent_schema::NodeMetadata;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingServices {
        calls: Mutex<Vec<String>>,
        missing: Vec<String>,
    }

    impl RecordingServices {
        fn record(&self, action: &str, unit: &str) -> Result<(), RuntimeError> {
            self.calls.lock().unwrap().push(format!("{action} {unit}").trim().to_owned());
            if self.missing.iter().any(|m| m == unit) && matches!(action, "disable" | "stop") {
                return Err(RuntimeError::UnitNotFound(unit.to_owned()));
            }
            if self.missing.iter().any(|m| m == unit) {
                return Err(RuntimeError::Service {
                    action: action.to_owned(),
                    unit: unit.to_owned(),
                    detail: "no such unit".to_owned(),
                });
            }
            Ok(())
        }
    }

    impl ServiceManager for RecordingServices {
        fn daemon_reload(&self) -> Result<(), RuntimeError> {
            self.record("daemon-reload", "")
        }
        fn enable(&self, unit: &str) -> Result<(), RuntimeError> {
            self.record("enable", unit)
        }
        fn disable(&self, unit: &str) -> Result<(), RuntimeError> {
            self.record("disable", unit)
        }
        fn start(&self, unit: &str) -> Result<(), RuntimeError> {
            self.record("start", unit)
        }
        fn stop(&self, unit: &str) -> Result<(), RuntimeError> {
            self.record("stop", unit)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: DirectoryRepository,
        root: PathBuf,
        metadata: NodeMetadata,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("repo");
        fs::create_dir_all(repo_dir.join("kubelet")).unwrap();
        fs::write(
            repo_dir.join("kubelet").join(format!("kubelet-1.30-{}", crate::go_arch())),
            "BINARY",
        )
        .unwrap();
        fs::write(
            repo_dir.join("kubelet/kubelet.conf"),
            "node: {{ .Name }} version: {{ .Version }}\n",
        )
        .unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let metadata = NodeMetadata::from_json(
            br#"{"name":"node-1","cluster_url":"u","cluster_ca":"c","pool_version":"1.30","repo_uri":"r"}"#,
        )
        .unwrap();
        Fixture {
            repo: DirectoryRepository::new(&repo_dir),
            _dir: dir,
            root,
            metadata,
        }
    }

    fn request<'a>(fx: &'a Fixture, version: &'a str) -> ApplyRequest<'a> {
        ApplyRequest {
            component: "kubelet",
            version,
            metadata: &fx.metadata,
            action: Action::Install,
        }
    }

    fn file_spec(src: &str, dst: &Path, mode: u32) -> FileSpec {
        FileSpec {
            src: src.to_owned(),
            dst: dst.display().to_string(),
            mode: FileMode::new(mode),
            owner: String::new(),
            group: String::new(),
        }
    }

    fn applier(services: Arc<RecordingServices>) -> HostApplier {
        HostApplier::with_service_manager("/bin/sh", services)
    }

    #[test]
    fn copies_templated_source_into_directory_destination() {
        let fx = fixture();
        let group = ResourceGroup {
            files: vec![FileOp::File(file_spec(
                "kubelet-{{ .Version }}-{{ .Arch }}",
                &fx.root.join("bin/"),
                0o755,
            ))],
            ..Default::default()
        };
        fs::create_dir_all(fx.root.join("bin")).unwrap();
        let services = Arc::new(RecordingServices::default());
        applier(services.clone())
            .apply_group(&fx.repo, &request(&fx, "1.30~2"), &group)
            .unwrap();

        let installed = fx.root.join("bin").join(format!("kubelet-1.30-{}", crate::go_arch()));
        assert_eq!(fs::read_to_string(&installed).unwrap(), "BINARY");
        let mode = fs::metadata(&installed).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
        assert!(services.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn renders_template_with_node_fields() {
        let fx = fixture();
        let dst = fx.root.join("kubelet.conf");
        let group = ResourceGroup {
            files: vec![FileOp::Template(file_spec("kubelet.conf", &dst, 0o644))],
            ..Default::default()
        };
        applier(Arc::default())
            .apply_group(&fx.repo, &request(&fx, "1.30~2"), &group)
            .unwrap();
        assert_eq!(
            fs::read_to_string(&dst).unwrap(),
            "node: node-1 version: 1.30\n"
        );
    }

    #[test]
    fn directory_is_created_then_converged() {
        let fx = fixture();
        let dst = fx.root.join("etc-kube");
        let op = |mode| FileOp::Directory {
            dst: dst.display().to_string(),
            mode: FileMode::new(mode),
            owner: String::new(),
            group: String::new(),
        };
        let host = applier(Arc::default());
        let req = request(&fx, "1.30");

        host.apply_group(&fx.repo, &req, &ResourceGroup { files: vec![op(0o755)], ..Default::default() })
            .unwrap();
        host.apply_group(&fx.repo, &req, &ResourceGroup { files: vec![op(0o700)], ..Default::default() })
            .unwrap();
        let mode = fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o700);
    }

    #[test]
    fn absent_removes_trees_and_ignores_missing() {
        let fx = fixture();
        let tree = fx.root.join("old");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("nested/file"), "x").unwrap();
        let group = ResourceGroup {
            files: vec![
                FileOp::Absent { dst: tree.display().to_string() },
                FileOp::Absent { dst: fx.root.join("never-existed").display().to_string() },
            ],
            ..Default::default()
        };
        applier(Arc::default())
            .apply_group(&fx.repo, &request(&fx, "1.30"), &group)
            .unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn services_reload_once_then_apply_in_order() {
        let fx = fixture();
        let group = ResourceGroup {
            services: vec![
                ServiceOp { name: "kubelet".to_owned(), state: ServiceState::Started, enabled: true },
                ServiceOp { name: "old-proxy".to_owned(), state: ServiceState::Stopped, enabled: false },
            ],
            ..Default::default()
        };
        let services = Arc::new(RecordingServices::default());
        applier(services.clone())
            .apply_group(&fx.repo, &request(&fx, "1.30"), &group)
            .unwrap();
        assert_eq!(
            *services.calls.lock().unwrap(),
            vec![
                "daemon-reload",
                "enable kubelet",
                "start kubelet",
                "disable old-proxy",
                "stop old-proxy"
            ]
        );
    }

    #[test]
    fn missing_unit_on_disable_and_stop_is_success() {
        let fx = fixture();
        let group = ResourceGroup {
            services: vec![ServiceOp {
                name: "ghost".to_owned(),
                state: ServiceState::Stopped,
                enabled: false,
            }],
            ..Default::default()
        };
        let services = Arc::new(RecordingServices {
            missing: vec!["ghost".to_owned()],
            ..Default::default()
        });
        applier(services)
            .apply_group(&fx.repo, &request(&fx, "1.30"), &group)
            .unwrap();
    }

    #[test]
    fn missing_unit_on_start_fails() {
        let fx = fixture();
        let group = ResourceGroup {
            services: vec![ServiceOp {
                name: "ghost".to_owned(),
                state: ServiceState::Started,
                enabled: false,
            }],
            ..Default::default()
        };
        let services = Arc::new(RecordingServices {
            missing: vec!["ghost".to_owned()],
            ..Default::default()
        });
        assert!(applier(services)
            .apply_group(&fx.repo, &request(&fx, "1.30"), &group)
            .is_err());
    }

    #[test]
    fn scripts_run_after_files_and_fail_on_nonzero_exit() {
        let fx = fixture();
        let marker = fx.root.join("marker");
        let group = ResourceGroup {
            files: vec![FileOp::Directory {
                dst: fx.root.join("d").display().to_string(),
                mode: FileMode::new(0o755),
                owner: String::new(),
                group: String::new(),
            }],
            scripts: vec![ScriptOp {
                cmd: format!("test -d {} && touch {}", fx.root.join("d").display(), marker.display()),
            }],
            ..Default::default()
        };
        let host = applier(Arc::default());
        host.apply_group(&fx.repo, &request(&fx, "1.30"), &group).unwrap();
        assert!(marker.exists());

        let failing = ResourceGroup {
            scripts: vec![ScriptOp { cmd: "exit 3".to_owned() }],
            ..Default::default()
        };
        let err = host
            .apply_group(&fx.repo, &request(&fx, "1.30"), &failing)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Script { .. }));
    }

    #[test]
    fn missing_source_aborts_group() {
        let fx = fixture();
        let marker = fx.root.join("marker");
        let group = ResourceGroup {
            files: vec![FileOp::File(file_spec("nope", &fx.root.join("x"), 0o644))],
            scripts: vec![ScriptOp { cmd: format!("touch {}", marker.display()) }],
            ..Default::default()
        };
        let err = applier(Arc::default())
            .apply_group(&fx.repo, &request(&fx, "1.30"), &group)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Repository(_)));
        assert!(!marker.exists());
    }
}
