//! Container and network lifecycle management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{resolve, split_options, ActionConfig, ContextConfig, BINARY_MOUNT_POINT};
use crate::environment;
use crate::error::{Result, RunnerError};

use super::runtime::ContainerRuntime;
use super::session::{ContainerHandle, ContainerRole, NetworkHandle, Session};

/// User the main container runs as
const CONTAINER_USER: &str = "1000:1000";

/// Default grace period for `stop`
pub const DEFAULT_STOP_GRACE_SECONDS: u64 = 1;

/// Starts and stops the containers and network of a session
pub struct ContainerManager {
    /// Container runtime
    runtime: Arc<dyn ContainerRuntime>,

    /// Acquired executable, mounted read-only into the main container
    binary_path: Option<PathBuf>,

    /// Host working directory, mounted onto itself
    workdir: PathBuf,
}

impl ContainerManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        binary_path: Option<PathBuf>,
        workdir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            binary_path,
            workdir,
        }
    }

    /// Start the main container, or do nothing when no image resolves
    pub async fn start_main_container(
        &self,
        session: &mut Session,
        action: &ActionConfig,
        context: &ContextConfig,
    ) -> Result<Option<ContainerHandle>> {
        let image = match resolve(action.docker_image.as_deref(), context.docker_image.as_deref()) {
            Some(image) => image,
            None => return Ok(None),
        };
        let options = split_options(resolve(
            action.docker_options.as_deref(),
            context.docker_options.as_deref(),
        ));

        let binary_dir = self.binary_dir()?;
        let container_id = generate_name("dockside");
        let workdir = self.workdir.display().to_string();

        info!(
            image = %image,
            container_id = %container_id,
            "Starting image {} as container {}",
            image,
            container_id
        );

        let mut args = vec![
            "--tty".to_string(),
            "--detach".to_string(),
            "--rm".to_string(),
            "--user".to_string(),
            CONTAINER_USER.to_string(),
            "--volume".to_string(),
            format!("{}:{}", workdir, workdir),
            "--volume".to_string(),
            format!("{}:{}:ro", binary_dir.display(), BINARY_MOUNT_POINT),
            "--workdir".to_string(),
            workdir,
        ];
        args.extend(options);
        args.push("--name".to_string());
        args.push(container_id.clone());
        args.extend(environment::main_container_flags(&context.docker_env));

        // Keep the container alive; operations run through `exec`
        args.push(image.to_string());
        args.push("sleep".to_string());
        args.push("infinity".to_string());

        self.runtime.run_container(args).await?;

        let handle = ContainerHandle {
            id: container_id,
            role: ContainerRole::Main,
        };
        session.record_container(handle.clone());

        Ok(Some(handle))
    }

    /// Start the sidecar container, attached to the session network if any
    pub async fn start_sidecar_container(
        &self,
        session: &mut Session,
        action: &ActionConfig,
        context: &ContextConfig,
        sidecar_image: Option<&str>,
    ) -> Result<Option<ContainerHandle>> {
        let image = match resolve(
            sidecar_image,
            resolve(action.sidecar_image.as_deref(), context.sidecar_image.as_deref()),
        ) {
            Some(image) => image,
            None => return Ok(None),
        };
        let options = split_options(resolve(
            action.sidecar_options.as_deref(),
            context.sidecar_options.as_deref(),
        ));
        let alias = resolve(context.network_alias.as_deref(), None);

        if alias.is_some() && session.network().is_none() {
            return Err(RunnerError::configuration(
                "A network alias was configured for the sidecar but no network exists",
            ));
        }

        let container_id = generate_name("dockside-sidecar");

        info!(
            image = %image,
            container_id = %container_id,
            "Starting sidecar image {} as container {}",
            image,
            container_id
        );

        let mut args = vec!["--detach".to_string(), "--rm".to_string()];
        args.extend(options);
        args.push("--name".to_string());
        args.push(container_id.clone());

        if let Some(network) = session.network() {
            args.push("--network".to_string());
            args.push(network.id.clone());
            if let Some(alias) = alias {
                args.push("--network-alias".to_string());
                args.push(alias.to_string());
            }
        }

        args.extend(environment::sidecar_container_flags(&context.sidecar_env));
        args.push(image.to_string());

        self.runtime.run_container(args).await?;

        let handle = ContainerHandle {
            id: container_id,
            role: ContainerRole::Sidecar,
        };
        session.record_container(handle.clone());

        Ok(Some(handle))
    }

    /// Create the private network shared by the main and sidecar containers
    pub async fn create_network(&self, session: &mut Session) -> Result<Option<NetworkHandle>> {
        let name = generate_name("dockside-net");

        // Anything reported back means this call did not create the network
        match self.runtime.create_network(&name).await? {
            None => {
                info!(network = %name, "Network created");
                let handle = NetworkHandle { id: name };
                session.record_network(handle.clone());
                Ok(Some(handle))
            }
            Some(report) => {
                debug!(network = %name, report = %report, "Network not recorded");
                Ok(None)
            }
        }
    }

    pub async fn remove_network(&self, handle: Option<&NetworkHandle>) -> Result<()> {
        let handle = match handle {
            Some(handle) => handle,
            None => {
                debug!("No network to remove");
                return Ok(());
            }
        };

        if let Some(report) = self.runtime.remove_network(&handle.id).await? {
            debug!(network = %handle.id, report = %report, "Network removal reported");
        }

        info!(network = %handle.id, "Network removed");
        Ok(())
    }

    pub async fn stop_container(&self, id: &str, grace_seconds: u64) -> Result<()> {
        if id.is_empty() {
            debug!("No container to stop");
            return Ok(());
        }

        self.runtime.stop_container(id, grace_seconds).await?;
        info!(container_id = %id, "Container stopped");
        Ok(())
    }

    /// Directory of the binary, made absolute against the working directory
    fn binary_dir(&self) -> Result<PathBuf> {
        let binary = self.binary_path.as_ref().ok_or_else(|| {
            RunnerError::configuration("Binary path must be resolved before starting a container")
        })?;

        let dir = binary
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        if dir.is_relative() {
            Ok(self.workdir.join(dir))
        } else {
            Ok(dir.to_path_buf())
        }
    }
}

fn generate_name(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::runtime::MockContainerRuntime;
    use crate::testing::capture_logs;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn manager(runtime: MockContainerRuntime) -> ContainerManager {
        ContainerManager::new(
            Arc::new(runtime),
            Some(PathBuf::from("/tools/bin/scanner")),
            PathBuf::from("/work/repo"),
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[tokio::test]
    async fn test_empty_image_is_noop() {
        let (logs, _guard) = capture_logs();
        let runtime = MockContainerRuntime::new();
        let manager = manager(runtime);
        let mut session = Session::new();

        let action = ActionConfig {
            docker_image: Some(String::new()),
            ..Default::default()
        };
        let handle = manager
            .start_main_container(&mut session, &action, &ContextConfig::default())
            .await
            .unwrap();

        assert!(handle.is_none());
        assert!(session.is_empty());
        assert!(!logs.contents().contains("Starting image"));
    }

    #[tokio::test]
    async fn test_start_main_container() {
        let (logs, _guard) = capture_logs();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_run_container().times(2).returning(move |args| {
            captured.lock().unwrap().push(args);
            Ok("ok".to_string())
        });
        let manager = manager(runtime);

        let action = ActionConfig {
            docker_image: Some("image1:123".to_string()),
            ..Default::default()
        };

        let mut session = Session::new();
        let first = manager
            .start_main_container(&mut session, &action, &ContextConfig::default())
            .await
            .unwrap()
            .unwrap();
        let mut other = Session::new();
        let second = manager
            .start_main_container(&mut other, &action, &ContextConfig::default())
            .await
            .unwrap()
            .unwrap();

        assert!(logs.contents().contains("Starting image image1:123 as container"));
        assert_eq!(session.main(), Some(&first));
        assert_ne!(first.id, second.id);

        let calls = seen.lock().unwrap();
        let args = &calls[0];
        assert_eq!(
            &args[..11],
            &[
                "--tty",
                "--detach",
                "--rm",
                "--user",
                "1000:1000",
                "--volume",
                "/work/repo:/work/repo",
                "--volume",
                "/tools/bin:/opt/dockside/bin:ro",
                "--workdir",
                "/work/repo",
            ]
        );
        assert_eq!(value_after(args, "--name"), Some(first.id.as_str()));
        assert!(!first.id.is_empty());
        assert_eq!(&args[args.len() - 3..], &["image1:123", "sleep", "infinity"]);
        assert_eq!(value_after(&calls[1], "--name"), Some(second.id.as_str()));

        other.clear();
        session.clear();
    }

    #[tokio::test]
    async fn test_explicit_options_override_context() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_run_container()
            .withf(|args| {
                args.contains(&"--cpus".to_string())
                    && !args.contains(&"--privileged".to_string())
                    && args.contains(&"explicit:1".to_string())
                    && !args.contains(&"context:1".to_string())
            })
            .times(1)
            .returning(|_| Ok(String::new()));
        let manager = manager(runtime);

        let action = ActionConfig {
            docker_image: Some("explicit:1".to_string()),
            docker_options: Some("--cpus 2".to_string()),
            ..Default::default()
        };
        let context = ContextConfig {
            docker_image: Some("context:1".to_string()),
            docker_options: Some("--privileged".to_string()),
            ..Default::default()
        };

        let mut session = Session::new();
        manager
            .start_main_container(&mut session, &action, &context)
            .await
            .unwrap();
        session.clear();
    }

    #[tokio::test]
    async fn test_context_env_injected_by_value() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_run_container()
            .withf(|args| {
                let pos = args.iter().position(|a| a == "MODE=ci").unwrap_or(0);
                pos > 0 && args[pos - 1] == "--env" && args.contains(&"GITHUB_SHA".to_string())
            })
            .times(1)
            .returning(|_| Ok(String::new()));
        let manager = manager(runtime);

        let mut context = ContextConfig {
            docker_image: Some("context:1".to_string()),
            ..Default::default()
        };
        context.docker_env.insert("MODE".to_string(), "ci".to_string());

        let mut session = Session::new();
        manager
            .start_main_container(&mut session, &ActionConfig::default(), &context)
            .await
            .unwrap();
        session.clear();
    }

    #[tokio::test]
    async fn test_main_requires_binary_path() {
        let runtime = MockContainerRuntime::new();
        let manager = ContainerManager::new(Arc::new(runtime), None, PathBuf::from("/work"));

        let action = ActionConfig {
            docker_image: Some("image1:123".to_string()),
            ..Default::default()
        };
        let mut session = Session::new();
        let err = manager
            .start_main_container(&mut session, &action, &ContextConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Configuration(_)));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_relative_binary_dir() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_run_container()
            .withf(|args| args.contains(&"/work/./bin:/opt/dockside/bin:ro".to_string()))
            .times(1)
            .returning(|_| Ok(String::new()));
        let manager = ContainerManager::new(
            Arc::new(runtime),
            Some(PathBuf::from("./bin/tool")),
            PathBuf::from("/work"),
        );

        let action = ActionConfig {
            docker_image: Some("image1:123".to_string()),
            ..Default::default()
        };
        let mut session = Session::new();
        manager
            .start_main_container(&mut session, &action, &ContextConfig::default())
            .await
            .unwrap();
        session.clear();
    }

    #[tokio::test]
    async fn test_sidecar_joins_network_with_alias() {
        let mut seq = Sequence::new();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_create_network()
            .withf(|name| name.starts_with("dockside-net-"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        runtime
            .expect_run_container()
            .withf(|args| {
                args[..2] == ["--detach".to_string(), "--rm".to_string()]
                    && value_after(args, "--network")
                        .map(|n| n.starts_with("dockside-net-"))
                        .unwrap_or(false)
                    && value_after(args, "--network-alias") == Some("db")
                    && args.last().map(String::as_str) == Some("postgres:16")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::new()));
        let manager = manager(runtime);

        let context = ContextConfig {
            sidecar_image: Some("redis:7".to_string()),
            network_alias: Some("db".to_string()),
            ..Default::default()
        };

        let mut session = Session::new();
        let network = manager.create_network(&mut session).await.unwrap().unwrap();
        let sidecar = manager
            .start_sidecar_container(&mut session, &ActionConfig::default(), &context, Some("postgres:16"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.network(), Some(&network));
        assert_eq!(session.sidecar(), Some(&sidecar));
        assert_eq!(sidecar.role, ContainerRole::Sidecar);
        session.clear();
    }

    #[tokio::test]
    async fn test_sidecar_alias_requires_network() {
        let runtime = MockContainerRuntime::new();
        let manager = manager(runtime);

        let context = ContextConfig {
            sidecar_image: Some("redis:7".to_string()),
            network_alias: Some("cache".to_string()),
            ..Default::default()
        };

        let mut session = Session::new();
        let err = manager
            .start_sidecar_container(&mut session, &ActionConfig::default(), &context, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_sidecar_without_network_has_no_network_flags() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_run_container()
            .withf(|args| !args.contains(&"--network".to_string()))
            .times(1)
            .returning(|_| Ok(String::new()));
        let manager = manager(runtime);

        let action = ActionConfig {
            sidecar_image: Some("redis:7".to_string()),
            ..Default::default()
        };
        let mut session = Session::new();
        manager
            .start_sidecar_container(&mut session, &action, &ContextConfig::default(), None)
            .await
            .unwrap();
        assert!(session.sidecar().is_some());
        session.clear();
    }

    #[tokio::test]
    async fn test_network_report_not_recorded() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_create_network()
            .times(1)
            .returning(|_| Ok(Some("already exists".to_string())));
        let manager = manager(runtime);

        let mut session = Session::new();
        let handle = manager.create_network(&mut session).await.unwrap();
        assert!(handle.is_none());
        assert!(session.network().is_none());
    }

    #[tokio::test]
    async fn test_remove_network_without_handle() {
        let (logs, _guard) = capture_logs();
        let runtime = MockContainerRuntime::new();
        let manager = manager(runtime);

        manager.remove_network(None).await.unwrap();
        assert!(logs.contents().contains("No network to remove"));
    }

    #[tokio::test]
    async fn test_remove_network_report_is_not_an_error() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_remove_network()
            .withf(|id| id == "net-1")
            .times(1)
            .returning(|_| Ok(Some("warning: endpoints still attached".to_string())));
        let manager = manager(runtime);

        let handle = NetworkHandle { id: "net-1".to_string() };
        manager.remove_network(Some(&handle)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_empty_id_is_noop() {
        let (logs, _guard) = capture_logs();
        let runtime = MockContainerRuntime::new();
        let manager = manager(runtime);

        manager.stop_container("", DEFAULT_STOP_GRACE_SECONDS).await.unwrap();

        let contents = logs.contents();
        assert!(contents.contains("DEBUG"));
        assert!(contents.contains("No container to stop"));
    }

    #[tokio::test]
    async fn test_stop_passes_grace() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_stop_container()
            .withf(|id, grace| id == "c-1" && *grace == 5)
            .times(1)
            .returning(|_, _| Ok(()));
        let manager = manager(runtime);

        manager.stop_container("c-1", 5).await.unwrap();
    }
}
