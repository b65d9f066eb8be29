// ABOUTME: Test support utilities.
// ABOUTME: Temp-dir fixtures, a scripted supervisor, and a tiny HTTP status server.

use async_trait::async_trait;
use parking_lot::Mutex;
use rollout::config::ProxyConfig;
use rollout::deploy::{DeploymentTarget, HealthCheck, Orchestrator, ProbeTarget, ServiceSpec};
use rollout::exec::{CommandRunner, CommandSpec, SystemRunner};
use rollout::proxy::{NginxProxy, Proxy};
use rollout::supervisor::{Supervisor, SupervisorError, SupervisorState};
use rollout::types::{Argv, TargetName};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("rollout=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// `sh -c <script>`.
#[allow(dead_code)]
pub fn sh(script: &str) -> Argv {
    Argv::new("sh").args(["-c", script])
}

/// A throwaway project, deploy location, proxy dir, and state dir.
#[allow(dead_code)]
pub struct Fixture {
    pub dir: TempDir,
    pub source: PathBuf,
    pub deploy_path: PathBuf,
    pub conf_dir: PathBuf,
    pub state_dir: PathBuf,
    pub backup_root: PathBuf,
    pub template: PathBuf,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let source = root.join("project");
        fs::create_dir_all(&source).unwrap();

        let template = root.join("site.conf.tmpl");
        fs::write(
            &template,
            "server { server_name {{domain}}; root {{deploy_path}}; }\n",
        )
        .unwrap();

        Self {
            source,
            deploy_path: root.join("www").join("web"),
            conf_dir: root.join("conf.d"),
            state_dir: root.join("state"),
            backup_root: root.join("state").join("backups"),
            template,
            dir,
        }
    }

    /// A static target whose build writes `dist/index.html` containing `v2`.
    pub fn target(&self) -> DeploymentTarget {
        let mut proxy_variables = HashMap::new();
        proxy_variables.insert("domain".to_string(), "example.test".to_string());
        proxy_variables.insert(
            "deploy_path".to_string(),
            self.deploy_path.display().to_string(),
        );

        DeploymentTarget {
            name: TargetName::new("web").unwrap(),
            environment: "production".to_string(),
            source_path: self.source.clone(),
            install: vec![sh("true")],
            build: vec![sh("mkdir -p dist && echo v2 > dist/index.html")],
            artifact_dir: self.source.join("dist"),
            deploy_path: self.deploy_path.clone(),
            service: None,
            proxy_template: Some(self.template.clone()),
            proxy_variables,
            health: HealthCheck {
                probe: ProbeTarget::File(self.deploy_path.join("index.html")),
                retries: 1,
                interval: Duration::from_millis(10),
                timeout: Duration::from_secs(2),
                start_period: Duration::ZERO,
            },
            build_timeout: Duration::from_secs(30),
            restart_timeout: Duration::from_secs(2),
            env: HashMap::new(),
        }
    }

    pub fn service(&self) -> ServiceSpec {
        ServiceSpec {
            name: "web".to_string(),
            config: None,
            working_dir: self.deploy_path.clone(),
        }
    }

    /// Put `content` live as `index.html`, as an earlier deploy would have.
    pub fn deploy_existing(&self, content: &str) {
        fs::create_dir_all(&self.deploy_path).unwrap();
        fs::write(self.deploy_path.join("index.html"), content).unwrap();
    }

    pub fn live_index(&self) -> Option<String> {
        fs::read_to_string(self.deploy_path.join("index.html")).ok()
    }

    pub fn active_proxy_config(&self) -> Option<String> {
        fs::read_to_string(self.conf_dir.join("web.conf")).ok()
    }

    /// Number of proxy reloads recorded by the fixture proxy.
    pub fn reloads(&self) -> usize {
        fs::read_to_string(self.dir.path().join("reloads"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Unprivileged nginx stand-in: `validate` is a shell script, reload
    /// appends a line to `<dir>/reloads`.
    pub fn proxy(&self, validate: &str) -> Arc<dyn Proxy> {
        let reloads = self.dir.path().join("reloads");
        let config = ProxyConfig {
            config_dir: self.conf_dir.clone(),
            validate: sh(validate),
            reload: sh(&format!("echo reload >> '{}'", reloads.display())),
            privileged: false,
            timeout: Duration::from_secs(5),
            variables: HashMap::new(),
        };
        Arc::new(NginxProxy::new(&config, self.runner(), &self.state_dir))
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::new(SystemRunner::new(None))
    }

    pub fn orchestrator(
        &self,
        supervisor: Arc<dyn Supervisor>,
        proxy: Arc<dyn Proxy>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.runner(),
            supervisor,
            proxy,
            self.state_dir.clone(),
            self.backup_root.clone(),
        )
        .with_effective_uid(Some(1000))
    }
}

/// Supervisor double. Each `start` takes the next scripted state
/// (Running once the script runs out); `query` reports the current one.
#[allow(dead_code)]
pub struct FakeSupervisor {
    after_start: Mutex<VecDeque<SupervisorState>>,
    state: Mutex<SupervisorState>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeSupervisor {
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(after_start: Vec<SupervisorState>) -> Arc<Self> {
        Arc::new(Self {
            after_start: Mutex::new(after_start.into()),
            state: Mutex::new(SupervisorState::Running),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn query(&self, _service: &ServiceSpec) -> Result<SupervisorState, SupervisorError> {
        Ok(self.state.lock().clone())
    }

    async fn stop(&self, service: &ServiceSpec) -> Result<(), SupervisorError> {
        self.calls.lock().push(format!("stop {}", service.name));
        *self.state.lock() = SupervisorState::Stopped;
        Ok(())
    }

    async fn start(&self, service: &ServiceSpec, environment: &str) -> Result<(), SupervisorError> {
        self.calls
            .lock()
            .push(format!("start {} {environment}", service.name));
        let next = self
            .after_start
            .lock()
            .pop_front()
            .unwrap_or(SupervisorState::Running);
        *self.state.lock() = next;
        Ok(())
    }

    fn restart_commands(&self, _service: &ServiceSpec, _environment: &str) -> Vec<CommandSpec> {
        Vec::new()
    }
}

/// Serve one HTTP status per connection from `statuses`; the last repeats.
/// Returns the base URL.
#[allow(dead_code)]
pub async fn status_server(statuses: Vec<u16>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let statuses = Arc::new(Mutex::new(VecDeque::from(statuses)));

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let status = {
                let mut queue = statuses.lock();
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().copied().unwrap_or(200)
                }
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

/// Write an executable script.
#[allow(dead_code)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}
