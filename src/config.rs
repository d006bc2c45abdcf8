use crate::eventlog::DEFAULT_MAX_LOG_ENTRIES;
use crate::liveness::{LivenessChecker, ProcFsChecker, SignalProbeChecker};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Web UI server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Forwarder process settings
    #[serde(default)]
    pub forwarder: ForwarderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// HTTP port for the web UI (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

/// How the liveness sweep probes tracked pids
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LivenessProbe {
    /// Check for the per-process directory under `proc_root`
    #[default]
    Procfs,
    /// Send signal 0
    Signal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForwarderConfig {
    /// Forwarding executable, resolved on PATH (default: socat)
    #[serde(default = "default_program")]
    pub program: String,

    /// Extra options placed before the listen and target specs. The program
    /// always receives exactly those two specs as its final arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Maximum number of event log entries kept (default: 100)
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,

    /// Seconds to wait for exit after SIGTERM before SIGKILL, 0 waits forever (default: 5)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Stop all tracked forwards when the server shuts down (default: true)
    #[serde(default = "default_true")]
    pub stop_on_shutdown: bool,

    /// Liveness probe used by the sweep (default: procfs)
    #[serde(default)]
    pub liveness: LivenessProbe,

    /// Root of the process filesystem (default: /proc)
    #[serde(default = "default_proc_root")]
    pub proc_root: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            max_log_entries: default_max_log_entries(),
            stop_timeout_secs: default_stop_timeout(),
            stop_on_shutdown: true,
            liveness: LivenessProbe::default(),
            proc_root: default_proc_root(),
        }
    }
}

impl ForwarderConfig {
    /// Forwarder running `program` with no extra arguments
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Bounded wait after SIGTERM, `None` when unbounded
    pub fn stop_timeout(&self) -> Option<Duration> {
        (self.stop_timeout_secs > 0).then(|| Duration::from_secs(self.stop_timeout_secs))
    }

    /// Build the configured liveness probe
    pub fn liveness_checker(&self) -> Arc<dyn LivenessChecker> {
        match self.liveness {
            LivenessProbe::Procfs => Arc::new(ProcFsChecker::new(&self.proc_root)),
            LivenessProbe::Signal => Arc::new(SignalProbeChecker),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_program() -> String {
    "socat".to_string()
}

fn default_max_log_entries() -> usize {
    DEFAULT_MAX_LOG_ENTRIES
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_proc_root() -> String {
    "/proc".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server: 'port' must be greater than 0".to_string());
        }
        if self.forwarder.program.trim().is_empty() {
            errors.push("forwarder: 'program' must not be empty".to_string());
        }
        if self.forwarder.max_log_entries == 0 {
            errors.push("forwarder: 'max_log_entries' must be at least 1".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [server]
            bind = "127.0.0.1"
            port = 9090

            [forwarder]
            program = "/usr/bin/socat"
            args = ["-d", "-d"]
            max_log_entries = 20
            stop_timeout_secs = 0
            stop_on_shutdown = false
            liveness = "signal"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.forwarder.program, "/usr/bin/socat");
        assert_eq!(config.forwarder.args, vec!["-d", "-d"]);
        assert_eq!(config.forwarder.max_log_entries, 20);
        assert_eq!(config.forwarder.stop_timeout(), None);
        assert!(!config.forwarder.stop_on_shutdown);
        assert_eq!(config.forwarder.liveness, LivenessProbe::Signal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.forwarder.program, "socat");
        assert!(config.forwarder.args.is_empty());
        assert_eq!(config.forwarder.max_log_entries, 100);
        assert_eq!(config.forwarder.stop_timeout(), Some(Duration::from_secs(5)));
        assert!(config.forwarder.stop_on_shutdown);
        assert_eq!(config.forwarder.liveness, LivenessProbe::Procfs);
        assert_eq!(config.forwarder.proc_root, "/proc");
    }

    #[test]
    fn test_validate_collects_errors() {
        let toml = r#"
            [server]
            port = 0

            [forwarder]
            program = " "
            max_log_entries = 0
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("'port' must be greater than 0"));
        assert!(err.contains("'program' must not be empty"));
        assert!(err.contains("'max_log_entries' must be at least 1"));
    }

    #[test]
    fn test_unknown_liveness_probe_rejected() {
        let result: Result<Config, _> = toml::from_str("[forwarder]\nliveness = \"ptrace\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8181").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8181);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[forwarder]\nmax_log_entries = 0").unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_forwarder_builder() {
        let forwarder = ForwarderConfig::with_program("sh")
            .with_args(vec!["-c".to_string(), "exec sleep 30".to_string()]);
        assert_eq!(forwarder.program, "sh");
        assert_eq!(forwarder.args.len(), 2);
        assert_eq!(forwarder.max_log_entries, 100);
    }
}
