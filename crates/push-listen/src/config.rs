use std::path::Path;
use std::time::Duration;

use push_subscriber::{BackoffPolicy, SupervisorConfig, TimingConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ListenError, ListenResult};

/// Contents of the optional YAML config file. Every field may be omitted.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub user_agent: Option<String>,
    /// Reconnect delays in seconds; the last entry repeats.
    pub backoff_secs: Option<Vec<u64>>,
    pub timing: TimingFile,
}

/// [`TimingConfig`] in whole seconds.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingFile {
    pub connect_timeout_secs: u64,
    pub tcp_keepalive_secs: u64,
    pub cleanup_delay_secs: u64,
    pub frame_check_interval_secs: u64,
    pub missed_checks_threshold: u32,
    pub watchdog_reconnect_delay_secs: u64,
    pub health_check_interval_secs: u64,
    pub network_debounce_secs: u64,
    pub token_wait_attempts: u32,
    pub token_wait_interval_secs: u64,
    pub sink_channel_capacity: usize,
}

impl Default for TimingFile {
    fn default() -> Self {
        let t = TimingConfig::default();
        Self {
            connect_timeout_secs: t.connect_timeout.as_secs(),
            tcp_keepalive_secs: t.tcp_keepalive.as_secs(),
            cleanup_delay_secs: t.cleanup_delay.as_secs(),
            frame_check_interval_secs: t.frame_check_interval.as_secs(),
            missed_checks_threshold: t.missed_checks_threshold,
            watchdog_reconnect_delay_secs: t.watchdog_reconnect_delay.as_secs(),
            health_check_interval_secs: t.health_check_interval.as_secs(),
            network_debounce_secs: t.network_debounce.as_secs(),
            token_wait_attempts: t.token_wait_attempts,
            token_wait_interval_secs: t.token_wait_interval.as_secs(),
            sink_channel_capacity: t.sink_channel_capacity,
        }
    }
}

impl From<&TimingFile> for TimingConfig {
    fn from(t: &TimingFile) -> Self {
        Self {
            connect_timeout: Duration::from_secs(t.connect_timeout_secs),
            tcp_keepalive: Duration::from_secs(t.tcp_keepalive_secs),
            cleanup_delay: Duration::from_secs(t.cleanup_delay_secs),
            frame_check_interval: Duration::from_secs(t.frame_check_interval_secs),
            missed_checks_threshold: t.missed_checks_threshold,
            watchdog_reconnect_delay: Duration::from_secs(t.watchdog_reconnect_delay_secs),
            health_check_interval: Duration::from_secs(t.health_check_interval_secs),
            network_debounce: Duration::from_secs(t.network_debounce_secs),
            token_wait_attempts: t.token_wait_attempts,
            token_wait_interval: Duration::from_secs(t.token_wait_interval_secs),
            sink_channel_capacity: t.sink_channel_capacity,
        }
    }
}

/// Values taken from the command line; these win over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub token: Option<String>,
    pub user_agent: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug)]
pub struct Settings {
    pub supervisor: SupervisorConfig,
    pub token: Option<String>,
}

/// Load a config file from YAML.
pub async fn load(path: &Path) -> ListenResult<ListenConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ListenError::Config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| ListenError::Config(format!("parse {}: {e}", path.display())))
}

impl ListenConfig {
    pub fn resolve(self, overrides: Overrides) -> ListenResult<Settings> {
        let url = overrides.url.or(self.url).ok_or_else(|| {
            ListenError::Config("no SSE endpoint: pass --url or set PUSH_URL".into())
        })?;
        let mut supervisor = SupervisorConfig::new(&url)?;
        if let Some(user_agent) = overrides.user_agent.or(self.user_agent) {
            supervisor.user_agent = user_agent;
        }
        supervisor.timing = TimingConfig::from(&self.timing);
        if let Some(secs) = self.backoff_secs {
            supervisor.backoff =
                BackoffPolicy::new(secs.into_iter().map(Duration::from_secs).collect())?;
        }
        supervisor.validate()?;
        Ok(Settings {
            supervisor,
            token: overrides.token.or(self.token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_yaml(dir: &tempfile::TempDir, yaml: &str) -> std::path::PathBuf {
        let path = dir.path().join("push-listen.yaml");
        tokio::fs::write(&path, yaml).await.unwrap();
        path
    }

    #[tokio::test]
    async fn load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            &dir,
            r#"
url: https://notification.example.com/sse
token: file-token-abcdef
user_agent: ArkaFile-SSE-Client/2.0
backoff_secs: [1, 3, 30]
timing:
  frame_check_interval_secs: 10
  missed_checks_threshold: 5
  token_wait_attempts: 30
"#,
        )
        .await;

        let config = load(&path).await.unwrap();
        assert_eq!(config.backoff_secs, Some(vec![1, 3, 30]));
        assert_eq!(config.timing.frame_check_interval_secs, 10);
        assert_eq!(config.timing.health_check_interval_secs, 300);

        let settings = config.resolve(Overrides::default()).unwrap();
        let sup = &settings.supervisor;
        assert_eq!(sup.url.as_str(), "https://notification.example.com/sse");
        assert_eq!(sup.user_agent, "ArkaFile-SSE-Client/2.0");
        assert_eq!(sup.timing.frame_check_interval, Duration::from_secs(10));
        assert_eq!(sup.timing.missed_checks_threshold, 5);
        assert_eq!(sup.timing.token_wait_attempts, 30);
        assert_eq!(sup.backoff.delay(1), Duration::from_secs(1));
        assert_eq!(sup.backoff.delay(9), Duration::from_secs(30));
        assert_eq!(settings.token.as_deref(), Some("file-token-abcdef"));
    }

    #[tokio::test]
    async fn empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(&dir, "{}\n").await;
        let config = load(&path).await.unwrap();
        assert_eq!(config, ListenConfig::default());
        assert_eq!(TimingConfig::from(&config.timing), TimingConfig::default());
    }

    #[tokio::test]
    async fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(&dir, "timing: [not, a, map]\n").await;
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ListenError::Config(msg) if msg.starts_with("parse ")));
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(matches!(err, ListenError::Config(msg) if msg.starts_with("read ")));
    }

    #[test]
    fn overrides_win_over_file() {
        let config = ListenConfig {
            url: Some("https://file.example.com/sse".into()),
            token: Some("file-token-abcdef".into()),
            user_agent: Some("from-file".into()),
            ..Default::default()
        };
        let settings = config
            .resolve(Overrides {
                url: Some("http://127.0.0.1:8080/sse".into()),
                token: Some("cli-token-abcdef".into()),
                user_agent: None,
            })
            .unwrap();
        assert_eq!(settings.supervisor.url.as_str(), "http://127.0.0.1:8080/sse");
        assert_eq!(settings.supervisor.user_agent, "from-file");
        assert_eq!(settings.token.as_deref(), Some("cli-token-abcdef"));
    }

    #[test]
    fn missing_url_is_an_error() {
        let err = ListenConfig::default()
            .resolve(Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ListenError::Config(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = ListenConfig {
            url: Some("https://example.com/sse".into()),
            backoff_secs: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            config.resolve(Overrides::default()),
            Err(ListenError::Subscriber(_))
        ));

        config = ListenConfig {
            url: Some("https://example.com/sse".into()),
            ..Default::default()
        };
        config.timing.frame_check_interval_secs = 0;
        assert!(matches!(
            config.resolve(Overrides::default()),
            Err(ListenError::Subscriber(_))
        ));
    }
}
