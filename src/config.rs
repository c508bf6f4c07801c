//! Service configuration
//!
//! Everything is read from the environment once at startup.

use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_WORKFLOW_BASE_URL: &str = "http://localhost:5678";
const DEFAULT_CHAT_PATH: &str = "/webhook/nlq-chat";
const DEFAULT_HISTORY_PATH: &str = "/webhook/chat-history";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GREETING: &str = "Hello! Ask me anything about your healthcare data.";

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: String,
    pub workflow: WorkflowConfig,
    pub retry: RetryPolicy,
    /// Standalone assistant turn every new session starts with
    pub greeting: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("NLQ_DB_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.nlq-dashboard/nlq.db")
        });

        Self {
            port: env_parse("NLQ_PORT", DEFAULT_PORT),
            db_path,
            workflow: WorkflowConfig::from_env(),
            retry: RetryPolicy::from_env(),
            greeting: std::env::var("NLQ_GREETING").unwrap_or_else(|_| DEFAULT_GREETING.to_string()),
        }
    }
}

/// Where the workflow backend lives and how long we wait for it
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub base_url: String,
    pub chat_path: String,
    pub history_path: String,
    pub request_timeout: Duration,
}

impl WorkflowConfig {
    pub fn from_env() -> Self {
        // Both spellings have been used for the same deployment setting
        let base_url = std::env::var("N8N_BASE_URL")
            .or_else(|_| std::env::var("VITE_N8N_BASE_URL"))
            .unwrap_or_else(|_| DEFAULT_WORKFLOW_BASE_URL.to_string());

        Self {
            base_url,
            chat_path: std::env::var("NLQ_CHAT_PATH")
                .unwrap_or_else(|_| DEFAULT_CHAT_PATH.to_string()),
            history_path: std::env::var("NLQ_HISTORY_PATH")
                .unwrap_or_else(|_| DEFAULT_HISTORY_PATH.to_string()),
            request_timeout: Duration::from_secs(env_parse(
                "NLQ_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
        }
    }

    pub fn chat_url(&self) -> String {
        join_url(&self.base_url, &self.chat_path)
    }

    pub fn history_url(&self) -> String {
        join_url(&self.base_url, &self.history_path)
    }

    /// URL for a relayed webhook path (`waiting/<id>` maps to the
    /// `webhook-waiting` endpoint family)
    pub fn relay_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match path.strip_prefix("waiting/") {
            Some(rest) => join_url(&self.base_url, &format!("/webhook-waiting/{rest}")),
            None => join_url(&self.base_url, &format!("/webhook/{path}")),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WORKFLOW_BASE_URL.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            history_path: DEFAULT_HISTORY_PATH.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Backoff for placeholder acknowledgements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_delay: env_millis("NLQ_RETRY_BASE_MS", defaults.base_delay),
            factor: env_parse("NLQ_RETRY_FACTOR", defaults.factor),
            max_delay: env_millis("NLQ_RETRY_MAX_DELAY_MS", defaults.max_delay),
            max_attempts: env_parse("NLQ_RETRY_MAX_ATTEMPTS", defaults.max_attempts),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.factor
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|multiplier| self.base_delay.checked_mul(multiplier))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_millis)
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
