use std::path::PathBuf;
use std::time::Duration;

use journal_pipeline::engine::EngineConfig;
use journal_pipeline::executor::{ExecutorConfig, ExecutorMode};
use journal_pipeline::runner::RunnerConfig;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    /// Postgres stores when set, in-memory stores otherwise.
    pub database_url: Option<String>,
    pub jobs: JobSettings,
}

/// Settings of the job engine and its stage executor.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub stage_timeout_secs: u64,
    pub credit_cost: i64,
    pub export_dir: PathBuf,
    pub executor_mode: ExecutorMode,
    pub generator_url: Option<String>,
    pub executor_request_timeout_secs: u64,
    /// Starting balance of every owner when running on in-memory stores.
    pub dev_initial_credits: i64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 300,
            credit_cost: 1,
            export_dir: PathBuf::from("./exports"),
            executor_mode: ExecutorMode::Fallback,
            generator_url: None,
            executor_request_timeout_secs: 120,
            dev_initial_credits: 0,
        }
    }
}

impl JobSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            runner: RunnerConfig {
                stage_timeout: Duration::from_secs(self.stage_timeout_secs),
                credit_cost: self.credit_cost,
                ..Default::default()
            },
            export_dir: self.export_dir.clone(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            mode: self.executor_mode,
            generator_url: self.generator_url.clone(),
            request_timeout: Duration::from_secs(self.executor_request_timeout_secs),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `HOST`                          | `0.0.0.0`               |
    /// | `PORT`                          | `3000`                  |
    /// | `CORS_ORIGINS`                  | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`          | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                    |
    /// | `DATABASE_URL`                  | unset (in-memory)       |
    /// | `STAGE_TIMEOUT_SECS`            | `300`                   |
    /// | `CREDIT_COST`                   | `1`                     |
    /// | `EXPORT_DIR`                    | `./exports`             |
    /// | `EXECUTOR_MODE`                 | `fallback`              |
    /// | `GENERATOR_URL`                 | unset                   |
    /// | `EXECUTOR_REQUEST_TIMEOUT_SECS` | `120`                   |
    /// | `DEV_INITIAL_CREDITS`           | `0`                     |
    ///
    /// # Panics
    ///
    /// Panics on malformed values and when `JWT_SECRET` is missing.
    pub fn from_env() -> Self {
        let host = env_or("HOST", "0.0.0.0");

        let port: u16 = env_or("PORT", "3000")
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", "30")
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", "30")
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let jobs = JobSettings {
            stage_timeout_secs: env_or("STAGE_TIMEOUT_SECS", "300")
                .parse()
                .expect("STAGE_TIMEOUT_SECS must be a valid u64"),
            credit_cost: env_or("CREDIT_COST", "1")
                .parse()
                .expect("CREDIT_COST must be a valid i64"),
            export_dir: PathBuf::from(env_or("EXPORT_DIR", "./exports")),
            executor_mode: env_or("EXECUTOR_MODE", "fallback")
                .parse()
                .unwrap_or_else(|e| panic!("Invalid EXECUTOR_MODE: {e}")),
            generator_url: env_opt("GENERATOR_URL"),
            executor_request_timeout_secs: env_or("EXECUTOR_REQUEST_TIMEOUT_SECS", "120")
                .parse()
                .expect("EXECUTOR_REQUEST_TIMEOUT_SECS must be a valid u64"),
            dev_initial_credits: env_or("DEV_INITIAL_CREDITS", "0")
                .parse()
                .expect("DEV_INITIAL_CREDITS must be a valid i64"),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            database_url: env_opt("DATABASE_URL"),
            jobs,
        }
    }
}
