// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for hangar-server.

use std::time::Duration;

use crate::job_monitor::JobMonitorConfig;
use crate::pipeline::PipelineConfig;
use crate::resubmission::ResubmissionConfig;
use crate::scheduler::SchedulerConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Submitted-job scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Active-job monitor settings.
    pub job_monitor: JobMonitorConfig,
    /// Pending-job resubmission settings.
    pub resubmission: ResubmissionConfig,
    /// Settings shared by all reconciliation pipelines.
    pub pipeline: PipelineConfig,
    /// Register the built-in local backend.
    pub local_backend: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("HANGAR_DATABASE_URL")
            .ok_or(ConfigError::MissingEnvVar("HANGAR_DATABASE_URL"))?;

        let scheduler = SchedulerConfig {
            poll_interval: secs(&lookup, "HANGAR_SCHEDULER_INTERVAL_SECS", 2)?,
            ..Default::default()
        };
        let job_monitor = JobMonitorConfig {
            poll_interval: secs(&lookup, "HANGAR_JOB_MONITOR_INTERVAL_SECS", 5)?,
            provisioning_timeout: secs(&lookup, "HANGAR_PROVISIONING_TIMEOUT_SECS", 600)?,
            ..Default::default()
        };
        let resubmission = ResubmissionConfig {
            poll_interval: secs(&lookup, "HANGAR_RESUBMISSION_INTERVAL_SECS", 5)?,
        };
        let pipeline = PipelineConfig {
            poll_interval: secs(&lookup, "HANGAR_PIPELINE_POLL_INTERVAL_SECS", 10)?,
            lease: secs(&lookup, "HANGAR_PIPELINE_LEASE_SECS", 30)?,
            workers: number(&lookup, "HANGAR_PIPELINE_WORKERS", 2)?,
            ..Default::default()
        };

        let local_backend = match lookup("HANGAR_LOCAL_BACKEND") {
            None => true,
            Some(v) => parse_bool(&v).ok_or(ConfigError::InvalidValue {
                name: "HANGAR_LOCAL_BACKEND",
                value: v,
            })?,
        };

        Ok(Self {
            database_url,
            scheduler,
            job_monitor,
            resubmission,
            pipeline,
            local_backend,
        })
    }
}

fn number<F>(lookup: &F, name: &'static str, default: u64) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default as usize),
        Some(v) => match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::InvalidValue { name, value: v }),
        },
    }
}

fn secs<F>(lookup: &F, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    number(lookup, name, default).map(|n| Duration::from_secs(n as u64))
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable could not be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}
