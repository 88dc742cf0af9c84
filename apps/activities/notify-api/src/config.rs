//! Configuration for the activities notification API

use core_config::{server::ServerConfig, Environment, FromEnv};
use domain_notifications::NotifyConfig;
use eyre::WrapErr;

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub notify: NotifyConfig,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env().wrap_err("Invalid HTTP server configuration")?;
        let notify = NotifyConfig::from_env().wrap_err("Invalid notification configuration")?;

        Ok(Self {
            environment,
            server,
            notify,
        })
    }
}
