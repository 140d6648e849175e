use crate::dispatch::DEFAULT_HISTORY_LIMIT;
use anyhow::{Context, Result};
use std::env;

const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    pub command_history_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port: u16 = match lookup("PORT") {
            Some(port) => port.parse().with_context(|| format!("invalid PORT {:?}", port))?,
            None => DEFAULT_PORT,
        };
        let http_addr = lookup("HTTP_ADDR").unwrap_or_else(|| format!("0.0.0.0:{}", port));
        let command_history_limit = match lookup("COMMAND_HISTORY_LIMIT") {
            Some(limit) => limit
                .parse()
                .with_context(|| format!("invalid COMMAND_HISTORY_LIMIT {:?}", limit))?,
            None => DEFAULT_HISTORY_LIMIT,
        };

        Ok(Self {
            http_addr,
            command_history_limit,
        })
    }
}
