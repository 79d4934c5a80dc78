use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Settings shared by every service: where to listen.
///
/// Values come from an optional `configuration.{toml,yaml,json}` file and are
/// overridden by `APP__`-prefixed environment variables (`APP__PORT=9000`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// HTTP listener address.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// gRPC listener address, one above the HTTP port. Port 0 stays 0 so both
    /// listeners get an ephemeral port in tests.
    pub fn grpc_addr(&self) -> SocketAddr {
        let port = if self.port == 0 { 0 } else { self.port + 1 };
        SocketAddr::new(self.host, port)
    }
}
