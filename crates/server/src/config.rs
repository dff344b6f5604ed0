// crates/server/src/config.rs
//! Command-line and environment configuration for the server binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use longrun_core::GuardConfig;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47892;

#[derive(Debug, Clone, Parser)]
#[command(name = "longrun", version, about = "Duplicate-safe long-running job server")]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(long, env = "LONGRUN_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "LONGRUN_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Lease granted to each admitted job, in seconds.
    #[arg(long, env = "LONGRUN_LEASE_SECS", default_value_t = 300)]
    pub lease_secs: u64,

    /// Interval between lease renewals from running jobs, in seconds.
    #[arg(long, env = "LONGRUN_HEARTBEAT_SECS", default_value_t = 60)]
    pub heartbeat_secs: u64,

    /// How long finished jobs stay queryable, in seconds.
    #[arg(long, env = "LONGRUN_RETENTION_SECS", default_value_t = 3600)]
    pub retention_secs: u64,

    /// Interval of the retention sweep, in seconds.
    #[arg(long, env = "LONGRUN_SWEEP_SECS", default_value_t = 60)]
    pub sweep_secs: u64,

    /// Simulated processing time per item, in milliseconds.
    #[arg(long, env = "LONGRUN_ITEM_DELAY_MS", default_value_t = 3000)]
    pub item_delay_ms: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LONGRUN_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn guard(&self) -> GuardConfig {
        GuardConfig {
            lease: Duration::from_secs(self.lease_secs),
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            retention: Duration::from_secs(self.retention_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs.max(1))
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }
}
