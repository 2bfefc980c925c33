use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Load balancing algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// `instances[counter % len]`, one counter per service
    #[default]
    RoundRobin,
    /// Cumulative-weight walk driven by a per-service counter
    WeightedRoundRobin,
    /// Fewest open connections, ties broken by list order
    LeastConnections,
    /// Uniform random pick
    Random,
    /// `hash(client_ip) % len`; sticky only while membership is stable
    IpHash,
}

impl Algorithm {
    pub const ALL: [Self; 5] = [
        Self::RoundRobin,
        Self::WeightedRoundRobin,
        Self::LeastConnections,
        Self::Random,
        Self::IpHash,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::LeastConnections => "least_connections",
            Self::Random => "random",
            Self::IpHash => "ip_hash",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "weighted_round_robin" => Ok(Self::WeightedRoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "random" => Ok(Self::Random),
            "ip_hash" => Ok(Self::IpHash),
            other => Err(Error::Configuration(format!(
                "unsupported load balancing algorithm: {other}"
            ))),
        }
    }
}
