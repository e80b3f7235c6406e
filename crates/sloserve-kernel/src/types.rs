//! Shared enums used across the kernel and foundation crates.
//!
//! These identify what a request is for ([`Application`]), where a variant
//! runs ([`Placement`]) and how the admission queue orders pending work
//! ([`QueueOrdering`]).

use std::fmt;

/// The kind of workload a request belongs to.
///
/// Each application has its own `Model` (its own set of on-device and
/// remote variants). The payload kind of a request determines its
/// application.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Application {
    /// Image classification
    Image,
    /// Text / question answering
    Text,
}

impl Application {
    /// All applications, in a stable order.
    pub const ALL: [Application; 2] = [Application::Image, Application::Text];

    /// Wire name used by the remote proxy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Application {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown application '{other}'")),
        }
    }
}

/// Where a variant executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// On-device execution through the local runtime
    Local,
    /// Cloud-hosted endpoint reached over the network
    Remote,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Dequeue order of the scheduler's admission queue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrdering {
    /// Oldest creation time first
    Fifo,
    /// Earliest absolute deadline (creation time + latency SLO) first
    #[default]
    Edf,
}

impl fmt::Display for QueueOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "fifo"),
            Self::Edf => write!(f, "edf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_round_trips_through_str() {
        for app in Application::ALL {
            assert_eq!(app.as_str().parse::<Application>().unwrap(), app);
        }
        assert!("audio".parse::<Application>().is_err());
    }

    #[test]
    fn test_application_serializes_lowercase() {
        let json = serde_json::to_string(&Application::Image).unwrap();
        assert_eq!(json, "\"image\"");
    }

    #[test]
    fn test_default_ordering_is_edf() {
        assert_eq!(QueueOrdering::default(), QueueOrdering::Edf);
    }
}
