//! Runtime configuration and fail-fast validation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::registry::clustered::{ClusteredRegistry, ClusterTransport};
use crate::registry::local::LocalRegistry;
use crate::registry::Registry;

/// Names cluster members on demand (e.g. from a service catalogue).
pub type MemberDiscoveryFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Cluster membership policy.
#[derive(Clone, Default)]
pub enum MemberPolicy {
    /// Membership comes from the transport.
    #[default]
    Auto,
    /// Fixed member list, validated at startup.
    Explicit(Vec<String>),
    /// Membership resolved by a discovery function at join time.
    Discovery(MemberDiscoveryFn),
    /// Members restricted to one region tag.
    Region(String),
}

/// Where workers live.
#[derive(Clone, Default)]
pub enum DistributionMode {
    #[default]
    Local,
    Clustered {
        /// The gossip fabric. Required; requesting clustered mode without
        /// one fails validation.
        transport: Option<Arc<dyn ClusterTransport>>,
        members: MemberPolicy,
    },
}

/// Configuration errors, raised at startup and never caught by the runtime.
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("clustered distribution requested without a cluster transport")]
    ClusteredWithoutTransport,

    #[error("explicit member list must not be empty")]
    EmptyMemberList,

    #[error("invalid cluster member name: {0:?}")]
    InvalidMemberName(String),
}

/// Top-level runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub distribution: DistributionMode,
    /// Idle shutdown default for workers.
    pub inactivity_timeout: Duration,
    /// Pipeline loop bound default.
    pub max_runs: u32,
    /// Presence grace period default.
    pub presence_grace: Duration,
    /// Worker registration deadline for placement.
    pub registration_deadline: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            distribution: DistributionMode::Local,
            inactivity_timeout: Duration::from_secs(300),
            max_runs: 50,
            presence_grace: Duration::from_secs(5),
            registration_deadline: Duration::from_secs(5),
        }
    }
}

impl RuntimeConfig {
    /// Single-node defaults.
    pub fn local() -> Self {
        Self::default()
    }

    /// Clustered defaults over a transport.
    pub fn clustered(transport: Arc<dyn ClusterTransport>) -> Self {
        Self {
            distribution: DistributionMode::Clustered {
                transport: Some(transport),
                members: MemberPolicy::Auto,
            },
            ..Self::default()
        }
    }

    /// Validate, failing fast on malformed cluster configuration.
    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        if let DistributionMode::Clustered {
            ref transport,
            ref members,
        } = self.distribution
        {
            if transport.is_none() {
                return Err(RuntimeConfigError::ClusteredWithoutTransport);
            }
            match members {
                MemberPolicy::Auto | MemberPolicy::Discovery(_) => {}
                MemberPolicy::Explicit(ref names) => {
                    if names.is_empty() {
                        return Err(RuntimeConfigError::EmptyMemberList);
                    }
                    for name in names {
                        if name.is_empty() || name.chars().any(char::is_whitespace) {
                            return Err(RuntimeConfigError::InvalidMemberName(name.clone()));
                        }
                    }
                }
                MemberPolicy::Region(ref region) => {
                    if region.is_empty() {
                        return Err(RuntimeConfigError::InvalidMemberName(region.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Build the registry backend for this distribution mode.
    pub(crate) fn build_registry(
        &self,
    ) -> Result<(Arc<dyn Registry>, Option<Arc<ClusteredRegistry>>), RuntimeConfigError> {
        match self.distribution {
            DistributionMode::Local => Ok((Arc::new(LocalRegistry::new()), None)),
            DistributionMode::Clustered { ref transport, .. } => {
                let transport = transport
                    .clone()
                    .ok_or(RuntimeConfigError::ClusteredWithoutTransport)?;
                let clustered = Arc::new(ClusteredRegistry::new(transport));
                Ok((clustered.clone(), Some(clustered)))
            }
        }
    }
}
