//! Agent, memory pool and accessibility model of a heterogeneous system.
//!
//! A [`Topology`] is produced once by discovery (or loaded from a TOML
//! description) and is read-only for the rest of the run.

use crate::runtime::{AgentId, PoolId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Device class of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

/// Access tier of a memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    /// Default, coarse-grained coherence.
    #[default]
    Coarse,
    /// Fine-grained, coherent across agents.
    Fine,
}

impl std::fmt::Display for AccessTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coarse => write!(f, "coarse"),
            Self::Fine => write!(f, "fine"),
        }
    }
}

/// How a consumer agent may reach memory owned by another agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    None,
    Direct,
    /// Reachable, but only once both sides have been granted access explicitly.
    IndirectViaHost,
}

/// A compute endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub index: AgentId,
    pub kind: DeviceKind,
    pub name: String,
}

impl Agent {
    pub fn is_host(&self) -> bool {
        self.kind == DeviceKind::Cpu
    }
}

/// An allocatable memory region owned by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPool {
    pub index: PoolId,
    /// Index of the owning agent.
    pub owner: AgentId,
    pub tier: AccessTier,
    /// Bytes the pool can hand out at once.
    pub capacity: usize,
}

/// Square `(consumer, owner) -> AccessMode` table over agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMatrix {
    agents: usize,
    modes: Vec<AccessMode>,
}

impl AccessMatrix {
    /// Build from row-major rows, one row per consumer agent.
    pub fn from_rows(rows: Vec<Vec<AccessMode>>) -> Result<Self, TopologyError> {
        let agents = rows.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != agents) {
            return Err(TopologyError::MatrixShape { row: bad, expected: agents });
        }
        Ok(Self { agents, modes: rows.into_iter().flatten().collect() })
    }

    /// Access mode for `consumer` reaching memory owned by `owner`.
    ///
    /// Out-of-range indices read as [`AccessMode::None`].
    pub fn get(&self, consumer: AgentId, owner: AgentId) -> AccessMode {
        if consumer >= self.agents || owner >= self.agents {
            return AccessMode::None;
        }
        self.modes[consumer * self.agents + owner]
    }

    pub fn agent_count(&self) -> usize {
        self.agents
    }
}

/// Link characteristics used by the simulated runtime's device clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkModel {
    /// Bandwidth of copies that stay on one agent, GB/s.
    pub local_gbps: f64,
    /// Bandwidth between host and an accelerator, GB/s.
    pub host_gbps: f64,
    /// Bandwidth between two accelerators, GB/s.
    pub peer_gbps: f64,
    /// Fixed per-copy setup cost.
    pub latency_ns: u64,
    /// Fraction of bandwidth left to a copy that shares its link with another
    /// in-flight copy. `1.0` means no contention.
    pub contention: f64,
}

impl Default for LinkModel {
    fn default() -> Self {
        Self { local_gbps: 200.0, host_gbps: 16.0, peer_gbps: 40.0, latency_ns: 2_000, contention: 0.6 }
    }
}

impl LinkModel {
    /// Modelled device duration of one copy in nanoseconds.
    pub fn copy_duration_ns(&self, src: &Agent, dst: &Agent, size: usize, contended: bool) -> u64 {
        let gbps = if src.index == dst.index {
            self.local_gbps
        } else if src.is_host() || dst.is_host() {
            self.host_gbps
        } else {
            self.peer_gbps
        };
        let gbps = if contended { gbps * self.contention } else { gbps };
        // GB/s is bytes per nanosecond.
        let transfer = if gbps > 0.0 { (size as f64 / gbps).ceil() as u64 } else { u64::MAX / 2 };
        self.latency_ns.saturating_add(transfer)
    }
}

/// Errors raised while building or loading a [`Topology`].
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse topology: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("access matrix row {row} must have {expected} entries")]
    MatrixShape { row: usize, expected: usize },
    #[error("access matrix covers {matrix} agents but topology has {agents}")]
    MatrixSize { matrix: usize, agents: usize },
    #[error("pool {pool} is owned by unknown agent {owner}")]
    UnknownOwner { pool: PoolId, owner: AgentId },
    #[error("topology has no cpu agent")]
    NoHostAgent,
    #[error("cpu agent {0} must directly access its own memory")]
    HostSelfAccess(AgentId),
}

/// TOML shape of a topology description.
#[derive(Debug, Deserialize)]
struct TopologyDesc {
    agents: Vec<AgentDesc>,
    pools: Vec<PoolDesc>,
    access: Vec<Vec<AccessMode>>,
    #[serde(default)]
    link: LinkModel,
}

#[derive(Debug, Deserialize)]
struct AgentDesc {
    kind: DeviceKind,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PoolDesc {
    owner: AgentId,
    #[serde(default)]
    tier: AccessTier,
    #[serde(default = "default_pool_capacity")]
    capacity: usize,
}

fn default_pool_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

/// Capacity given to pools that do not declare one.
pub const DEFAULT_POOL_CAPACITY: usize = 8 * 1024 * 1024 * 1024;

/// Agents, pools and their pairwise accessibility.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    agents: Vec<Agent>,
    pools: Vec<MemoryPool>,
    access: AccessMatrix,
    link: LinkModel,
}

impl Topology {
    /// Assemble and validate a topology.
    pub fn new(
        agents: Vec<Agent>,
        pools: Vec<MemoryPool>,
        access: AccessMatrix,
        link: LinkModel,
    ) -> Result<Self, TopologyError> {
        if access.agent_count() != agents.len() {
            return Err(TopologyError::MatrixSize { matrix: access.agent_count(), agents: agents.len() });
        }
        if let Some(pool) = pools.iter().find(|p| p.owner >= agents.len()) {
            return Err(TopologyError::UnknownOwner { pool: pool.index, owner: pool.owner });
        }
        if !agents.iter().any(Agent::is_host) {
            return Err(TopologyError::NoHostAgent);
        }
        if let Some(host) =
            agents.iter().find(|a| a.is_host() && access.get(a.index, a.index) != AccessMode::Direct)
        {
            return Err(TopologyError::HostSelfAccess(host.index));
        }
        Ok(Self { agents, pools, access, link })
    }

    /// Parse a TOML description. Agents and pools are indexed by position.
    pub fn from_toml(toml_str: &str) -> Result<Self, TopologyError> {
        let desc: TopologyDesc = toml::from_str(toml_str)?;
        let agents = desc
            .agents
            .into_iter()
            .enumerate()
            .map(|(index, a)| Agent {
                index,
                kind: a.kind,
                name: a.name.unwrap_or_else(|| format!("{}{index}", a.kind)),
            })
            .collect();
        let pools = desc
            .pools
            .into_iter()
            .enumerate()
            .map(|(index, p)| MemoryPool { index, owner: p.owner, tier: p.tier, capacity: p.capacity })
            .collect();
        Self::new(agents, pools, AccessMatrix::from_rows(desc.access)?, desc.link)
    }

    /// Load a TOML description from disk.
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// One cpu and one gpu.
    ///
    /// Pools: `0` cpu coarse, `1` cpu fine, `2` gpu coarse.
    pub fn single_gpu() -> Self {
        use AccessMode::Direct;
        Self {
            agents: vec![agent(0, DeviceKind::Cpu), agent(1, DeviceKind::Gpu)],
            pools: vec![
                pool(0, 0, AccessTier::Coarse),
                pool(1, 0, AccessTier::Fine),
                pool(2, 1, AccessTier::Coarse),
            ],
            access: AccessMatrix { agents: 2, modes: vec![Direct, Direct, Direct, Direct] },
            link: LinkModel::default(),
        }
    }

    /// One cpu and two gpus whose peer access uses `peer`.
    ///
    /// Pools: `0` cpu coarse, `1` cpu fine, `2` gpu0 coarse, `3` gpu1 coarse.
    pub fn dual_gpu(peer: AccessMode) -> Self {
        use AccessMode::Direct;
        Self {
            agents: vec![
                agent(0, DeviceKind::Cpu),
                agent(1, DeviceKind::Gpu),
                agent(2, DeviceKind::Gpu),
            ],
            pools: vec![
                pool(0, 0, AccessTier::Coarse),
                pool(1, 0, AccessTier::Fine),
                pool(2, 1, AccessTier::Coarse),
                pool(3, 2, AccessTier::Coarse),
            ],
            access: AccessMatrix {
                agents: 3,
                modes: vec![Direct, Direct, Direct, Direct, Direct, peer, Direct, peer, Direct],
            },
            link: LinkModel::default(),
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn pools(&self) -> &[MemoryPool] {
        &self.pools
    }

    pub fn access(&self) -> &AccessMatrix {
        &self.access
    }

    pub fn link(&self) -> &LinkModel {
        &self.link
    }

    pub fn agent(&self, index: AgentId) -> Option<&Agent> {
        self.agents.get(index)
    }

    pub fn pool(&self, index: PoolId) -> Option<&MemoryPool> {
        self.pools.get(index)
    }

    /// Agent owning `pool`.
    pub fn pool_owner(&self, pool: PoolId) -> Option<&Agent> {
        self.pool(pool).and_then(|p| self.agent(p.owner))
    }

    /// The first cpu agent.
    pub fn host_agent(&self) -> Option<&Agent> {
        self.agents.iter().find(|a| a.is_host())
    }

    /// The host's default pool: the first coarse-grained pool of the first
    /// cpu agent, or its first pool of any tier.
    pub fn host_pool(&self) -> Option<&MemoryPool> {
        let host = self.host_agent()?.index;
        let mut owned = self.pools.iter().filter(|p| p.owner == host);
        owned.clone().find(|p| p.tier == AccessTier::Coarse).or_else(|| owned.next())
    }

    /// Replace the link model, keeping everything else.
    pub fn with_link(mut self, link: LinkModel) -> Self {
        self.link = link;
        self
    }

    /// Replace the capacity of one pool.
    pub fn with_pool_capacity(mut self, pool: PoolId, capacity: usize) -> Self {
        if let Some(p) = self.pools.get_mut(pool) {
            p.capacity = capacity;
        }
        self
    }

    /// Replace one access matrix entry.
    pub fn with_access(mut self, consumer: AgentId, owner: AgentId, mode: AccessMode) -> Self {
        if consumer < self.access.agents && owner < self.access.agents {
            self.access.modes[consumer * self.access.agents + owner] = mode;
        }
        self
    }
}

fn agent(index: AgentId, kind: DeviceKind) -> Agent {
    let ordinal = if kind == DeviceKind::Gpu { index - 1 } else { index };
    Agent { index, kind, name: format!("{kind}{ordinal}") }
}

fn pool(index: PoolId, owner: AgentId, tier: AccessTier) -> MemoryPool {
    MemoryPool { index, owner, tier, capacity: DEFAULT_POOL_CAPACITY }
}
