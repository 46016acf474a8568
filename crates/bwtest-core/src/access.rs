//! Cross-agent access policy.
//!
//! Which agent gets granted which buffer is decided in one place,
//! [`access_plan`], and applied by [`acquire_cross_access`]. Call sites never
//! re-derive "which side is the host" themselves.

use crate::error::{BenchError, Result};
use bwtest_hsa::{AccessMode, AgentId, BufferId, CopyRuntime, Topology};
use tracing::debug;

/// The grants a copy between two agents needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPlan {
    /// The pairing needs explicit grants both ways.
    Mutual,
    /// The source is the host; only the destination agent needs the source buffer.
    GrantDestination,
    /// The destination is the host; only the source agent needs the destination buffer.
    GrantSource,
    /// Both buffers belong to one agent.
    Local,
}

/// Decide the grants for a copy from `src_agent` memory to `dst_agent` memory.
///
/// An `IndirectViaHost` entry needs grants both ways; otherwise the non-host
/// side is granted the host buffer. A copy that stays on one accelerator needs
/// no grant ([`AccessPlan::Local`]).
pub fn access_plan(topology: &Topology, src_agent: AgentId, dst_agent: AgentId) -> Result<AccessPlan> {
    if topology.access().get(src_agent, dst_agent) == AccessMode::IndirectViaHost {
        return Ok(AccessPlan::Mutual);
    }
    let is_host = |agent: AgentId| {
        topology
            .agent(agent)
            .map(|a| a.is_host())
            .ok_or_else(|| BenchError::InternalConsistency(format!("unknown agent {agent}")))
    };
    if is_host(src_agent)? {
        return Ok(AccessPlan::GrantDestination);
    }
    if is_host(dst_agent)? {
        return Ok(AccessPlan::GrantSource);
    }
    if src_agent == dst_agent {
        return Ok(AccessPlan::Local);
    }
    Err(BenchError::InternalConsistency(format!(
        "agents {src_agent} and {dst_agent} are accelerators without a mutual access mode"
    )))
}

/// Allow `agent` to reference `buffer`.
pub fn acquire_pool_access<R: CopyRuntime + ?Sized>(
    runtime: &R,
    agent: AgentId,
    buffer: BufferId,
) -> Result<()> {
    runtime.allow_access(agent, buffer).map_err(|source| BenchError::Access { agent, buffer, source })
}

/// Grant the access a copy between `src_buf` (owned by `src_agent`) and
/// `dst_buf` (owned by `dst_agent`) needs, returning the plan applied.
pub fn acquire_cross_access<R: CopyRuntime + ?Sized>(
    runtime: &R,
    src_agent: AgentId,
    src_buf: BufferId,
    dst_agent: AgentId,
    dst_buf: BufferId,
) -> Result<AccessPlan> {
    let plan = access_plan(runtime.topology(), src_agent, dst_agent)?;
    debug!(src_agent, dst_agent, ?plan, "acquiring cross access");
    match plan {
        AccessPlan::Mutual => {
            acquire_pool_access(runtime, src_agent, dst_buf)?;
            acquire_pool_access(runtime, dst_agent, src_buf)?;
        }
        AccessPlan::GrantDestination => acquire_pool_access(runtime, dst_agent, src_buf)?,
        AccessPlan::GrantSource => acquire_pool_access(runtime, src_agent, dst_buf)?,
        AccessPlan::Local => {}
    }
    Ok(plan)
}
