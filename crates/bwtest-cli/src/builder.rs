//! Turns pool selections from the command line into a transaction list.

use bwtest_core::{RequestKind, Transaction};
use bwtest_hsa::{AccessMode, AccessTier, PoolId, Topology};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Pool selections, one field per kind of request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Unidirectional sources, paired with every entry of `unidir_dst`.
    pub unidir_src: Vec<PoolId>,
    pub unidir_dst: Vec<PoolId>,
    /// Every distinct pair of these pools is copied both ways at once.
    pub bidir: Vec<PoolId>,
    pub all_unidir: bool,
    pub all_bidir: bool,
    /// Pools read into host memory.
    pub read: Vec<PoolId>,
    /// Pools written from host memory.
    pub write: Vec<PoolId>,
}

impl TransactionRequest {
    /// Every reachable pool pair, unidirectional and bidirectional.
    pub fn default_run() -> Self {
        Self { all_unidir: true, all_bidir: true, ..Self::default() }
    }

    /// `self`, or [`default_run`](Self::default_run) when nothing was
    /// selected and the default run is enabled.
    pub fn or_default_run(self, enabled: bool) -> Self {
        if enabled && self.is_empty() { Self::default_run() } else { self }
    }

    pub fn is_empty(&self) -> bool {
        self.unidir_src.is_empty()
            && self.unidir_dst.is_empty()
            && self.bidir.is_empty()
            && !self.all_unidir
            && !self.all_bidir
            && self.read.is_empty()
            && self.write.is_empty()
    }
}

/// Invalid pool selections.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("pool {pool} does not exist (topology has {count} pools)")]
    UnknownPool { pool: PoolId, count: usize },
    #[error("unidirectional copies need both source (-s) and destination (-d) pools")]
    MissingEndpoint,
    #[error("bidirectional copies need at least two distinct pools")]
    BidirTooFew,
    #[error("pools {src} and {dst} live on accelerators that cannot reach each other")]
    Unreachable { src: PoolId, dst: PoolId },
    #[error("topology has no host memory pool")]
    NoHostPool,
    #[error("no transactions requested")]
    Empty,
}

/// Builds transactions against one topology.
pub struct TransactionBuilder<'t> {
    topology: &'t Topology,
    skip_fine_grained: bool,
}

impl<'t> TransactionBuilder<'t> {
    pub fn new(topology: &'t Topology, skip_fine_grained: bool) -> Self {
        Self { topology, skip_fine_grained }
    }

    /// Expand `request` into transactions, in the order unidirectional,
    /// bidirectional, all-pairs unidirectional, all-pairs bidirectional,
    /// read, write.
    pub fn build(&self, request: &TransactionRequest) -> Result<Vec<Transaction>, BuildError> {
        if request.is_empty() {
            return Err(BuildError::Empty);
        }
        for &pool in request
            .unidir_src
            .iter()
            .chain(&request.unidir_dst)
            .chain(&request.bidir)
            .chain(&request.read)
            .chain(&request.write)
        {
            self.check_pool(pool)?;
        }
        if request.unidir_src.is_empty() != request.unidir_dst.is_empty() {
            return Err(BuildError::MissingEndpoint);
        }

        let mut list = Vec::new();

        let src = self.usable(&request.unidir_src);
        let dst = self.usable(&request.unidir_dst);
        for &s in &src {
            for &d in dst.iter().filter(|&&d| d != s) {
                self.check_reachable(s, d)?;
                list.push(self.transaction(RequestKind::CopyUnidir, s, d));
            }
        }

        if !request.bidir.is_empty() {
            let mut pools = self.usable(&request.bidir);
            let mut seen = BTreeSet::new();
            pools.retain(|&p| seen.insert(p));
            if pools.len() < 2 {
                return Err(BuildError::BidirTooFew);
            }
            for (i, &a) in pools.iter().enumerate() {
                for &b in &pools[i + 1..] {
                    self.check_reachable(a, b)?;
                    list.push(self.transaction(RequestKind::CopyBidir, a, b));
                }
            }
        }

        if request.all_unidir {
            for (a, b) in self.all_pairs() {
                list.push(self.transaction(RequestKind::CopyAllUnidir, a, b));
                list.push(self.transaction(RequestKind::CopyAllUnidir, b, a));
            }
        }

        if request.all_bidir {
            for (a, b) in self.all_pairs() {
                list.push(self.transaction(RequestKind::CopyAllBidir, a, b));
            }
        }

        if !request.read.is_empty() || !request.write.is_empty() {
            let host = self.topology.host_pool().ok_or(BuildError::NoHostPool)?.index;
            for pool in self.usable(&request.read) {
                list.push(self.transaction(RequestKind::Read, pool, host));
            }
            for pool in self.usable(&request.write) {
                list.push(self.transaction(RequestKind::Write, host, pool));
            }
        }

        debug!(transactions = list.len(), "built transaction list");
        Ok(list)
    }

    fn check_pool(&self, pool: PoolId) -> Result<(), BuildError> {
        let count = self.topology.pools().len();
        if pool >= count {
            return Err(BuildError::UnknownPool { pool, count });
        }
        Ok(())
    }

    fn check_reachable(&self, src: PoolId, dst: PoolId) -> Result<(), BuildError> {
        if self.peers_reachable(src, dst) { Ok(()) } else { Err(BuildError::Unreachable { src, dst }) }
    }

    /// Pools on two different accelerators can only be copied between when
    /// both matrix entries route through the host. Every other pairing is
    /// reachable.
    fn peers_reachable(&self, a: PoolId, b: PoolId) -> bool {
        let (Some(oa), Some(ob)) = (self.topology.pool_owner(a), self.topology.pool_owner(b)) else {
            return false;
        };
        if oa.is_host() || ob.is_host() || oa.index == ob.index {
            return true;
        }
        let access = self.topology.access();
        access.get(oa.index, ob.index) == AccessMode::IndirectViaHost
            && access.get(ob.index, oa.index) == AccessMode::IndirectViaHost
    }

    fn is_fine(&self, pool: PoolId) -> bool {
        self.topology.pool(pool).is_some_and(|p| p.tier == AccessTier::Fine)
    }

    /// `pools` without skipped fine-grained pools, order kept.
    fn usable(&self, pools: &[PoolId]) -> Vec<PoolId> {
        pools
            .iter()
            .copied()
            .filter(|&p| {
                let skip = self.skip_fine_grained && self.is_fine(p);
                if skip {
                    warn!(pool = p, "skipping fine-grained pool");
                }
                !skip
            })
            .collect()
    }

    fn uses_accelerator(&self, pool: PoolId) -> bool {
        self.topology.pool_owner(pool).is_some_and(|a| !a.is_host())
    }

    /// Unordered pool pairs worth measuring: at least one side is on an
    /// accelerator, and two accelerators only pair when their matrix entries
    /// route through the host.
    fn all_pairs(&self) -> Vec<(PoolId, PoolId)> {
        let pools: Vec<PoolId> = self
            .topology
            .pools()
            .iter()
            .map(|p| p.index)
            .filter(|&p| !(self.skip_fine_grained && self.is_fine(p)))
            .collect();
        let mut pairs = Vec::new();
        for (i, &a) in pools.iter().enumerate() {
            for &b in &pools[i + 1..] {
                let both_host = self.topology.pool_owner(a).is_some_and(|o| o.is_host())
                    && self.topology.pool_owner(b).is_some_and(|o| o.is_host());
                if both_host {
                    continue;
                }
                if !self.peers_reachable(a, b) {
                    debug!(a, b, "peer pools not mutually reachable, skipping");
                    continue;
                }
                pairs.push((a, b));
            }
        }
        pairs
    }

    fn transaction(&self, kind: RequestKind, src: PoolId, dst: PoolId) -> Transaction {
        let accel = self.uses_accelerator(src) || self.uses_accelerator(dst);
        Transaction::new(kind, src, dst, accel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[Transaction]) -> Vec<(RequestKind, PoolId, PoolId)> {
        list.iter().map(|t| (t.kind, t.src_pool, t.dst_pool)).collect()
    }

    #[test]
    fn unidirectional_is_cross_product_without_self_copies() {
        let topo = Topology::single_gpu();
        let req = TransactionRequest { unidir_src: vec![0, 2], unidir_dst: vec![0, 2], ..Default::default() };
        let list = TransactionBuilder::new(&topo, false).build(&req).unwrap();
        assert_eq!(
            pairs(&list),
            vec![(RequestKind::CopyUnidir, 0, 2), (RequestKind::CopyUnidir, 2, 0)]
        );
        assert!(list.iter().all(|t| t.uses_accelerator));
    }

    #[test]
    fn host_only_copy_does_not_use_accelerator() {
        let topo = Topology::single_gpu();
        let req = TransactionRequest { unidir_src: vec![0], unidir_dst: vec![1], ..Default::default() };
        let list = TransactionBuilder::new(&topo, false).build(&req).unwrap();
        assert!(!list[0].uses_accelerator);
    }

    #[test]
    fn bidirectional_takes_each_pair_once() {
        let topo = Topology::dual_gpu(AccessMode::IndirectViaHost);
        let req = TransactionRequest { bidir: vec![0, 2, 3], ..Default::default() };
        let list = TransactionBuilder::new(&topo, false).build(&req).unwrap();
        assert_eq!(
            pairs(&list),
            vec![
                (RequestKind::CopyBidir, 0, 2),
                (RequestKind::CopyBidir, 0, 3),
                (RequestKind::CopyBidir, 2, 3),
            ]
        );
    }

    #[test]
    fn unknown_pool_is_rejected() {
        let topo = Topology::single_gpu();
        let req = TransactionRequest { read: vec![7], ..Default::default() };
        assert_eq!(
            TransactionBuilder::new(&topo, false).build(&req).unwrap_err(),
            BuildError::UnknownPool { pool: 7, count: 3 }
        );
    }

    #[test]
    fn source_without_destination_is_rejected() {
        let topo = Topology::single_gpu();
        let req = TransactionRequest { unidir_src: vec![0], ..Default::default() };
        assert_eq!(TransactionBuilder::new(&topo, false).build(&req).unwrap_err(), BuildError::MissingEndpoint);
    }

    #[test]
    fn empty_request_is_rejected() {
        let topo = Topology::single_gpu();
        let err = TransactionBuilder::new(&topo, false).build(&TransactionRequest::default()).unwrap_err();
        assert_eq!(err, BuildError::Empty);
    }

    #[test]
    fn default_run_fills_only_an_empty_request() {
        let topo = Topology::single_gpu();
        let empty = TransactionRequest::default().or_default_run(true);
        assert_eq!(empty, TransactionRequest::default_run());
        let list = TransactionBuilder::new(&topo, false).build(&empty).unwrap();
        assert_eq!(list.iter().filter(|t| t.kind == RequestKind::CopyAllUnidir).count(), 4);
        assert_eq!(list.iter().filter(|t| t.kind == RequestKind::CopyAllBidir).count(), 2);

        let explicit = TransactionRequest { read: vec![2], ..Default::default() };
        assert_eq!(explicit.clone().or_default_run(true), explicit);
        assert!(TransactionRequest::default().or_default_run(false).is_empty());
    }

    #[test]
    fn fine_grained_pools_are_skipped_when_configured() {
        let topo = Topology::single_gpu();
        let req = TransactionRequest { all_unidir: true, ..Default::default() };
        let with_fine = TransactionBuilder::new(&topo, false).build(&req).unwrap();
        let without = TransactionBuilder::new(&topo, true).build(&req).unwrap();
        assert_eq!(with_fine.len(), 4);
        assert_eq!(pairs(&without), vec![(RequestKind::CopyAllUnidir, 0, 2), (RequestKind::CopyAllUnidir, 2, 0)]);
    }

    #[test]
    fn bidir_with_only_skipped_pools_is_too_few() {
        let topo = Topology::single_gpu();
        let req = TransactionRequest { bidir: vec![1, 2], ..Default::default() };
        assert_eq!(TransactionBuilder::new(&topo, true).build(&req).unwrap_err(), BuildError::BidirTooFew);
    }

    #[test]
    fn all_pairs_skip_unreachable_peers() {
        let direct = Topology::dual_gpu(AccessMode::Direct);
        let indirect = Topology::dual_gpu(AccessMode::IndirectViaHost);
        let req = TransactionRequest { all_bidir: true, ..Default::default() };
        let d = TransactionBuilder::new(&direct, false).build(&req).unwrap();
        let i = TransactionBuilder::new(&indirect, false).build(&req).unwrap();
        assert!(!pairs(&d).contains(&(RequestKind::CopyAllBidir, 2, 3)));
        assert!(pairs(&i).contains(&(RequestKind::CopyAllBidir, 2, 3)));
    }

    #[test]
    fn explicit_pair_between_unreachable_peers_is_rejected() {
        let topo = Topology::dual_gpu(AccessMode::Direct);
        let req = TransactionRequest { unidir_src: vec![2], unidir_dst: vec![3], ..Default::default() };
        assert_eq!(
            TransactionBuilder::new(&topo, false).build(&req).unwrap_err(),
            BuildError::Unreachable { src: 2, dst: 3 }
        );

        let req = TransactionRequest { bidir: vec![0, 2, 3], ..Default::default() };
        assert_eq!(
            TransactionBuilder::new(&topo, false).build(&req).unwrap_err(),
            BuildError::Unreachable { src: 2, dst: 3 }
        );
    }

    #[test]
    fn explicit_pair_between_indirect_peers_is_built() {
        let topo = Topology::dual_gpu(AccessMode::IndirectViaHost);
        let req = TransactionRequest { unidir_src: vec![2], unidir_dst: vec![3], ..Default::default() };
        let list = TransactionBuilder::new(&topo, false).build(&req).unwrap();
        assert_eq!(pairs(&list), vec![(RequestKind::CopyUnidir, 2, 3)]);
    }

    #[test]
    fn read_and_write_pair_with_host_pool() {
        let topo = Topology::single_gpu();
        let req = TransactionRequest { read: vec![2], write: vec![2], ..Default::default() };
        let list = TransactionBuilder::new(&topo, false).build(&req).unwrap();
        assert_eq!(pairs(&list), vec![(RequestKind::Read, 2, 0), (RequestKind::Write, 0, 2)]);
    }
}
