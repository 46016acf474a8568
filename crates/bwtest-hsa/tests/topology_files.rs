//! Loading topology descriptions from disk.

use bwtest_hsa::{AccessMode, AccessTier, DeviceKind, Topology, TopologyError};
use std::io::Write;
use tempfile::NamedTempFile;

const TWO_GPU_INDIRECT: &str = r#"
access = [
    ["direct", "direct",            "direct"],
    ["direct", "direct",            "indirect-via-host"],
    ["direct", "indirect-via-host", "direct"],
]

[[agents]]
kind = "cpu"
name = "epyc"

[[agents]]
kind = "gpu"

[[agents]]
kind = "gpu"

[[pools]]
owner = 0

[[pools]]
owner = 0
tier = "fine"

[[pools]]
owner = 1
capacity = 17179869184

[[pools]]
owner = 2
"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_two_gpu_system() {
    let file = write_temp(TWO_GPU_INDIRECT);
    let topo = Topology::load(file.path()).unwrap();

    assert_eq!(topo.agents().len(), 3);
    assert_eq!(topo.pools().len(), 4);
    assert_eq!(topo.agents()[0].name, "epyc");
    assert_eq!(topo.agents()[2].kind, DeviceKind::Gpu);
    assert_eq!(topo.pools()[1].tier, AccessTier::Fine);
    assert_eq!(topo.pools()[2].capacity, 16 << 30);
    assert_eq!(topo.access().get(1, 2), AccessMode::IndirectViaHost);
    assert_eq!(topo.host_pool().unwrap().index, 0);
}

#[test]
fn loaded_topology_matches_builtin_layout() {
    let file = write_temp(TWO_GPU_INDIRECT);
    let loaded = Topology::load(file.path()).unwrap();
    let builtin = Topology::dual_gpu(AccessMode::IndirectViaHost);
    assert_eq!(loaded.access(), builtin.access());
    assert_eq!(
        loaded.pools().iter().map(|p| p.owner).collect::<Vec<_>>(),
        builtin.pools().iter().map(|p| p.owner).collect::<Vec<_>>()
    );
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Topology::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, TopologyError::Io(_)));
}

#[test]
fn unknown_access_mode_is_parse_error() {
    let file = write_temp(&TWO_GPU_INDIRECT.replace("indirect-via-host", "sometimes"));
    assert!(matches!(Topology::load(file.path()), Err(TopologyError::Parse(_))));
}

#[test]
fn matrix_must_cover_every_agent() {
    let text = r#"
access = [["direct"]]

[[agents]]
kind = "cpu"

[[agents]]
kind = "gpu"

[[pools]]
owner = 0
"#;
    let err = Topology::from_toml(text).unwrap_err();
    assert!(matches!(err, TopologyError::MatrixSize { matrix: 1, agents: 2 }), "{err}");
}

#[test]
fn pool_owner_must_exist() {
    let text = r#"
access = [["direct"]]

[[agents]]
kind = "cpu"

[[pools]]
owner = 4
"#;
    let err = Topology::from_toml(text).unwrap_err();
    assert!(matches!(err, TopologyError::UnknownOwner { pool: 0, owner: 4 }), "{err}");
}

#[test]
fn host_must_reach_its_own_memory() {
    let text = r#"
access = [["none"]]

[[agents]]
kind = "cpu"

[[pools]]
owner = 0
"#;
    let err = Topology::from_toml(text).unwrap_err();
    assert!(matches!(err, TopologyError::HostSelfAccess(0)), "{err}");
}
