//! Workspace members inherit their version, and the internal dependency pin
//! tracks it.

use std::path::{Path, PathBuf};

const MEMBERS: [&str; 2] = ["crates/scriptguard-core", "crates/scriptguard-cli"];

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("crate lives two levels below the workspace root")
        .to_path_buf()
}

fn manifest(dir: &Path) -> toml::Value {
    let text = std::fs::read_to_string(dir.join("Cargo.toml")).unwrap();
    text.parse().unwrap()
}

#[test]
fn test_members_inherit_workspace_version() {
    let root = workspace_root();
    for member in MEMBERS {
        let doc = manifest(&root.join(member));
        let inherited = doc["package"]["version"]
            .get("workspace")
            .and_then(toml::Value::as_bool);
        assert_eq!(inherited, Some(true), "{member} must use version.workspace = true");
    }
}

#[test]
fn test_workspace_version_matches_library() {
    let doc = manifest(&workspace_root());
    let workspace = &doc["workspace"];
    let version = workspace["package"]["version"].as_str().unwrap();
    assert_eq!(version, scriptguard_core::VERSION);

    let pinned = workspace["dependencies"]["scriptguard-core"]["version"]
        .as_str()
        .unwrap();
    assert_eq!(pinned, version, "internal dependency pin drifted from workspace version");
}
