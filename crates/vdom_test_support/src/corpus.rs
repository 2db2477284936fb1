use crate::json_tree::node_from_json;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use vdom::{MoveHeuristic, Node, Patch, PatchKind, count_kind};

pub const DIFF_CORPUS_FORMAT_V1: &str = "reconcile-diff-v1";

#[derive(Clone, Debug, Deserialize)]
struct DiffManifest {
    format: String,
    cases: Vec<DiffManifestCase>,
}

#[derive(Clone, Debug, Deserialize)]
struct DiffManifestCase {
    id: String,
    file: String,
    #[serde(default)]
    moves: ManifestMoves,
    expect: ExpectedPatches,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ManifestMoves {
    #[default]
    Displaced,
    Watermark,
}

/// Patch counts a case must produce. Missing entries default to zero.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExpectedPatches {
    #[serde(default)]
    pub insert: usize,
    #[serde(default)]
    pub remove: usize,
    #[serde(default)]
    pub update: usize,
    #[serde(default)]
    pub replace: usize,
    #[serde(default, rename = "move")]
    pub moved: usize,
}

impl ExpectedPatches {
    pub fn of(patches: &[Patch]) -> Self {
        Self {
            insert: count_kind(patches, PatchKind::Insert),
            remove: count_kind(patches, PatchKind::Remove),
            update: count_kind(patches, PatchKind::UpdateAttributes),
            replace: count_kind(patches, PatchKind::Replace),
            moved: count_kind(patches, PatchKind::Move),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DiffCase {
    pub id: String,
    /// `None` mounts `after` into an empty target.
    pub before: Option<Node>,
    pub after: Node,
    pub moves: MoveHeuristic,
    pub expect: ExpectedPatches,
}

pub fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

pub fn load_diff_corpus(root: &Path) -> Vec<DiffCase> {
    let dir = root.join("diff");
    let manifest_path = dir.join("manifest.toml");
    let manifest: DiffManifest = {
        let content = fs::read_to_string(&manifest_path).unwrap_or_else(|err| {
            panic!("failed to read diff manifest {manifest_path:?}: {err}")
        });
        toml::from_str(&content).unwrap_or_else(|err| {
            panic!("failed to parse diff manifest {manifest_path:?}: {err}")
        })
    };
    assert_eq!(
        manifest.format, DIFF_CORPUS_FORMAT_V1,
        "unsupported diff manifest format in {manifest_path:?}"
    );

    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(manifest.cases.len());
    for entry in manifest.cases {
        assert!(
            seen.insert(entry.id.clone()),
            "duplicate diff case id in {manifest_path:?}: {}",
            entry.id
        );
        let case_path = dir.join(&entry.file);
        let content = fs::read_to_string(&case_path)
            .unwrap_or_else(|err| panic!("failed to read diff case {case_path:?}: {err}"));
        let json: Value = serde_json::from_str(&content)
            .unwrap_or_else(|err| panic!("failed to parse diff case {case_path:?}: {err}"));
        let before = match json.get("before") {
            None | Some(Value::Null) => None,
            Some(tree) => Some(
                node_from_json(tree, "$.before")
                    .unwrap_or_else(|err| panic!("bad tree in {case_path:?}: {err}")),
            ),
        };
        let after = json
            .get("after")
            .map(|tree| node_from_json(tree, "$.after"))
            .unwrap_or_else(|| Err("missing 'after' tree".to_string()))
            .unwrap_or_else(|err| panic!("bad tree in {case_path:?}: {err}"));
        let moves = match entry.moves {
            ManifestMoves::Displaced => MoveHeuristic::Displaced,
            ManifestMoves::Watermark => MoveHeuristic::Watermark,
        };
        out.push(DiffCase {
            id: entry.id,
            before,
            after,
            moves,
            expect: entry.expect,
        });
    }
    out
}
