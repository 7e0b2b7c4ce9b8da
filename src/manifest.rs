//! Build step manifests.
//!
//! A build step prints a single JSON document on stdout describing where
//! its outputs go in the image:
//!
//! ```text
//! { "<category>": { "<dest-subpath>": "<source-file-name>", ... }, ... }
//! ```
//!
//! [`parse_manifest`] is the only way to obtain a [`Manifest`]. It rejects
//! anything outside the closed category set or the string-to-string shape,
//! so placement code never sees a loosely-typed document. Validation never
//! touches the filesystem.

use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::fmt;
use std::path::{Component, Path};

use crate::error::{AssembleError, Result};

/// Destination roots in the image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Image root.
    Generic,
    /// Boot partition root (`boot/`).
    Boot,
    /// Primary kernel tree (`MASTER/`).
    Master,
    /// Optional kernel modules (`MASTER/addons/`).
    Addon,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Generic,
        Category::Boot,
        Category::Master,
        Category::Addon,
    ];

    /// Key used for this category in the manifest document.
    pub fn key(self) -> &'static str {
        match self {
            Category::Generic => "generic",
            Category::Boot => "boot",
            Category::Master => "master",
            Category::Addon => "addon",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.key() == key)
    }

    /// Root of this category, relative to the staging tree root.
    pub fn staging_subdir(self) -> &'static str {
        match self {
            Category::Generic => "",
            Category::Boot => "boot",
            Category::Master => "MASTER",
            Category::Addon => "MASTER/addons",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One declared file: copy `source` into `<category root>/<subpath>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub subpath: String,
    pub source: String,
}

/// All entries a step declared for one category, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSection {
    pub category: Category,
    pub entries: Vec<ManifestEntry>,
}

/// A validated manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub sections: Vec<ManifestSection>,
}

impl Manifest {
    /// Iterate `(category, entry)` pairs in document order.
    pub fn entries(&self) -> impl Iterator<Item = (Category, &ManifestEntry)> {
        self.sections
            .iter()
            .flat_map(|section| section.entries.iter().map(move |e| (section.category, e)))
    }

    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse and validate the stdout of build step `step`.
///
/// Checks, in order: well-formed single document, object at top level,
/// known categories, string-to-string mappings. The first violation fails
/// the whole manifest. A category or a subpath given twice is rejected
/// rather than letting one occurrence silently replace the other.
pub fn parse_manifest(step: &str, output: &str) -> Result<Manifest> {
    let document: Node = serde_json::from_str(output).map_err(|source| AssembleError::Parse {
        step: step.to_string(),
        source,
    })?;

    let schema = |reason: String| AssembleError::Schema {
        step: step.to_string(),
        reason,
    };

    let top = match document {
        Node::Object(pairs) => pairs,
        other => {
            return Err(schema(format!(
                "top level must be an object, got {}",
                other.kind()
            )))
        }
    };

    let mut sections: Vec<ManifestSection> = Vec::with_capacity(top.len());
    for (key, value) in top {
        let category = Category::from_key(&key).ok_or_else(|| {
            schema(format!(
                "unknown category '{}' (expected one of: generic, boot, master, addon)",
                key
            ))
        })?;
        if sections.iter().any(|s| s.category == category) {
            return Err(schema(format!("category '{key}' appears more than once")));
        }

        let files = match value {
            Node::Object(files) => files,
            other => {
                return Err(schema(format!(
                    "category '{}' must map destination subpaths to file names, got {}",
                    key,
                    other.kind()
                )))
            }
        };

        let mut entries: Vec<ManifestEntry> = Vec::with_capacity(files.len());
        for (subpath, source) in files {
            let source = match source {
                Node::String(source) => source,
                other => {
                    return Err(schema(format!(
                        "'{}' -> '{}' must be a string file name, got {}",
                        key,
                        subpath,
                        other.kind()
                    )))
                }
            };
            check_subpath(&subpath)
                .map_err(|why| schema(format!("'{key}' -> '{subpath}': {why}")))?;
            if source.trim().is_empty() {
                return Err(schema(format!(
                    "'{key}' -> '{subpath}': empty source file name"
                )));
            }
            if entries.iter().any(|e| e.subpath == subpath) {
                return Err(schema(format!(
                    "'{key}' -> '{subpath}': destination subpath appears more than once"
                )));
            }
            entries.push(ManifestEntry { subpath, source });
        }

        sections.push(ManifestSection { category, entries });
    }

    Ok(Manifest { sections })
}

/// Destination subpaths stay inside their category root.
fn check_subpath(subpath: &str) -> std::result::Result<(), &'static str> {
    let candidate = Path::new(subpath);
    if candidate.is_absolute() {
        return Err("destination subpath must be relative");
    }
    for component in candidate.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            return Err("destination subpath must not leave its category root");
        }
    }
    Ok(())
}

/// Shape of a JSON document, with object members kept in document order
/// and repeated keys kept as separate members.
enum Node {
    Object(Vec<(String, Node)>),
    String(String),
    Other(&'static str),
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::Object(_) => "an object",
            Node::String(_) => "a string",
            Node::Other(kind) => kind,
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> std::result::Result<Node, E> {
        Ok(Node::Other("a boolean"))
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> std::result::Result<Node, E> {
        Ok(Node::Other("a number"))
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> std::result::Result<Node, E> {
        Ok(Node::Other("a number"))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> std::result::Result<Node, E> {
        Ok(Node::Other("a number"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Node, E> {
        Ok(Node::String(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> std::result::Result<Node, E> {
        Ok(Node::String(value))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Node, E> {
        Ok(Node::Other("null"))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Node, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Node::Other("a list"))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Node, A::Error> {
        let mut members = Vec::new();
        while let Some((key, value)) = map.next_entry::<String, Node>()? {
            members.push((key, value));
        }
        Ok(Node::Object(members))
    }
}
