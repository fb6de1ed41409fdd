//! hierarchical key/value store, one [DataNode] per configuration block
//!
//! Nodes live in a [DataTree] arena and are addressed by [NodeId]. A node owns its children through the tree, a child
//! only knows the index of its parent.
//!
//! A key is *declared* with [DataTree::blank_init] before anything reads it. Reading a declared key that has no value
//! yet fails with [LookupError::NotInitialized], which the scheduler uses to discover dependencies. Reading a key that
//! is declared nowhere in the ancestor chain fails with [LookupError::Unknown] instead.
//!
//! ### Paths
//!
//! | path               | resolves                                                              |
//! |--------------------|-----------------------------------------------------------------------|
//! | `key`, `@key`      | `key` in the current node, then its ancestors                         |
//! | `@orbit/key`       | `key` in child `orbit` of the current node or of the closest ancestor |
//! | `@../key`          | `key` starting at the parent                                          |
//! | `@/contract/key`   | `key` starting at the child `contract` of the root                    |
use crate::value::{ConversionError, FromValue, Value, ValueType};
use indexmap::IndexMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// A key inside a specific node
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_new::new)]
pub struct QualifiedKey {
    pub node: NodeId,
    pub key: String,
}

/// Where a node was declared, for error messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub source: Option<PathBuf>,
    /// Block identifier and labels as written, e.g. `contract "rescue"`
    pub declaration: String,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(path) => write!(f, "{} ({})", self.declaration, path.display()),
            None => f.write_str(&self.declaration),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Option<Value>,
    pub value_type: ValueType,
    pub deterministic: bool,
    /// Node version at the time of the last write
    pub modified: u64,
}

impl Entry {
    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug)]
pub struct DataNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: IndexMap<String, NodeId>,
    pub values: IndexMap<String, Entry>,
    pub origin: Origin,
    /// Bumped on every write to this node
    pub version: u64,
    /// Cleared when any attribute of this block failed to resolve
    pub valid: bool,
}

impl DataNode {
    fn new(name: String, parent: Option<NodeId>, origin: Origin) -> Self {
        Self {
            name,
            parent,
            children: Default::default(),
            values: Default::default(),
            origin,
            version: 0,
            valid: true,
        }
    }
}

#[derive(Debug)]
pub struct DataTree {
    nodes: Vec<DataNode>,
}

impl DataTree {
    pub fn new(origin: Origin) -> Self {
        Self {
            nodes: vec![DataNode::new(String::new(), None, origin)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn node(&self, id: NodeId) -> &DataNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut DataNode {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DataNode)> {
        self.nodes.iter().enumerate().map(|(index, node)| (NodeId(index), node))
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        origin: Origin,
    ) -> Result<NodeId, StoreError> {
        if let Some(existing) = self.node(parent).children.get(name) {
            return Err(StoreError::DuplicateChild {
                parent: self.path(parent),
                name: name.to_string(),
                existing: self.node(*existing).origin.clone(),
            });
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(DataNode::new(name.to_string(), Some(parent), origin));
        self.node_mut(parent).children.insert(name.to_string(), id);
        tracing::trace!(path = %self.path(id), "node added");
        Ok(id)
    }

    /// Human readable path of a node, `/` separated starting below the root
    pub fn path(&self, id: NodeId) -> String {
        let mut names = vec![];
        let mut current = Some(id);
        while let Some(node) = current {
            if node != NodeId::ROOT {
                names.push(self.node(node).name.as_str());
            }
            current = self.node(node).parent;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    pub fn display_key(&self, key: &QualifiedKey) -> String {
        match key.node {
            NodeId::ROOT => format!("/{}", key.key),
            node => format!("{}/{}", self.path(node), key.key),
        }
    }

    /// `true` when `node` is `ancestor` or lies below it
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).parent;
        }
        false
    }

    fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |id| self.node(*id).parent)
    }

    /// Declare a key without a value, does nothing when already declared
    pub fn blank_init(&mut self, node: NodeId, key: &str, value_type: ValueType) {
        self.node_mut(node)
            .values
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: None,
                value_type,
                deterministic: true,
                modified: 0,
            });
    }

    /// Closest node, starting at `node` and walking up, that declares `key`
    fn owner(&self, node: NodeId, key: &str) -> Option<NodeId> {
        self.ancestors(node).find(|id| self.node(*id).values.contains_key(key))
    }

    fn entry(&self, node: NodeId, key: &str) -> Option<&Entry> {
        self.owner(node, key).and_then(|id| self.node(id).values.get(key))
    }

    pub fn is_initialized(&self, node: NodeId, key: &str) -> bool {
        self.entry(node, key).is_some_and(Entry::is_initialized)
    }

    /// Whether the key holds a value that is not affected by refreshes
    ///
    /// A declared key without a value is never deterministic.
    pub fn is_deterministic(&self, node: NodeId, key: &str) -> bool {
        self.entry(node, key).is_some_and(|entry| entry.is_initialized() && entry.deterministic)
    }

    /// Store a resolved value
    ///
    /// The key must be declared locally and the value must match its declared type.
    pub fn set(
        &mut self,
        node: NodeId,
        key: &str,
        value: Value,
        deterministic: bool,
    ) -> Result<(), StoreError> {
        let path = self.display_key(&QualifiedKey::new(node, key.to_string()));
        let data_node = self.node_mut(node);
        let version = data_node.version + 1;

        let Some(entry) = data_node.values.get_mut(key) else {
            return Err(StoreError::Undeclared(path));
        };

        if value.value_type() != Some(entry.value_type) {
            return Err(StoreError::TypeMismatch {
                key: path,
                declared: entry.value_type,
                value,
            });
        }

        entry.value = Some(value);
        entry.deterministic = deterministic;
        entry.modified = version;
        data_node.version = version;
        tracing::trace!(key = %path, version, deterministic, "value set");
        Ok(())
    }

    /// Value of a key, looking through the ancestors of `node`
    pub fn get(&self, node: NodeId, key: &str) -> Result<&Value, LookupError> {
        let owner = self.owner(node, key).ok_or_else(|| LookupError::Unknown(key.to_string()))?;
        self.get_local(owner, key)
    }

    fn get_local(&self, node: NodeId, key: &str) -> Result<&Value, LookupError> {
        match self.node(node).values.get(key) {
            None => Err(LookupError::Unknown(key.to_string())),
            Some(Entry { value: Some(value), .. }) => Ok(value),
            Some(Entry { value: None, .. }) => Err(LookupError::NotInitialized(QualifiedKey::new(
                node,
                key.to_string(),
            ))),
        }
    }

    /// Typed view of a resolved value
    pub fn get_as<T: FromValue>(&self, node: NodeId, key: &str) -> Result<T, LookupError> {
        let value = self.get(node, key)?;
        T::from_value(value).ok_or_else(|| LookupError::Conversion {
            path: key.to_string(),
            source: ConversionError::Mismatch {
                expected: T::TYPE,
                found: value.to_string(),
            },
        })
    }

    /// Find the node that holds the key named by `path` (see module docs for the grammar)
    pub fn resolve(&self, node: NodeId, path: &str) -> Result<QualifiedKey, LookupError> {
        let invalid = || LookupError::InvalidPath(path.to_string());
        let unknown = || LookupError::Unknown(path.to_string());

        let stripped = path.strip_prefix('@').unwrap_or(path);
        let (navigation, key) = match stripped.rsplit_once('/') {
            Some((navigation, key)) => (Some(navigation), key),
            None => (None, stripped),
        };
        if key.is_empty() || key == ".." || key == "." {
            return Err(invalid());
        }

        let Some(navigation) = navigation else {
            let owner = self.owner(node, key).ok_or_else(unknown)?;
            return Ok(QualifiedKey::new(owner, key.to_string()));
        };

        // only the first segment of a relative path may be found through an ancestor
        let (mut current, segments, mut search_ancestors) = match navigation.strip_prefix('/') {
            _ if navigation.is_empty() => (NodeId::ROOT, "", false),
            Some(rest) => (NodeId::ROOT, rest, false),
            None => (node, navigation, true),
        };

        for segment in segments.split('/').filter(|s| !s.is_empty()) {
            current = match segment {
                "." => current,
                ".." => self.node(current).parent.ok_or_else(invalid)?,
                name if search_ancestors => self
                    .ancestors(current)
                    .find_map(|id| self.node(id).children.get(name).copied())
                    .ok_or_else(unknown)?,
                name => self.node(current).children.get(name).copied().ok_or_else(unknown)?,
            };
            search_ancestors = false;
        }

        let owner = self.owner(current, key).ok_or_else(unknown)?;
        Ok(QualifiedKey::new(owner, key.to_string()))
    }

    /// Render a node and everything below it
    pub fn to_value(&self, node: NodeId) -> Value {
        let data_node = self.node(node);
        let mut object: IndexMap<String, Value> = data_node
            .values
            .iter()
            .filter_map(|(key, entry)| entry.value.clone().map(|value| (key.clone(), value)))
            .collect();

        for (name, child) in &data_node.children {
            object.insert(name.clone(), self.to_value(*child));
        }

        Value::Object(object)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("'{0}' is declared nowhere")]
    Unknown(String),
    /// Declared but not resolved yet
    #[error("'{}' is not initialized", .0.key)]
    NotInitialized(QualifiedKey),
    #[error("'{path}' is a {value_type} and cannot be used in an expression")]
    NotNumeric { path: String, value_type: String },
    #[error("'{0}' is not a valid path")]
    InvalidPath(String),
    #[error("unknown environment variable '{0}'")]
    UnknownVariable(String),
    #[error("'{path}': {source}")]
    Conversion {
        path: String,
        #[source]
        source: ConversionError,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("'{0}' was never declared")]
    Undeclared(String),
    #[error("'{key}' is declared as {declared} but got {value}")]
    TypeMismatch {
        key: String,
        declared: ValueType,
        value: Value,
    },
    #[error("'{name}' already exists in {parent} (first declared at {existing})")]
    DuplicateChild {
        parent: String,
        name: String,
        existing: Origin,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    /// root { base, contract { reward, orbit { altitude } }, other { } }
    fn tree() -> (DataTree, NodeId, NodeId, NodeId) {
        let mut tree = DataTree::new(Origin::default());
        let root = tree.root();
        let contract = tree.add_child(root, "contract", Origin::default()).unwrap();
        let orbit = tree.add_child(contract, "orbit", Origin::default()).unwrap();
        let other = tree.add_child(root, "other", Origin::default()).unwrap();

        tree.blank_init(root, "base", ValueType::Decimal);
        tree.blank_init(contract, "reward", ValueType::Decimal);
        tree.blank_init(orbit, "altitude", ValueType::Integer);
        (tree, contract, orbit, other)
    }

    #[test]
    fn uninitialized_is_distinct_from_unknown() {
        let (tree, contract, _, _) = tree();
        assert_eq!(
            tree.get(contract, "reward"),
            Err(LookupError::NotInitialized(QualifiedKey::new(contract, "reward".into())))
        );
        assert_eq!(tree.get(contract, "nope"), Err(LookupError::Unknown("nope".into())));
    }

    #[test]
    fn declared_key_is_not_deterministic() {
        let (mut tree, contract, orbit, _) = tree();
        assert!(!tree.is_deterministic(contract, "reward"));
        assert!(!tree.is_deterministic(orbit, "reward"));

        tree.set(contract, "reward", Value::Decimal(1.0), true).unwrap();
        assert!(tree.is_deterministic(orbit, "reward"));
    }

    #[test]
    fn lookups_walk_up() {
        let (mut tree, _, orbit, _) = tree();
        tree.set(NodeId::ROOT, "base", Value::Decimal(2.0), true).unwrap();
        assert!(tree.is_initialized(orbit, "base"));
        assert!(tree.is_deterministic(orbit, "base"));
        assert_eq!(tree.get_as::<f64>(orbit, "base"), Ok(2.0));
    }

    #[test]
    fn blank_init_is_idempotent() {
        let (mut tree, contract, _, _) = tree();
        tree.set(contract, "reward", Value::Decimal(1.0), true).unwrap();
        tree.blank_init(contract, "reward", ValueType::Decimal);
        assert_eq!(tree.get(contract, "reward"), Ok(&Value::Decimal(1.0)));
    }

    #[test]
    fn set_keeps_declared_type() {
        let (mut tree, _, orbit, _) = tree();
        assert!(matches!(
            tree.set(orbit, "altitude", Value::Decimal(1.5), false),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            tree.set(orbit, "missing", Value::Integer(1), false),
            Err(StoreError::Undeclared(_))
        ));
    }

    #[test]
    fn set_bumps_version() {
        let (mut tree, _, orbit, _) = tree();
        tree.set(orbit, "altitude", Value::Integer(1), false).unwrap();
        tree.set(orbit, "altitude", Value::Integer(2), false).unwrap();
        assert_eq!(tree.node(orbit).version, 2);
        assert_eq!(tree.node(orbit).values["altitude"].modified, 2);
    }

    #[test]
    fn resolve_paths() {
        let (tree, contract, orbit, other) = tree();
        let key = |node: NodeId, key: &str| -> Result<QualifiedKey, LookupError> {
            Ok(QualifiedKey::new(node, key.to_string()))
        };

        assert_eq!(tree.resolve(orbit, "base"), key(NodeId::ROOT, "base"));
        assert_eq!(tree.resolve(orbit, "@reward"), key(contract, "reward"));
        assert_eq!(tree.resolve(contract, "@orbit/altitude"), key(orbit, "altitude"));
        // sibling reached through an ancestor
        assert_eq!(tree.resolve(other, "@contract/orbit/altitude"), key(orbit, "altitude"));
        assert_eq!(tree.resolve(orbit, "@../reward"), key(contract, "reward"));
        assert_eq!(tree.resolve(other, "@/contract/reward"), key(contract, "reward"));

        assert_eq!(
            tree.resolve(orbit, "@nowhere/altitude"),
            Err(LookupError::Unknown("@nowhere/altitude".into()))
        );
        assert_eq!(
            tree.resolve(NodeId::ROOT, "@../base"),
            Err(LookupError::InvalidPath("@../base".into()))
        );
        assert_eq!(
            tree.resolve(orbit, "@orbit/"),
            Err(LookupError::InvalidPath("@orbit/".into()))
        );
    }

    #[test]
    fn duplicate_children() {
        let (mut tree, _, _, _) = tree();
        assert!(matches!(
            tree.add_child(NodeId::ROOT, "contract", Origin::default()),
            Err(StoreError::DuplicateChild { .. })
        ));
    }

    #[test]
    fn paths_and_rendering() {
        let (mut tree, contract, orbit, _) = tree();
        tree.set(orbit, "altitude", Value::Integer(7), true).unwrap();
        assert_eq!(tree.path(orbit), "/contract/orbit");
        assert_eq!(tree.display_key(&QualifiedKey::new(NodeId::ROOT, "base".into())), "/base");
        assert!(tree.is_within(orbit, contract));
        assert!(!tree.is_within(contract, orbit));
        assert_eq!(
            serde_json::to_string(&tree.to_value(contract)).unwrap(),
            r#"{"orbit":{"altitude":7}}"#
        );
    }
}
