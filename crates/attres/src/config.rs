//! configuration loader
//!
//! Turns a tree of [ConfigBlock]s into a resolved [DataTree]:
//!
//! 1. every block becomes a node and every attribute is declared, so forward references are recognized as such
//! 2. each attribute is handed to the [Scheduler] in declaration order (phase 1)
//! 3. the scheduler drains whatever got parked (phase 2)
//!
//! Which type an attribute has, and how it is resolved, is decided by a [Factory]. [Schema] is the factory that is
//! driven by `type` blocks:
//!
//! ```hcl
//! type "parameter" {
//!   altitude = "integer where value > 0"
//!   deadline = "volatile decimal"
//!   title    = "string"
//! }
//! ```
//!
//! Attributes without a declaration are deterministic `decimal` expressions.
use crate::data_node::{DataTree, LookupError, NodeId, Origin};
use crate::expression;
use crate::hcl_documents::HclDocuments;
use crate::report::{Issue, Report};
use crate::resolver::{Environment, Resolve, Resolver};
use crate::scheduler::{AttributeLoad, Scheduler};
use crate::value::{ConversionError, Value, ValueType};
use hcl_edit::structure::{Block, Structure};
use indexmap::IndexMap;

/// One configuration block: ordered `key = raw` pairs and nested blocks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigBlock {
    /// Block identifier, selects the attribute declarations
    pub kind: String,
    /// Node name, unique among siblings
    pub name: String,
    pub origin: Origin,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<ConfigBlock>,
}

impl ConfigBlock {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        let kind = kind.into();
        let name = name.into();
        Self {
            origin: Origin {
                source: None,
                declaration: format!("{kind} {name:?}"),
            },
            kind,
            name,
            ..Default::default()
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, raw: impl Into<String>) -> Self {
        self.attributes.push((key.into(), raw.into()));
        self
    }

    pub fn child(mut self, block: ConfigBlock) -> Self {
        self.children.push(block);
        self
    }
}

/// Type, volatility and post-condition of one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    pub value_type: ValueType,
    pub volatile: bool,
    /// Expression over `value` that must be true
    pub condition: Option<String>,
}

impl Default for AttributeSpec {
    fn default() -> Self {
        Self {
            value_type: ValueType::Decimal,
            volatile: false,
            condition: None,
        }
    }
}

impl std::str::FromStr for AttributeSpec {
    type Err = SpecError;

    /// `[volatile] <type> [where <expression>]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, condition) = match s.split_once(" where ") {
            Some((head, condition)) => (head, Some(condition.trim().to_string())),
            None => (s, None),
        };

        let mut words = head.split_whitespace();
        let mut word = words.next().ok_or(SpecError::Empty)?;
        let volatile = word == "volatile";
        if volatile {
            word = words.next().ok_or(SpecError::Empty)?;
        }
        let value_type: ValueType = word.parse()?;

        if let Some(extra) = words.next() {
            return Err(SpecError::Unexpected(extra.to_string()));
        }

        if let Some(condition) = &condition {
            if !value_type.is_numeric() {
                return Err(SpecError::ConditionOnString);
            }
            expression::evaluate(condition, &condition_identifiers(1.0))
                .map_err(|e| SpecError::Condition(e.to_string()))?;
        }

        Ok(Self {
            value_type,
            volatile,
            condition,
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("missing type")]
    Empty,
    #[error(transparent)]
    Type(#[from] ConversionError),
    #[error("unexpected '{0}'")]
    Unexpected(String),
    #[error("conditions only apply to numeric types")]
    ConditionOnString,
    #[error("invalid condition: {0}")]
    Condition(String),
}

/// Provides the load of a single attribute
pub trait Factory {
    fn attribute_load(&self, kind: &str, node: NodeId, key: &str, raw: &str) -> AttributeLoad;
}

/// Attribute declarations per block kind
#[derive(Debug, Default)]
pub struct Schema {
    kinds: IndexMap<String, IndexMap<String, AttributeSpec>>,
}

impl Schema {
    pub fn declare(&mut self, kind: &str, key: &str, spec: AttributeSpec) {
        self.kinds
            .entry(kind.to_string())
            .or_default()
            .insert(key.to_string(), spec);
    }

    pub fn spec(&self, kind: &str, key: &str) -> AttributeSpec {
        self.kinds
            .get(kind)
            .and_then(|keys| keys.get(key))
            .cloned()
            .unwrap_or_default()
    }
}

impl Factory for Schema {
    fn attribute_load(&self, kind: &str, node: NodeId, key: &str, raw: &str) -> AttributeLoad {
        let spec = self.spec(kind, key);
        let mut load = AttributeLoad::new(node, key, raw, Resolver::for_type(spec.value_type));

        if spec.volatile {
            load = load.volatile();
        }

        if let Some(condition) = spec.condition {
            load = load.validate(move |value: &Value| check_condition(&condition, value));
        }

        load
    }
}

/// `value` is the only identifier a condition knows
fn condition_identifiers(value: f64) -> impl Fn(&str) -> Result<f64, LookupError> {
    move |name: &str| match name {
        "value" => Ok(value),
        other => Err(LookupError::Unknown(other.to_string())),
    }
}

fn check_condition(condition: &str, value: &Value) -> Result<(), String> {
    let number = value.as_number().ok_or_else(|| format!("{value} is not numeric"))?;

    match expression::evaluate(condition, &condition_identifiers(number)) {
        Ok(result) if result != 0.0 => Ok(()),
        Ok(_) => Err(format!("{value} does not satisfy '{condition}'")),
        Err(error) => Err(error.to_string()),
    }
}

/// Resolved tree plus what is needed to refresh it later
#[derive(Debug)]
pub struct Loaded {
    pub tree: DataTree,
    pub scheduler: Scheduler,
    pub report: Report,
}

impl Loaded {
    /// Recompute non-deterministic values, optionally below `root` only
    pub fn refresh(&mut self, environment: &dyn Environment, root: Option<NodeId>) -> Report {
        self.scheduler.refresh(&mut self.tree, environment, root)
    }
}

#[derive(derive_new::new)]
pub struct ConfigLoader<'a> {
    factory: &'a dyn Factory,
    environment: &'a dyn Environment,
}

impl ConfigLoader<'_> {
    /// Build and resolve the node tree of `root` and all its descendants
    #[tracing::instrument(level = "trace", skip_all, fields(root = %root.origin))]
    pub fn load(&self, root: &ConfigBlock) -> Loaded {
        let mut tree = DataTree::new(root.origin.clone());
        let mut report = Report::new();
        let mut loads = vec![];

        self.declare(&mut tree, NodeId::ROOT, root, &mut loads, &mut report);
        tracing::debug!(nodes = tree.nodes().count(), attributes = loads.len(), "declared");

        let mut scheduler = Scheduler::new();
        for load in loads {
            scheduler.load(&mut tree, self.environment, load);
        }
        report.merge(scheduler.finish(&mut tree, self.environment));

        Loaded {
            tree,
            scheduler,
            report,
        }
    }

    fn declare(
        &self,
        tree: &mut DataTree,
        node: NodeId,
        block: &ConfigBlock,
        loads: &mut Vec<AttributeLoad>,
        report: &mut Report,
    ) {
        for (key, raw) in &block.attributes {
            if tree.node(node).values.contains_key(key) {
                tree.node_mut(node).valid = false;
                report.log(Issue::DuplicateAttribute {
                    attribute: format!("{}/{key}", tree.path(node).trim_end_matches('/')),
                    origin: block.origin.clone(),
                });
                continue;
            }

            let load = self.factory.attribute_load(&block.kind, node, key, raw);
            tree.blank_init(node, key, load.resolver.value_type());
            loads.push(load);
        }

        for child in &block.children {
            match tree.add_child(node, &child.name, child.origin.clone()) {
                Ok(child_node) => self.declare(tree, child_node, child, loads, report),
                Err(error) => {
                    tracing::debug!(%error, "block skipped");
                    tree.node_mut(node).valid = false;
                    report.log(Issue::DuplicateBlock {
                        path: format!("{}/{}", tree.path(node).trim_end_matches('/'), child.name),
                        origin: child.origin.clone(),
                        existing: tree
                            .node(node)
                            .children
                            .get(&child.name)
                            .map(|existing| tree.node(*existing).origin.clone())
                            .unwrap_or_default(),
                    });
                }
            }
        }
    }
}

/// Split loaded documents into the block tree and the schema declared by its `type` blocks
pub fn from_documents(documents: &HclDocuments) -> (ConfigBlock, Schema, Report) {
    let mut root = ConfigBlock {
        origin: Origin {
            source: None,
            declaration: "(root)".to_string(),
        },
        ..Default::default()
    };
    let mut schema = Schema::default();
    let mut report = Report::new();

    for (source, structure) in documents.structures() {
        let source_origin = Origin {
            source: source.clone(),
            declaration: "(root)".to_string(),
        };

        match structure {
            Structure::Attribute(attribute) => {
                push_attribute(&mut root, &source_origin, attribute, &mut report);
            }
            Structure::Block(block) if block.ident.value().as_str() == "type" => {
                declare_type(&mut schema, &source_origin, block, &mut report);
            }
            Structure::Block(block) => root.children.push(config_block(source, block, &mut report)),
        }
    }

    (root, schema, report)
}

fn push_attribute(
    block: &mut ConfigBlock,
    origin: &Origin,
    attribute: &hcl_edit::structure::Attribute,
    report: &mut Report,
) {
    let key = attribute.key.value().as_str().to_string();
    let expression: hcl::Expression = attribute.value.clone().into();

    let raw = match expression {
        hcl::Expression::String(string) => string,
        hcl::Expression::Number(number) => number_literal(&number),
        hcl::Expression::Bool(boolean) => boolean.to_string(),
        other => match hcl::format::to_string(&other) {
            Ok(formatted) => formatted.trim().to_string(),
            Err(error) => {
                tracing::debug!(%error, key, "unable to format expression");
                report.log(Issue::UnsupportedValue {
                    attribute: key,
                    origin: origin.clone(),
                });
                return;
            }
        },
    };

    block.attributes.push((key, raw));
}

/// Plain decimal notation, expressions have no exponent form
fn number_literal(number: &hcl::Number) -> String {
    if let Some(integer) = number.as_i64() {
        integer.to_string()
    } else if let Some(integer) = number.as_u64() {
        integer.to_string()
    } else {
        number.as_f64().map(|float| float.to_string()).unwrap_or_default()
    }
}

fn declaration(block: &Block) -> String {
    let mut declaration = block.ident.value().as_str().to_string();
    for label in &block.labels {
        declaration.push_str(&format!(" {:?}", label.as_str()));
    }
    declaration
}

fn config_block(
    source: &Option<std::path::PathBuf>,
    block: &Block,
    report: &mut Report,
) -> ConfigBlock {
    let kind = block.ident.value().as_str().to_string();
    let name = match block.labels.last() {
        Some(label) => hcl::Identifier::sanitized(label.as_str()).to_string(),
        None => kind.clone(),
    };
    let origin = Origin {
        source: source.clone(),
        declaration: declaration(block),
    };

    let mut config = ConfigBlock {
        kind,
        name,
        origin: origin.clone(),
        ..Default::default()
    };

    for structure in block.body.iter() {
        match structure {
            Structure::Attribute(attribute) => {
                push_attribute(&mut config, &origin, attribute, report)
            }
            Structure::Block(nested) if nested.ident.value().as_str() == "type" => {
                report.log(Issue::InvalidBlock {
                    origin: Origin {
                        source: source.clone(),
                        declaration: declaration(nested),
                    },
                    message: "type blocks are only allowed at the top level".to_string(),
                });
            }
            Structure::Block(nested) => config.children.push(config_block(source, nested, report)),
        }
    }

    config
}

fn declare_type(schema: &mut Schema, origin: &Origin, block: &Block, report: &mut Report) {
    let origin = Origin {
        declaration: declaration(block),
        ..origin.clone()
    };

    let kind = match block.labels.as_slice() {
        [kind] => kind.as_str().to_string(),
        [] => {
            report.log(Issue::InvalidBlock {
                origin,
                message: "type block label missing".to_string(),
            });
            return;
        }
        _ => {
            report.log(Issue::InvalidBlock {
                origin,
                message: "type block takes exactly one label".to_string(),
            });
            return;
        }
    };

    let mut entries = ConfigBlock::default();
    for structure in block.body.iter() {
        match structure {
            Structure::Attribute(attribute) => {
                push_attribute(&mut entries, &origin, attribute, report)
            }
            Structure::Block(nested) => report.log(Issue::InvalidBlock {
                origin: Origin {
                    declaration: declaration(nested),
                    ..origin.clone()
                },
                message: "type blocks cannot contain blocks".to_string(),
            }),
        }
    }

    for (key, spec) in entries.attributes {
        match spec.parse::<AttributeSpec>() {
            Ok(spec) => schema.declare(&kind, &key, spec),
            Err(error) => report.log(Issue::InvalidTypeSpec {
                attribute: key,
                origin: origin.clone(),
                message: error.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hcl_documents;
    use crate::resolver::{NoEnvironment, ResolveError};
    use pretty_assertions::assert_eq;

    fn load(root: &ConfigBlock) -> Loaded {
        ConfigLoader::new(&Schema::default(), &NoEnvironment).load(root)
    }

    #[test]
    fn attribute_specs() {
        assert_eq!("integer".parse::<AttributeSpec>(), Ok(AttributeSpec {
            value_type: ValueType::Integer,
            volatile: false,
            condition: None,
        }));
        assert_eq!("volatile decimal where value >= 0".parse::<AttributeSpec>(), Ok(AttributeSpec {
            value_type: ValueType::Decimal,
            volatile: true,
            condition: Some("value >= 0".into()),
        }));
        assert_eq!("".parse::<AttributeSpec>(), Err(SpecError::Empty));
        assert_eq!(
            "decimal please".parse::<AttributeSpec>(),
            Err(SpecError::Unexpected("please".into()))
        );
        assert_eq!(
            "string where value > 1".parse::<AttributeSpec>(),
            Err(SpecError::ConditionOnString)
        );
        assert!(matches!(
            "decimal where value >".parse::<AttributeSpec>(),
            Err(SpecError::Condition(_))
        ));
        assert!(matches!("text".parse::<AttributeSpec>(), Err(SpecError::Type(_))));
    }

    #[test]
    fn conditions_only_know_value() {
        assert!("integer where value > 0 && value != 3".parse::<AttributeSpec>().is_ok());

        let error = "decimal where valeu > 0".parse::<AttributeSpec>().unwrap_err();
        insta::assert_snapshot!(
            error.to_string(),
            @"invalid condition: in 'valeu > 0': 'valeu' is declared nowhere"
        );

        let error = "integer where value > limit".parse::<AttributeSpec>().unwrap_err();
        assert!(matches!(error, SpecError::Condition(_)));
    }

    #[test]
    fn numbers_keep_plain_notation() {
        let documents = hcl_documents! {r#"
        tiny  = 0.0000001
        big   = 2e16
        whole = 42
        "#};

        let (root, schema, report) = from_documents(&documents);
        assert!(report.is_valid(), "{report}");
        assert_eq!(
            root.attributes,
            vec![
                ("tiny".to_string(), "0.0000001".to_string()),
                ("big".to_string(), "20000000000000000".to_string()),
                ("whole".to_string(), "42".to_string()),
            ]
        );

        let loaded = ConfigLoader::new(&schema, &NoEnvironment).load(&root);
        assert!(loaded.report.is_valid(), "{}", loaded.report);
        assert_eq!(loaded.tree.get_as::<f64>(NodeId::ROOT, "tiny"), Ok(0.0000001));
        assert_eq!(loaded.tree.get_as::<f64>(NodeId::ROOT, "big"), Ok(2e16));
    }

    #[test]
    fn forward_references_between_blocks() {
        let root = ConfigBlock::new("contract", "rescue")
            .attribute("reward", "@orbit/altitude * 2")
            .child(ConfigBlock::new("parameter", "orbit").attribute("altitude", "@../base + 10"))
            .attribute("base", "100");

        let loaded = load(&root);
        assert!(loaded.report.is_valid(), "{}", loaded.report);
        assert_eq!(loaded.tree.get_as::<f64>(NodeId::ROOT, "reward"), Ok(220.0));
    }

    #[test]
    fn duplicates_are_reported() {
        let root = ConfigBlock::new("contract", "rescue")
            .attribute("a", "1")
            .attribute("a", "2")
            .child(ConfigBlock::new("parameter", "orbit"))
            .child(ConfigBlock::new("parameter", "orbit").attribute("b", "1"));

        let loaded = load(&root);
        assert_eq!(loaded.report.issues().len(), 2);
        assert!(matches!(loaded.report.issues()[0], Issue::DuplicateAttribute { .. }));
        assert!(matches!(loaded.report.issues()[1], Issue::DuplicateBlock { .. }));
        assert_eq!(loaded.tree.get_as::<f64>(NodeId::ROOT, "a"), Ok(1.0));
    }

    #[test]
    fn schema_conditions_validate() {
        let mut schema = Schema::default();
        schema.declare("contract", "count", "integer where value > 0".parse().unwrap());
        let root = ConfigBlock::new("contract", "rescue").attribute("count", "2 - 3");

        let loaded = ConfigLoader::new(&schema, &NoEnvironment).load(&root);
        assert!(matches!(
            loaded.report.issues(),
            [Issue::Attribute { error: ResolveError::Validation(message), .. }]
                if message == "-1 does not satisfy 'value > 0'"
        ));
        assert!(!loaded.tree.node(NodeId::ROOT).valid);
    }

    #[test]
    fn documents_become_blocks_and_schema() {
        let documents = hcl_documents! {r#"
        type "parameter" {
          title    = "string"
          altitude = "volatile integer"
        }

        base = 10

        contract "first rescue" {
          reward = base * 2
          parameter "orbit" {
            title    = "Reach orbit"
            altitude = "@../reward + 1"
          }
        }
        "#};

        let (root, schema, report) = from_documents(&documents);
        assert!(report.is_valid(), "{report}");
        assert_eq!(root.attributes, vec![("base".to_string(), "10".to_string())]);

        let contract = &root.children[0];
        assert_eq!(contract.kind, "contract");
        assert_eq!(contract.name, "first_rescue");
        assert_eq!(contract.origin.declaration, r#"contract "first rescue""#);
        assert_eq!(
            contract.children[0].attributes[0],
            ("title".to_string(), "Reach orbit".to_string())
        );

        assert_eq!(schema.spec("parameter", "title").value_type, ValueType::String);
        assert!(schema.spec("parameter", "altitude").volatile);
        assert_eq!(schema.spec("contract", "reward"), AttributeSpec::default());
    }

    #[test]
    fn invalid_type_blocks() {
        let documents = hcl_documents! {r#"
        type {}
        type "a" "b" {}
        type "parameter" {
          size = "huge"
        }
        contract "x" {
          type "nested" {}
        }
        "#};

        let (_, _, report) = from_documents(&documents);
        assert_eq!(report.issues().len(), 4);
        assert!(matches!(
            &report.issues()[2],
            Issue::InvalidTypeSpec { attribute, .. } if attribute == "size"
        ));
    }
}
