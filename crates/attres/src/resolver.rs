//! typed attribute resolvers
//!
//! A [Resolve] implementation turns the raw text of one attribute into a [Value] of a declared type. The set of
//! resolvers is closed ([Resolver]); anything outside of it goes through [Resolver::Custom].
//!
//! Resolvers read other attributes through a [Scope]. The scope names the node the attribute belongs to and records
//! whether anything non-deterministic was read, so the result can be marked accordingly.
use crate::data_node::{DataTree, LookupError, NodeId, QualifiedKey, StoreError};
use crate::expression::{self, ExpressionError, Identifiers};
use crate::value::{ConversionError, Value, ValueType};
use std::cell::Cell;

/// Host supplied values that may change between refreshes, referenced as `$name`
pub trait Environment {
    fn variable(&self, name: &str) -> Option<f64>;
}

/// No variables at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnvironment;

impl Environment for NoEnvironment {
    fn variable(&self, _name: &str) -> Option<f64> {
        None
    }
}

impl<S: std::hash::BuildHasher> Environment for std::collections::HashMap<String, f64, S> {
    fn variable(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Environment for indexmap::IndexMap<String, f64> {
    fn variable(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// Read access to the tree from the point of view of one node
pub struct Scope<'a> {
    tree: &'a DataTree,
    node: NodeId,
    environment: &'a dyn Environment,
    volatile: Cell<bool>,
}

impl<'a> Scope<'a> {
    pub fn new(tree: &'a DataTree, node: NodeId, environment: &'a dyn Environment) -> Self {
        Self {
            tree,
            node,
            environment,
            volatile: Cell::new(false),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn tree(&self) -> &'a DataTree {
        self.tree
    }

    /// Whether any value read so far was non-deterministic
    pub fn read_volatile(&self) -> bool {
        self.volatile.get()
    }

    /// Mark the value being computed as non-deterministic
    pub fn mark_volatile(&self) {
        self.volatile.set(true);
    }

    /// Resolved value behind a path
    pub fn get(&self, path: &str) -> Result<&'a Value, LookupError> {
        let QualifiedKey { node, key } = self.tree.resolve(self.node, path)?;
        let value = self.tree.get(node, &key)?;
        if !self.tree.is_deterministic(node, &key) {
            self.mark_volatile();
        }
        tracing::trace!(path, %value, "lookup");
        Ok(value)
    }
}

impl Identifiers for Scope<'_> {
    fn lookup(&self, name: &str) -> Result<f64, LookupError> {
        if let Some(variable) = name.strip_prefix('$') {
            self.mark_volatile();
            return self
                .environment
                .variable(variable)
                .ok_or_else(|| LookupError::UnknownVariable(variable.to_string()));
        }

        let value = self.get(name)?;
        value.as_number().ok_or_else(|| LookupError::NotNumeric {
            path: name.to_string(),
            value_type: value
                .value_type()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "block".to_string()),
        })
    }
}

/// Converts the raw text of one attribute into a typed value
pub trait Resolve {
    fn value_type(&self) -> ValueType;

    /// Syntax-only check that must not read any state
    fn validate(&self, _raw: &str) -> Result<(), ResolveError> {
        Ok(())
    }

    fn resolve(&self, raw: &str, scope: &Scope<'_>) -> Result<Value, ResolveError>;
}

type ResolveFn = dyn Fn(&str, &Scope<'_>) -> Result<Value, ResolveError>;

/// The resolvers known to the loader
pub enum Resolver {
    /// Plain literal of the given type, no expressions
    Literal(ValueType),
    /// Expression producing a number converted into the given type
    Expression(ValueType),
    /// Conversion supplied by the caller
    Custom {
        value_type: ValueType,
        resolve: Box<ResolveFn>,
    },
}

impl Resolver {
    /// The default resolver for a type: strings are literals, everything else an expression
    pub fn for_type(value_type: ValueType) -> Self {
        if value_type.is_numeric() {
            Resolver::Expression(value_type)
        } else {
            Resolver::Literal(value_type)
        }
    }

    pub fn custom(
        value_type: ValueType,
        resolve: impl Fn(&str, &Scope<'_>) -> Result<Value, ResolveError> + 'static,
    ) -> Self {
        Resolver::Custom {
            value_type,
            resolve: Box::new(resolve),
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolver::Literal(t) => write!(f, "Literal({t})"),
            Resolver::Expression(t) => write!(f, "Expression({t})"),
            Resolver::Custom { value_type, .. } => write!(f, "Custom({value_type})"),
        }
    }
}

impl Resolve for Resolver {
    fn value_type(&self) -> ValueType {
        match self {
            Resolver::Literal(t) | Resolver::Expression(t) => *t,
            Resolver::Custom { value_type, .. } => *value_type,
        }
    }

    fn validate(&self, raw: &str) -> Result<(), ResolveError> {
        match self {
            Resolver::Expression(_) => expression::validate(raw).map_err(ResolveError::from),
            Resolver::Literal(_) | Resolver::Custom { .. } => Ok(()),
        }
    }

    fn resolve(&self, raw: &str, scope: &Scope<'_>) -> Result<Value, ResolveError> {
        match self {
            Resolver::Literal(value_type) => Ok(value_type.parse_literal(raw)?),
            Resolver::Expression(value_type) => {
                let number = expression::evaluate(raw, scope)?;
                Ok(value_type.from_number(number)?)
            }
            Resolver::Custom { resolve, .. } => resolve(raw, scope),
        }
    }
}

/// Why a single attribute could not be resolved
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// Forward reference, retried once the key has a value
    #[error("waiting for '{}'", .0.key)]
    Blocked(QualifiedKey),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("{0}")]
    Syntax(ExpressionError),
    #[error(transparent)]
    Lookup(LookupError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Validation(String),
}

impl From<LookupError> for ResolveError {
    fn from(error: LookupError) -> Self {
        match error {
            LookupError::NotInitialized(key) => ResolveError::Blocked(key),
            LookupError::Unknown(name) => ResolveError::UnknownIdentifier(name),
            other => ResolveError::Lookup(other),
        }
    }
}

impl From<ExpressionError> for ResolveError {
    fn from(error: ExpressionError) -> Self {
        match error {
            ExpressionError::Lookup { source, .. } => source.into(),
            syntax @ ExpressionError::Syntax { .. } => ResolveError::Syntax(syntax),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_node::Origin;
    use pretty_assertions::assert_eq;

    fn tree() -> (DataTree, NodeId) {
        let mut tree = DataTree::new(Origin::default());
        let contract = tree.add_child(NodeId::ROOT, "contract", Origin::default()).unwrap();
        tree.blank_init(NodeId::ROOT, "base", ValueType::Integer);
        tree.blank_init(NodeId::ROOT, "title", ValueType::String);
        tree.blank_init(contract, "later", ValueType::Decimal);
        tree.set(NodeId::ROOT, "base", Value::Integer(40), true).unwrap();
        tree.set(NodeId::ROOT, "title", "Rescue".into(), true).unwrap();
        (tree, contract)
    }

    #[test]
    fn expression_resolver() {
        let (tree, contract) = tree();
        let scope = Scope::new(&tree, contract, &NoEnvironment);
        let resolver = Resolver::for_type(ValueType::Integer);

        assert_eq!(resolver.resolve("@base / 3", &scope), Ok(Value::Integer(13)));
        assert!(!scope.read_volatile());
    }

    #[test]
    fn blocked_on_uninitialized() {
        let (tree, contract) = tree();
        let scope = Scope::new(&tree, contract, &NoEnvironment);
        assert_eq!(
            Resolver::for_type(ValueType::Decimal).resolve("later + 1", &scope),
            Err(ResolveError::Blocked(QualifiedKey::new(contract, "later".into())))
        );
        assert_eq!(
            Resolver::for_type(ValueType::Decimal).resolve("missing + 1", &scope),
            Err(ResolveError::UnknownIdentifier("missing".into()))
        );
    }

    #[test]
    fn strings_are_not_numbers() {
        let (tree, contract) = tree();
        let scope = Scope::new(&tree, contract, &NoEnvironment);
        assert!(matches!(
            Resolver::for_type(ValueType::Decimal).resolve("title * 2", &scope),
            Err(ResolveError::Lookup(LookupError::NotNumeric { .. }))
        ));
    }

    #[test]
    fn environment_marks_volatile() {
        let (tree, contract) = tree();
        let mut environment = std::collections::HashMap::new();
        environment.insert("time".to_string(), 12.5);
        let scope = Scope::new(&tree, contract, &environment);

        assert_eq!(
            Resolver::for_type(ValueType::Decimal).resolve("$time * 2", &scope),
            Ok(Value::Decimal(25.0))
        );
        assert!(scope.read_volatile());
        assert_eq!(
            Resolver::for_type(ValueType::Decimal).resolve("$nope", &scope),
            Err(ResolveError::Lookup(LookupError::UnknownVariable("nope".into())))
        );
    }

    #[test]
    fn validate_only_checks_syntax() {
        let resolver = Resolver::for_type(ValueType::Decimal);
        assert!(resolver.validate("anything + at_all").is_ok());
        assert!(matches!(resolver.validate("1 +"), Err(ResolveError::Syntax(_))));
        assert!(Resolver::for_type(ValueType::String).validate("1 +").is_ok());
    }

    #[test]
    fn custom_resolver() {
        let (tree, contract) = tree();
        let scope = Scope::new(&tree, contract, &NoEnvironment);
        let resolver = Resolver::custom(ValueType::String, |raw, scope| {
            let title = scope.get("title")?;
            Ok(Value::String(format!("{title}: {raw}")))
        });
        assert_eq!(resolver.value_type(), ValueType::String);
        assert_eq!(
            resolver.resolve("part one", &scope),
            Ok(Value::String("\"Rescue\": part one".into()))
        );
    }
}
