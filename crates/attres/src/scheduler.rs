//! deferred-load scheduler
//!
//! Resolves every attribute of a node tree once, in an order consistent with the references between them, no matter in
//! which order they were declared.
//!
//! **Phase 1** ([Scheduler::load]) runs while the loader walks the configuration top to bottom. Each attribute is
//! syntax checked and then resolved right away. If it reads a key that has no value yet the attempt is parked as a
//! [DeferredLoad], remembering the key it waited for.
//!
//! **Phase 2** ([Scheduler::finish]) drains the parked attempts. Each round drops dependencies that are no longer
//! pending, picks the oldest task without dependencies and runs it again. A task that gets blocked again records the
//! new blocker and goes back to the end of the queue. When tasks remain but every one of them still waits on another
//! pending task, they form a cycle: all of them are reported together and abandoned.
//!
//! Attributes whose value turned out non-deterministic are kept after their first resolution. [Scheduler::refresh]
//! runs exactly those again, in the order they were first resolved, which is also a valid dependency order.
use crate::data_node::{DataTree, NodeId, QualifiedKey};
use crate::report::{Issue, Report};
use crate::resolver::{Environment, Resolve, ResolveError, Resolver, Scope};
use crate::value::Value;
use indexmap::IndexSet;
use std::collections::HashSet;

type Validator = dyn Fn(&Value) -> Result<(), String>;

/// One attribute assignment: which key, from what text, through which resolver
pub struct AttributeLoad {
    pub node: NodeId,
    pub key: String,
    pub raw: String,
    pub resolver: Resolver,
    pub validator: Option<Box<Validator>>,
    /// Always recompute on refresh, regardless of what was read
    pub volatile: bool,
}

impl AttributeLoad {
    pub fn new(
        node: NodeId,
        key: impl Into<String>,
        raw: impl Into<String>,
        resolver: Resolver,
    ) -> Self {
        Self {
            node,
            key: key.into(),
            raw: raw.into(),
            resolver,
            validator: None,
            volatile: false,
        }
    }

    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn validate(mut self, validator: impl Fn(&Value) -> Result<(), String> + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn target(&self) -> QualifiedKey {
        QualifiedKey::new(self.node, self.key.clone())
    }
}

impl std::fmt::Debug for AttributeLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeLoad")
            .field("node", &self.node)
            .field("key", &self.key)
            .field("raw", &self.raw)
            .field("resolver", &self.resolver)
            .field("validator", &self.validator.is_some())
            .field("volatile", &self.volatile)
            .finish()
    }
}

/// A parked attribute and the keys it was found waiting for
#[derive(Debug)]
pub struct DeferredLoad {
    pub load: AttributeLoad,
    pub dependencies: IndexSet<QualifiedKey>,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    /// Oldest first
    pending: Vec<DeferredLoad>,
    /// Non-deterministic attributes in resolution order
    volatile: Vec<AttributeLoad>,
    /// Attributes whose latest attempt failed
    failures: IndexSet<QualifiedKey>,
    /// Nodes found invalid after the load for reasons other than a failed attribute
    invalid_nodes: HashSet<NodeId>,
    report: Report,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: try an attribute now, park it when it reads a key without a value
    #[tracing::instrument(level = "trace", skip_all, fields(key = %load.key))]
    pub fn load(
        &mut self,
        tree: &mut DataTree,
        environment: &dyn Environment,
        load: AttributeLoad,
    ) {
        tree.blank_init(load.node, &load.key, load.resolver.value_type());

        if let Err(error) = load.resolver.validate(&load.raw) {
            self.fail(tree, &load, error);
            return;
        }

        match execute(tree, environment, &load) {
            Ok(executed) => self.resolved(tree, load, executed),
            Err(ResolveError::Blocked(blocker)) => {
                tracing::debug!(
                    attribute = %tree.display_key(&load.target()),
                    waits_for = %tree.display_key(&blocker),
                    "deferred"
                );
                self.pending.push(DeferredLoad {
                    load,
                    dependencies: IndexSet::from([blocker]),
                });
            }
            Err(error) => self.fail(tree, &load, error),
        }
    }

    /// Phase 2: resolve everything that was parked, report cycles
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn finish(&mut self, tree: &mut DataTree, environment: &dyn Environment) -> Report {
        tracing::debug!(pending = self.pending.len(), "resolving deferred loads");

        while !self.pending.is_empty() {
            let pending_keys: HashSet<QualifiedKey> =
                self.pending.iter().map(|task| task.load.target()).collect();
            for task in &mut self.pending {
                task.dependencies.retain(|key| pending_keys.contains(key));
            }

            let ready = self.pending.iter().position(|task| task.dependencies.is_empty());
            let Some(index) = ready else {
                self.circular_dependency(tree);
                break;
            };

            let mut task = self.pending.remove(index);
            match execute(tree, environment, &task.load) {
                Ok(executed) => self.resolved(tree, task.load, executed),
                Err(ResolveError::Blocked(blocker)) if pending_keys.contains(&blocker) => {
                    tracing::debug!(
                        attribute = %tree.display_key(&task.load.target()),
                        waits_for = %tree.display_key(&blocker),
                        "deferred again"
                    );
                    task.dependencies.insert(blocker);
                    self.pending.push(task);
                }
                Err(ResolveError::Blocked(blocker)) => {
                    // nothing is going to assign the blocker anymore
                    let name = tree.display_key(&blocker);
                    self.fail(tree, &task.load, ResolveError::UnknownIdentifier(name));
                }
                Err(error) => self.fail(tree, &task.load, error),
            }
        }

        let failures = &self.failures;
        self.invalid_nodes.extend(
            tree.nodes()
                .filter(|(id, node)| !node.valid && !failures.iter().any(|key| key.node == *id))
                .map(|(id, _)| id),
        );

        tracing::info!(
            volatile = self.volatile.len(),
            issues = self.report.issues().len(),
            "load finished"
        );
        std::mem::take(&mut self.report)
    }

    /// Recompute the non-deterministic attributes, optionally only those at or below `root`
    ///
    /// Validity of every touched node is derived anew: a node recovers once none of its attributes
    /// fails anymore, unless it was broken by the load itself.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn refresh(
        &mut self,
        tree: &mut DataTree,
        environment: &dyn Environment,
        root: Option<NodeId>,
    ) -> Report {
        let mut report = Report::new();
        let mut touched = IndexSet::new();

        for load in &self.volatile {
            if root.is_some_and(|root| !tree.is_within(load.node, root)) {
                continue;
            }

            tracing::trace!(attribute = %tree.display_key(&load.target()), "refresh");
            touched.insert(load.node);
            let error = match execute(tree, environment, load) {
                Ok(Executed { rejected: None, .. }) => {
                    self.failures.shift_remove(&load.target());
                    continue;
                }
                Ok(Executed {
                    rejected: Some(message),
                    ..
                }) => ResolveError::Validation(message),
                Err(error) => error,
            };
            self.failures.insert(load.target());
            report.log(attribute_issue(tree, load, error));
        }

        for node in touched {
            let failing = self.failures.iter().any(|key| key.node == node);
            tree.node_mut(node).valid = !failing && !self.invalid_nodes.contains(&node);
        }

        report
    }

    /// Attempts still waiting, oldest first
    pub fn pending(&self) -> &[DeferredLoad] {
        &self.pending
    }

    /// Parked attempts that belong to one node
    pub fn deferred_for(&self, node: NodeId) -> impl Iterator<Item = &DeferredLoad> {
        self.pending.iter().filter(move |task| task.load.node == node)
    }

    /// Attributes [Scheduler::refresh] recomputes
    pub fn volatile(&self) -> &[AttributeLoad] {
        &self.volatile
    }

    fn resolved(&mut self, tree: &mut DataTree, load: AttributeLoad, executed: Executed) {
        if let Some(message) = executed.rejected {
            self.fail(tree, &load, ResolveError::Validation(message));
        }
        if !executed.deterministic {
            self.volatile.push(load);
        }
    }

    fn fail(&mut self, tree: &mut DataTree, load: &AttributeLoad, error: ResolveError) {
        tree.node_mut(load.node).valid = false;
        self.failures.insert(load.target());
        self.report.log(attribute_issue(tree, load, error));
    }

    fn circular_dependency(&mut self, tree: &mut DataTree) {
        let abandoned = std::mem::take(&mut self.pending);

        let attributes = abandoned
            .iter()
            .map(|task| {
                let blockers = task.dependencies.iter().map(|key| tree.display_key(key)).collect();
                (tree.display_key(&task.load.target()), blockers)
            })
            .collect();

        for task in &abandoned {
            tree.node_mut(task.load.node).valid = false;
            self.failures.insert(task.load.target());
        }

        self.report.log(Issue::CircularDependency { attributes });
    }
}

/// Result of a successful resolution
struct Executed {
    deterministic: bool,
    /// Message of a failed post-condition, the value was stored nonetheless
    rejected: Option<String>,
}

/// Resolve, store and validate one attribute
fn execute(
    tree: &mut DataTree,
    environment: &dyn Environment,
    load: &AttributeLoad,
) -> Result<Executed, ResolveError> {
    let (value, deterministic) = {
        let scope = Scope::new(tree, load.node, environment);
        let value = load.resolver.resolve(&load.raw, &scope)?;
        (value, !load.volatile && !scope.read_volatile())
    };

    // an invalid value is still stored so dependents can proceed
    let rejected = match &load.validator {
        Some(validator) => validator(&value).err(),
        None => None,
    };

    tree.set(load.node, &load.key, value, deterministic)?;

    Ok(Executed {
        deterministic,
        rejected,
    })
}

fn attribute_issue(tree: &DataTree, load: &AttributeLoad, error: ResolveError) -> Issue {
    Issue::Attribute {
        attribute: tree.display_key(&load.target()),
        origin: tree.node(load.node).origin.clone(),
        error,
    }
}
