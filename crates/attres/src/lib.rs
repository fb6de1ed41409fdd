//! # attres - deferred attribute resolution
//!
//! ## Introduction for developers
//!
//! Read this to understand how `attres` works internally.
//!
//! ### Blocks and attributes
//!
//! Content is a tree of blocks. Every block has a name and a list of `key = "raw text"` attributes. The raw text of
//! an attribute is either a literal (strings) or an arithmetic expression that may reference other attributes:
//!
//! ```hcl
//! type "parameter" {
//!   altitude = "integer where value > 0"
//! }
//!
//! base = 10
//!
//! contract "first rescue" {
//!   reward = "@orbit/altitude * base"
//!
//!   parameter "orbit" {
//!     altitude = "@../base + 100"
//!   }
//! }
//! ```
//!
//! Attributes may reference each other in any order, `reward` above is declared before `altitude` exists.
//!
//! ### Loading files
//!
//! HCL documents are collected in [hcl_documents::HclDocuments] together with their source path, which shows up in
//! issues later on. [config::from_documents] splits them into the block tree ([config::ConfigBlock]) and the
//! attribute declarations of `type` blocks ([config::Schema]).
//!
//! ### Declaring
//!
//! [config::ConfigLoader] creates one [data_node::DataNode] per block and declares every attribute with
//! [data_node::DataTree::blank_init]. A declared attribute has a type but no value yet. Reading it is not an error,
//! it yields [data_node::LookupError::NotInitialized] naming the key that is missing.
//!
//! ### Resolving
//!
//! Every attribute becomes a [scheduler::AttributeLoad] built by a [config::Factory].
//!
//! 1. phase 1: each load is syntax checked ([expression::Mode::Validate]) and executed right away. A load that reads
//!    a key without a value is parked as [scheduler::DeferredLoad] together with the key it waits for.
//! 2. phase 2: [scheduler::Scheduler::finish] repeatedly runs the oldest parked load whose dependencies are all
//!    resolved. When no such load is left the remaining ones wait for each other and are reported as a single
//!    circular dependency.
//!
//! Failures stay local: a broken attribute marks its node invalid and shows up in the [report::Report], all other
//! attributes are still resolved.
//!
//! ### Paths
//!
//! | **reference**     | **resolves to**                                                      |
//! |-------------------|----------------------------------------------------------------------|
//! | `base`            | `base` of the current node or the closest ancestor declaring it       |
//! | `@orbit/altitude` | `altitude` of child `orbit`, searched from the current node upwards  |
//! | `@../base`        | `base` of the parent                                                 |
//! | `@/base`          | `base` of the root                                                   |
//! | `$time`           | host variable `time`, see [resolver::Environment]                    |
//!
//! ### Determinism
//!
//! Attributes declared `volatile`, and everything computed from them or from `$` variables, are non-deterministic.
//! The scheduler keeps their loads, [scheduler::Scheduler::refresh] recomputes them later on. Deterministic values
//! are computed exactly once.
//!
//! ### Output
//!
//! [data_node::DataTree::to_value] renders the resolved tree as a [value::Value] which gets serialized via [serde].
//!
pub mod config;
pub mod data_node;
pub mod expression;
pub mod hcl_documents;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod token;
pub mod value;
