//! accumulated issues of a load or refresh
use crate::data_node::Origin;
use crate::resolver::ResolveError;

/// Everything that went wrong, attribute failures never abort a load
#[derive(Debug, Default, derive_new::new)]
pub struct Report {
    #[new(default)]
    issues: Vec<Issue>,
}

impl Report {
    pub fn log(&mut self, issue: Issue) {
        tracing::warn!(%issue, "issue found");
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn merge(&mut self, other: Report) {
        self.issues.extend(other.issues);
    }

    /// `Err(self)` when any issue was logged
    pub fn into_result(self) -> Result<(), Report> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::error::Error for Report {}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, issue) in self.issues.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Issue {
    /// A single attribute failed, its siblings are unaffected
    Attribute {
        attribute: String,
        origin: Origin,
        error: ResolveError,
    },
    /// Attributes that wait for each other, with the blockers known for each
    CircularDependency { attributes: Vec<(String, Vec<String>)> },
    /// Two blocks ended up with the same name below the same parent
    DuplicateBlock { path: String, origin: Origin, existing: Origin },
    /// The same attribute key appears twice in one block
    DuplicateAttribute { attribute: String, origin: Origin },
    /// An attribute value the loader cannot turn into text
    UnsupportedValue { attribute: String, origin: Origin },
    /// A `type` block entry that does not describe an attribute
    InvalidTypeSpec { attribute: String, origin: Origin, message: String },
    /// A block the loader does not accept where it appears
    InvalidBlock { origin: Origin, message: String },
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::Attribute {
                attribute,
                origin,
                error,
            } => write!(f, "{attribute} in {origin}: {error}"),
            Issue::CircularDependency { attributes } => {
                write!(f, "circular dependency between {} attributes:", attributes.len())?;
                for (attribute, blockers) in attributes {
                    write!(f, "\n  {attribute} waits for {}", blockers.join(", "))?;
                }
                Ok(())
            }
            Issue::DuplicateBlock {
                path,
                origin,
                existing,
            } => write!(f, "block {path} in {origin} collides with {existing}"),
            Issue::DuplicateAttribute { attribute, origin } => {
                write!(f, "{attribute} in {origin} is defined more than once")
            }
            Issue::UnsupportedValue { attribute, origin } => {
                write!(f, "{attribute} in {origin} has a value that cannot be used as text")
            }
            Issue::InvalidTypeSpec {
                attribute,
                origin,
                message,
            } => write!(f, "type of {attribute} in {origin}: {message}"),
            Issue::InvalidBlock { origin, message } => write!(f, "{origin}: {message}"),
        }
    }
}
