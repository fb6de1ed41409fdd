//! collection of hcl documents ([Body] and path to source file)
//!
//! Documents keep their original order, and so do the structures inside them. Attribute order matters to the loader
//! only for deterministic error output, resolution itself is order independent.
use hcl_edit::structure::{Body, Structure};
use std::path::Path;

#[derive(Default, Debug)]
pub struct HclDocuments {
    documents: Vec<(Source, Body)>,
}

impl HclDocuments {
    /// Adds an hcl document
    pub fn insert(&mut self, document: Body, path: impl Into<Option<std::path::PathBuf>>) {
        self.documents.push((path.into(), document));
    }

    /// All root structures of all documents, in load order
    pub fn structures(&self) -> impl Iterator<Item = SourceStructure> {
        self.documents
            .iter()
            .flat_map(|(source, body)| body.iter().map(move |structure| (source, structure)))
    }

    pub fn source_count(&self) -> usize {
        self.documents.len()
    }
}

impl HclDocuments {
    pub fn load_file(&mut self, file_path: &Path) -> Result<(), LoadError> {
        let file_path = file_path.canonicalize()?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path)?;
        let body = hcl_edit::parser::parse_body(&file_contents)?;

        self.insert(body, Some(file_path));
        Ok(())
    }

    /// Loads every `*.hcl` file of a directory, sorted by name
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let mut file_paths = vec![];

        for dir_entry in std::fs::read_dir(dir_path)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            let is_hcl_file = dir_entry.file_name().to_string_lossy().ends_with(".hcl");
            if is_hcl_file {
                file_paths.push(dir_entry.path());
            }
        }

        if file_paths.is_empty() {
            return Err(LoadError::NoFilesFound);
        }

        file_paths.sort();
        for file_path in file_paths {
            self.load_file(&file_path)?;
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No files found in directory")]
    NoFilesFound,
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse hcl file")]
    HclParseFailed(#[from] hcl_edit::parser::Error),
}

impl From<Body> for HclDocuments {
    fn from(value: Body) -> Self {
        let mut documents = HclDocuments::default();
        documents.insert(value, None);
        documents
    }
}

/// Utility macro to create [HclDocuments]
///
/// Create from a single document
/// ```
/// # use attres::hcl_documents;
/// hcl_documents!("attribute = 42");
/// ```
///
/// Create from multiple documents (path required)
/// ```
/// # use attres::hcl_documents;
/// hcl_documents! {
///   "one.hcl" => "attribute_one = 1",
///   "two.hcl" => "attribute_two = 2"
/// };
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use attres::hcl_documents;
/// hcl_documents!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! hcl_documents {
    // single document without source
    { $expr:expr } => {
        $crate::hcl_documents::HclDocuments::from(
            hcl_edit::parser::parse_body($expr).expect("body must parse"),
        )
    };
    // multi document with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut docs = $crate::hcl_documents::HclDocuments::default();
        $(
            docs.insert(
                hcl_edit::parser::parse_body($expr).expect("body must parse"),
                Some(std::path::PathBuf::from($source)),
            );
        )+

        docs
    }};
}

pub type Source = Option<std::path::PathBuf>;
pub type SourceStructure<'a> = (&'a Source, &'a Structure);

#[cfg(test)]
pub(crate) mod test {
    use hcl_edit::structure::Structure;

    #[test]
    fn structures_keep_order_across_documents() {
        let hcl_documents = hcl_documents! {
            "one.hcl" => "attr_1 = 1\none two {}",
            "two.hcl" => "three four five {}\nattr_2 = 2"
        };

        let kinds: Vec<_> = hcl_documents
            .structures()
            .map(|(source, structure)| {
                let source = source.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                (source, matches!(structure, Structure::Attribute(_)))
            })
            .collect();

        assert_eq!(hcl_documents.source_count(), 2);
        assert_eq!(
            kinds,
            vec![
                ("one.hcl".to_string(), true),
                ("one.hcl".to_string(), false),
                ("two.hcl".to_string(), false),
                ("two.hcl".to_string(), true),
            ]
        );
    }
}
