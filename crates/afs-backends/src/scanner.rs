//! Recognition of plain files as nodes of the local adapter.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use afs_core::{
    data_source_file_name, DataSource, DataWriter, NodeGenericMetadata, PseudoClass, Result,
    StorageError,
};
use regex::Regex;

const BACKEND: &str = "local";

/// Attribute name of the data source attached by [`ExtensionScanner`].
pub const DATA_SOURCE_ATTRIBUTE: &str = "dataSource";

/// What a scanner knows about a recognized file.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub pseudo_class: PseudoClass,
    pub description: String,
    pub metadata: NodeGenericMetadata,
    pub attributes: BTreeMap<String, String>,
    pub data_sources: BTreeMap<String, DirectoryDataSource>,
}

impl LocalFile {
    pub fn new(pseudo_class: impl Into<PseudoClass>) -> Self {
        LocalFile {
            pseudo_class: pseudo_class.into(),
            description: String::new(),
            metadata: NodeGenericMetadata::default(),
            attributes: BTreeMap::new(),
            data_sources: BTreeMap::new(),
        }
    }
}

/// Decides whether a file is exposed as a node.
///
/// Scanners are consulted in order and the first one returning `Some` wins.
/// Files no scanner recognizes stay invisible.
pub trait LocalFileScanner: Send + Sync {
    fn scan(&self, path: &Path) -> Option<LocalFile>;
}

impl<T: LocalFileScanner + ?Sized> LocalFileScanner for Arc<T> {
    fn scan(&self, path: &Path) -> Option<LocalFile> {
        (**self).scan(path)
    }
}

/// Recognizes files by extension.
#[derive(Debug, Clone)]
pub struct ExtensionScanner {
    pseudo_class: PseudoClass,
    format: String,
    description: String,
    extensions: Vec<String>,
}

impl ExtensionScanner {
    pub fn new<I, S>(pseudo_class: impl Into<PseudoClass>, format: impl Into<String>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let format = format.into();
        ExtensionScanner {
            pseudo_class: pseudo_class.into(),
            description: format!("{} file", format),
            format,
            extensions: extensions
                .into_iter()
                .map(|ext| ext.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }
}

impl LocalFileScanner for ExtensionScanner {
    fn scan(&self, path: &Path) -> Option<LocalFile> {
        if !self.matches(path) {
            return None;
        }
        let directory = path.parent()?;
        let base_name = path.file_stem()?.to_str()?;

        let mut file = LocalFile::new(self.pseudo_class.clone());
        file.description = self.description.clone();
        file.attributes
            .insert("format".to_string(), self.format.clone());
        file.attributes
            .insert("description".to_string(), self.description.clone());
        file.data_sources.insert(
            DATA_SOURCE_ATTRIBUTE.to_string(),
            DirectoryDataSource::new(directory, base_name),
        );
        Some(file)
    }
}

/// Read-only data source over the files of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryDataSource {
    directory: PathBuf,
    base_name: String,
}

impl DirectoryDataSource {
    pub fn new(directory: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        DirectoryDataSource {
            directory: directory.into(),
            base_name: base_name.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        if file_name.is_empty()
            || file_name == "."
            || file_name == ".."
            || file_name.contains(['/', '\\'])
        {
            return Err(StorageError::InvalidOperation(format!(
                "'{}' is not a plain file name",
                file_name
            )));
        }
        Ok(self.directory.join(file_name))
    }

    /// Whether `path` resolves to a regular file inside the directory.
    fn contains(&self, path: &Path) -> bool {
        match (path.canonicalize(), self.directory.canonicalize()) {
            (Ok(target), Ok(directory)) => target.starts_with(directory) && target.is_file(),
            _ => false,
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

impl DataSource for DirectoryDataSource {
    fn base_name(&self) -> &str {
        &self.base_name
    }

    fn exists(&self, suffix: Option<&str>, ext: &str) -> Result<bool> {
        self.exists_file(&data_source_file_name(&self.base_name, suffix, ext))
    }

    fn exists_file(&self, file_name: &str) -> Result<bool> {
        Ok(self.contains(&self.resolve(file_name)?))
    }

    fn new_input_stream(&self, suffix: Option<&str>, ext: &str) -> Result<Box<dyn Read + '_>> {
        self.new_input_stream_file(&data_source_file_name(&self.base_name, suffix, ext))
    }

    fn new_input_stream_file(&self, file_name: &str) -> Result<Box<dyn Read + '_>> {
        let path = self.resolve(file_name)?;
        if !self.contains(&path) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found in {}", file_name, self.directory.display()),
            )));
        }
        self.open(&path)
    }

    fn new_output_stream(
        &self,
        _suffix: Option<&str>,
        _ext: &str,
        _append: bool,
    ) -> Result<DataWriter<'_>> {
        Err(StorageError::unsupported("new_output_stream", BACKEND))
    }

    fn new_output_stream_file(&self, _file_name: &str, _append: bool) -> Result<DataWriter<'_>> {
        Err(StorageError::unsupported("new_output_stream_file", BACKEND))
    }

    fn list_names(&self, pattern: &Regex) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if pattern.is_match(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
