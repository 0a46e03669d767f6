//! Blob access: buffered writers that commit on close, and the per-node
//! data-source view layered on top of named binary data.

use std::io::{self, Cursor, Read, Write};

use regex::Regex;
use tracing::warn;

use crate::error::{Result, StorageError};
use crate::id::NodeId;
use crate::storage::AppFileSystemStorage;

type Commit<'a> = Box<dyn FnOnce(Vec<u8>) -> Result<()> + Send + 'a>;

/// Output handle for a blob or streamed attribute.
///
/// Bytes are buffered and only become visible to readers when the writer is
/// closed. [`DataWriter::close`] reports commit failures; dropping the writer
/// commits as well but can only log them.
pub struct DataWriter<'a> {
    buffer: Vec<u8>,
    commit: Option<Commit<'a>>,
}

impl<'a> DataWriter<'a> {
    pub fn new(commit: impl FnOnce(Vec<u8>) -> Result<()> + Send + 'a) -> Self {
        DataWriter {
            buffer: Vec::new(),
            commit: Some(Box::new(commit)),
        }
    }

    /// Start from existing content, used for append mode.
    pub fn with_contents(mut self, contents: Vec<u8>) -> Self {
        self.buffer = contents;
        self
    }

    /// Commit the buffered bytes.
    pub fn close(mut self) -> Result<()> {
        match self.commit.take() {
            Some(commit) => commit(std::mem::take(&mut self.buffer)),
            None => Ok(()),
        }
    }
}

impl Write for DataWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DataWriter<'_> {
    fn drop(&mut self) {
        if let Some(commit) = self.commit.take() {
            if let Err(e) = commit(std::mem::take(&mut self.buffer)) {
                warn!(error = %e, "failed to commit data on drop");
            }
        }
    }
}

impl std::fmt::Debug for DataWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataWriter")
            .field("buffered", &self.buffer.len())
            .field("committed", &self.commit.is_none())
            .finish()
    }
}

/// A small virtual file set: files are addressed either by a suffix and an
/// extension relative to a base name, or by a bare file name.
pub trait DataSource {
    /// Base name that suffix/extension addressed files are named after.
    fn base_name(&self) -> &str;

    fn exists(&self, suffix: Option<&str>, ext: &str) -> Result<bool>;

    fn exists_file(&self, file_name: &str) -> Result<bool>;

    /// Fails with an IO `NotFound` error when the file does not exist.
    fn new_input_stream(&self, suffix: Option<&str>, ext: &str) -> Result<Box<dyn Read + '_>>;

    fn new_input_stream_file(&self, file_name: &str) -> Result<Box<dyn Read + '_>>;

    fn new_output_stream(
        &self,
        suffix: Option<&str>,
        ext: &str,
        append: bool,
    ) -> Result<DataWriter<'_>>;

    fn new_output_stream_file(&self, file_name: &str, append: bool) -> Result<DataWriter<'_>>;

    /// File names matching `pattern`.
    fn list_names(&self, pattern: &Regex) -> Result<Vec<String>>;
}

/// File name of a suffix/extension addressed file.
pub fn data_source_file_name(base_name: &str, suffix: Option<&str>, ext: &str) -> String {
    let mut name = format!("{}{}", base_name, suffix.unwrap_or(""));
    if !ext.is_empty() {
        name.push('.');
        name.push_str(ext);
    }
    name
}

const SUFFIX_EXT_PREFIX: &str = "DATA_SOURCE_SUFFIX_EXT__";
const FILE_NAME_PREFIX: &str = "DATA_SOURCE_FILE_NAME__";

fn invalid_component(kind: &str, value: &str, rule: &str) -> StorageError {
    StorageError::InvalidOperation(format!("data source {} '{}' {}", kind, value, rule))
}

/// Reject attribute names that would make data source keys ambiguous.
///
/// Key components are joined with `__`, so an attribute must not contain
/// the separator nor end with `_`.
pub fn check_data_source_attribute(attribute: &str) -> Result<()> {
    if attribute.is_empty() {
        return Err(invalid_component("attribute", attribute, "must not be empty"));
    }
    if attribute.contains("__") || attribute.ends_with('_') {
        return Err(invalid_component(
            "attribute",
            attribute,
            "must not contain `__` or end with `_`",
        ));
    }
    Ok(())
}

fn check_suffix_ext(suffix: Option<&str>, ext: &str) -> Result<()> {
    if let Some(suffix) = suffix.filter(|s| s.contains("__")) {
        return Err(invalid_component("suffix", suffix, "must not contain `__`"));
    }
    if ext.contains("__") || ext.starts_with('_') {
        return Err(invalid_component(
            "extension",
            ext,
            "must not contain `__` or start with `_`",
        ));
    }
    Ok(())
}

/// Binary data name holding a suffix/extension addressed file.
pub fn suffix_ext_data_name(attribute: &str, suffix: Option<&str>, ext: &str) -> Result<String> {
    check_data_source_attribute(attribute)?;
    check_suffix_ext(suffix, ext)?;
    Ok(format!(
        "{}{}__{}__{}",
        SUFFIX_EXT_PREFIX,
        attribute,
        suffix.unwrap_or(""),
        ext
    ))
}

/// Binary data name holding a file addressed by name.
pub fn file_name_data_name(attribute: &str, file_name: &str) -> Result<String> {
    check_data_source_attribute(attribute)?;
    Ok(format!("{}{}__{}", FILE_NAME_PREFIX, attribute, file_name))
}

/// Recover the file name exposed for a binary data name, if the data
/// belongs to `attribute`.
fn exposed_file_name(attribute: &str, base_name: &str, data_name: &str) -> Option<String> {
    let owned = format!("{}__", attribute);
    if let Some(rest) = data_name.strip_prefix(SUFFIX_EXT_PREFIX) {
        let (suffix, ext) = rest.strip_prefix(&owned)?.rsplit_once("__")?;
        let suffix = (!suffix.is_empty()).then_some(suffix);
        return Some(data_source_file_name(base_name, suffix, ext));
    }
    data_name
        .strip_prefix(FILE_NAME_PREFIX)?
        .strip_prefix(&owned)
        .map(str::to_string)
}

/// Data source stored as binary data of a node.
pub struct NodeDataSource<'a, S: ?Sized> {
    storage: &'a S,
    node: NodeId,
    attribute: String,
    base_name: String,
}

impl<'a, S: AppFileSystemStorage + ?Sized> NodeDataSource<'a, S> {
    pub fn new(
        storage: &'a S,
        node: NodeId,
        attribute: impl Into<String>,
        base_name: impl Into<String>,
    ) -> Self {
        NodeDataSource {
            storage,
            node,
            attribute: attribute.into(),
            base_name: base_name.into(),
        }
    }

    fn read(&self, data_name: &str, display_name: &str) -> Result<Box<dyn Read + '_>> {
        match self.storage.read_binary_data(&self.node, data_name)? {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes))),
            None => Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found in data source of node {}", display_name, self.node),
            ))),
        }
    }

    fn write(&self, data_name: String, append: bool) -> Result<DataWriter<'_>> {
        let existing = if append {
            self.storage
                .read_binary_data(&self.node, &data_name)?
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(self
            .storage
            .write_binary_data(&self.node, &data_name)?
            .with_contents(existing))
    }
}

impl<S: AppFileSystemStorage + ?Sized> DataSource for NodeDataSource<'_, S> {
    fn base_name(&self) -> &str {
        &self.base_name
    }

    fn exists(&self, suffix: Option<&str>, ext: &str) -> Result<bool> {
        self.storage
            .data_exists(&self.node, &suffix_ext_data_name(&self.attribute, suffix, ext)?)
    }

    fn exists_file(&self, file_name: &str) -> Result<bool> {
        self.storage
            .data_exists(&self.node, &file_name_data_name(&self.attribute, file_name)?)
    }

    fn new_input_stream(&self, suffix: Option<&str>, ext: &str) -> Result<Box<dyn Read + '_>> {
        let display = data_source_file_name(&self.base_name, suffix, ext);
        self.read(&suffix_ext_data_name(&self.attribute, suffix, ext)?, &display)
    }

    fn new_input_stream_file(&self, file_name: &str) -> Result<Box<dyn Read + '_>> {
        self.read(&file_name_data_name(&self.attribute, file_name)?, file_name)
    }

    fn new_output_stream(
        &self,
        suffix: Option<&str>,
        ext: &str,
        append: bool,
    ) -> Result<DataWriter<'_>> {
        self.write(suffix_ext_data_name(&self.attribute, suffix, ext)?, append)
    }

    fn new_output_stream_file(&self, file_name: &str, append: bool) -> Result<DataWriter<'_>> {
        self.write(file_name_data_name(&self.attribute, file_name)?, append)
    }

    fn list_names(&self, pattern: &Regex) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .storage
            .data_names(&self.node)?
            .iter()
            .filter_map(|data_name| exposed_file_name(&self.attribute, &self.base_name, data_name))
            .filter(|name| pattern.is_match(name))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
