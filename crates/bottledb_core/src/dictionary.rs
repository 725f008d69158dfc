//! Type registry persisted in the store's dictionary file.
//!
//! Capsules refer to types by a small integer tag instead of their name.
//! The mapping is append-only: a new type gets the next free index and no
//! index is ever reassigned, so records written by earlier versions of an
//! application stay decodable.
//!
//! File format, one line per type in index order:
//!
//! ```text
//! 0=str
//! 1=shop.Customer
//! 2=shop.Order
//! ```

use crate::error::{CoreError, CoreResult};
use crate::layout::{Layout, DICTIONARY_FILE};
use crate::schema::{validate_type_name, PRIMITIVE_TYPES};
use crate::types::TypeTag;
use bottledb_storage::FileSystem;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Parses dictionary text into names ordered by index.
///
/// # Errors
///
/// Returns [`CoreError::CorruptRecord`] on malformed lines, out-of-order or
/// duplicate indices, and duplicate names.
pub fn parse_dictionary(text: &str) -> CoreResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let corrupt = |message: String| CoreError::corrupt(DICTIONARY_FILE, message);
        let (index, name) = line
            .split_once('=')
            .ok_or_else(|| corrupt(format!("line {}: missing '='", line_no + 1)))?;
        let index: usize = index
            .parse()
            .map_err(|_| corrupt(format!("line {}: bad index {index:?}", line_no + 1)))?;
        if index != names.len() {
            return Err(corrupt(format!(
                "line {}: expected index {}, found {index}",
                line_no + 1,
                names.len()
            )));
        }
        if !PRIMITIVE_TYPES.contains(&name) && validate_type_name(name).is_err() {
            return Err(corrupt(format!("line {}: bad type name {name:?}", line_no + 1)));
        }
        if names.iter().any(|n| n == name) {
            return Err(corrupt(format!("type {name} listed twice")));
        }
        names.push(name.to_string());
    }
    Ok(names)
}

/// Renders names as dictionary text.
#[must_use]
pub fn render_dictionary(names: &[String]) -> String {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{i}={name}\n"))
        .collect()
}

#[derive(Debug, Default)]
struct Names {
    by_tag: Vec<String>,
    by_name: HashMap<String, TypeTag>,
}

/// Bidirectional mapping between type names and tags.
///
/// # Thread Safety
///
/// Lookups take a shared lock. Registering a new name takes the exclusive
/// lock and rewrites the dictionary before the tag is handed out, so a tag
/// is only ever used once it is durable.
#[derive(Debug)]
pub struct TypeRegistry {
    fs: Arc<dyn FileSystem>,
    layout: Layout,
    sync: bool,
    names: RwLock<Names>,
}

impl TypeRegistry {
    /// Loads the dictionary of a store, or starts an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is corrupt.
    pub fn load(fs: Arc<dyn FileSystem>, layout: Layout, sync: bool) -> CoreResult<Self> {
        let mut names = Names::default();
        if let Some(data) = fs.read(&layout.dictionary_path())? {
            let text = String::from_utf8(data)
                .map_err(|_| CoreError::corrupt(DICTIONARY_FILE, "not UTF-8"))?;
            for name in parse_dictionary(&text)? {
                names.by_name.insert(name.clone(), tag_of(names.by_tag.len())?);
                names.by_tag.push(name);
            }
        }
        Ok(Self {
            fs,
            layout,
            sync,
            names: RwLock::new(names),
        })
    }

    /// Returns the tag of `name`, registering it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the dictionary cannot be
    /// written; the name is not registered in that case.
    pub fn index_of(&self, name: &str) -> CoreResult<TypeTag> {
        if let Some(tag) = self.lookup(name) {
            return Ok(tag);
        }
        if !PRIMITIVE_TYPES.contains(&name) {
            validate_type_name(name)?;
        }

        let mut names = self.names.write();
        if let Some(&tag) = names.by_name.get(name) {
            return Ok(tag);
        }
        let tag = tag_of(names.by_tag.len())?;
        names.by_tag.push(name.to_string());
        if let Err(e) = self.persist(&names.by_tag) {
            names.by_tag.pop();
            return Err(e);
        }
        names.by_name.insert(name.to_string(), tag);
        tracing::debug!(tag, name, "registered type");
        Ok(tag)
    }

    /// Returns the tag of a registered name without registering it.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TypeTag> {
        self.names.read().by_name.get(name).copied()
    }

    /// Returns the name registered under `tag`.
    ///
    /// # Errors
    ///
    /// An unknown tag means a record refers to a type this store never
    /// registered: [`CoreError::CorruptRecord`].
    pub fn type_of(&self, tag: TypeTag) -> CoreResult<String> {
        self.names
            .read()
            .by_tag
            .get(tag as usize)
            .cloned()
            .ok_or_else(|| CoreError::corrupt(DICTIONARY_FILE, format!("unknown type index {tag}")))
    }

    /// All registered `(tag, name)` pairs in tag order.
    #[must_use]
    pub fn entries(&self) -> Vec<(TypeTag, String)> {
        self.names
            .read()
            .by_tag
            .iter()
            .enumerate()
            .filter_map(|(i, name)| Some((TypeTag::try_from(i).ok()?, name.clone())))
            .collect()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.read().by_tag.len()
    }

    /// Whether no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, names: &[String]) -> CoreResult<()> {
        let temp = self.layout.dictionary_temp_path();
        self.fs
            .write(&temp, render_dictionary(names).as_bytes(), self.sync)?;
        self.fs.rename(&temp, &self.layout.dictionary_path())?;
        if self.sync {
            self.fs.sync_dir(self.layout.root())?;
        }
        Ok(())
    }
}

fn tag_of(index: usize) -> CoreResult<TypeTag> {
    TypeTag::try_from(index).map_err(|_| CoreError::invalid_format("too many types"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bottledb_storage::MemoryFileSystem;
    use std::path::PathBuf;

    fn registry(fs: &Arc<MemoryFileSystem>) -> TypeRegistry {
        TypeRegistry::load(fs.clone(), Layout::new("/db"), false).unwrap()
    }

    #[test]
    fn registration_is_stable_across_reload() {
        let fs = Arc::new(MemoryFileSystem::new());
        let reg = registry(&fs);
        assert!(reg.is_empty());
        assert_eq!(reg.index_of("shop.Order").unwrap(), 0);
        assert_eq!(reg.index_of("str").unwrap(), 1);
        assert_eq!(reg.index_of("shop.Order").unwrap(), 0);

        let reloaded = registry(&fs);
        assert_eq!(reloaded.lookup("str"), Some(1));
        assert_eq!(reloaded.type_of(0).unwrap(), "shop.Order");
        assert_eq!(reloaded.index_of("shop.Item").unwrap(), 2);

        let text = String::from_utf8(fs.read(&PathBuf::from("/db/dictionary")).unwrap().unwrap())
            .unwrap();
        assert_eq!(text, "0=shop.Order\n1=str\n2=shop.Item\n");
        assert!(!fs.exists(&PathBuf::from("/db/dictionary.tmp")));
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let fs = Arc::new(MemoryFileSystem::new());
        let reg = registry(&fs);
        assert!(matches!(reg.type_of(3), Err(CoreError::CorruptRecord { .. })));
    }

    #[test]
    fn invalid_names_are_not_registered() {
        let fs = Arc::new(MemoryFileSystem::new());
        let reg = registry(&fs);
        assert!(reg.index_of("temp.X").is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn parse_rejects_gaps_and_duplicates() {
        assert_eq!(parse_dictionary("0=a.B\n1=int\n").unwrap(), vec!["a.B", "int"]);
        assert!(parse_dictionary("1=a.B\n").is_err());
        assert!(parse_dictionary("0=a.B\n0=a.C\n").is_err());
        assert!(parse_dictionary("0=a.B\n1=a.B\n").is_err());
        assert!(parse_dictionary("0:a.B\n").is_err());
        assert!(parse_dictionary("x=a.B\n").is_err());
        assert!(parse_dictionary("").unwrap().is_empty());
    }
}
