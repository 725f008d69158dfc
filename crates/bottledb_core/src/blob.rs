//! File and image attachments.
//!
//! Blobs are stored beside the record of the entity that holds them:
//!
//! ```text
//! <root>/files/<entity-id>/<name>   # Value::File, addressed by name
//! <root>/imgs/<entity-id>/<sha256>  # Value::Image, addressed by content
//! ```
//!
//! The capsule carries only the name (`{file:report.pdf}`) or hash
//! (`{img:9f86…}`); the bytes are read back when the entity is loaded.

use crate::error::{CoreError, CoreResult};
use sha2::{Digest, Sha256};

/// Which attachment directory a blob lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlobKind {
    /// Name-addressed file.
    File,
    /// Content-addressed image.
    Image,
}

impl BlobKind {
    /// Every kind, in directory order.
    pub const ALL: [Self; 2] = [Self::File, Self::Image];

    /// The capsule head for this kind.
    #[must_use]
    pub const fn head(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Image => "img",
        }
    }
}

/// Attachment bytes plus the name they are stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    name: String,
    bytes: Vec<u8>,
}

impl Blob {
    /// Creates a file blob stored under `name`.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Creates an image blob named by the SHA-256 of its bytes.
    pub fn image(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            name: content_hash(&bytes),
            bytes,
        }
    }

    /// Encodes an item with a codec into a named file blob.
    ///
    /// # Errors
    ///
    /// Returns whatever the codec reports.
    pub fn encode_with<C: BlobCodec>(
        codec: &C,
        name: impl Into<String>,
        item: &C::Item,
    ) -> CoreResult<Self> {
        Ok(Self::new(name, codec.to_bytes(item)?))
    }

    /// Encodes an item with a codec into a content-addressed image blob.
    ///
    /// # Errors
    ///
    /// Returns whatever the codec reports.
    pub fn image_with<C: BlobCodec>(codec: &C, item: &C::Item) -> CoreResult<Self> {
        Ok(Self::image(codec.to_bytes(item)?))
    }

    /// Decodes the bytes with a codec.
    ///
    /// # Errors
    ///
    /// Returns whatever the codec reports.
    pub fn decode_with<C: BlobCodec>(&self, codec: &C) -> CoreResult<C::Item> {
        codec.from_bytes(&self.bytes)
    }

    /// The stored name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Checks that a blob name is a single, plain path component.
pub(crate) fn validate_name(name: &str) -> CoreResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\n', '\r', '\0']);
    if bad {
        return Err(CoreError::invalid_operation(format!(
            "invalid blob name {name:?}"
        )));
    }
    Ok(())
}

/// Converts attachment items to and from bytes.
pub trait BlobCodec {
    /// The in-memory item type.
    type Item;

    /// Serializes an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be represented.
    fn to_bytes(&self, item: &Self::Item) -> CoreResult<Vec<u8>>;

    /// Deserializes an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid item.
    fn from_bytes(&self, bytes: &[u8]) -> CoreResult<Self::Item>;
}

/// Identity codec for raw byte attachments.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes;

impl BlobCodec for RawBytes {
    type Item = Vec<u8>;

    fn to_bytes(&self, item: &Vec<u8>) -> CoreResult<Vec<u8>> {
        Ok(item.clone())
    }

    fn from_bytes(&self, bytes: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 text attachments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Text;

impl BlobCodec for Utf8Text {
    type Item = String;

    fn to_bytes(&self, item: &String) -> CoreResult<Vec<u8>> {
        Ok(item.as_bytes().to_vec())
    }

    fn from_bytes(&self, bytes: &[u8]) -> CoreResult<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CoreError::invalid_format(format!("blob is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_named_by_hash() {
        let blob = Blob::image(b"abc".to_vec());
        assert_eq!(
            blob.name(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(Blob::image(b"abc".to_vec()), blob);
    }

    #[test]
    fn codec_bridge() {
        let blob = Blob::encode_with(&Utf8Text, "note.txt", &"hello".to_string()).unwrap();
        assert_eq!(blob.name(), "note.txt");
        assert_eq!(blob.decode_with(&Utf8Text).unwrap(), "hello");

        let bad = Blob::new("x", vec![0xff, 0xfe]);
        assert!(bad.decode_with(&Utf8Text).is_err());
        assert_eq!(bad.decode_with(&RawBytes).unwrap(), vec![0xff, 0xfe]);
    }

    #[test]
    fn names_are_single_components() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\nb").is_err());
    }
}
