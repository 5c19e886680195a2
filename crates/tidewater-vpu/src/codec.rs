//! Persisted format of an [`ExecutionSoup`].
//!
//! A blob is the magic bytes `TWSOUP`, the format version as a big-endian
//! `u16`, and the soup as a JSON document. Polymorphic values in the document
//! carry a `"shape"` string; a [`RemapTable`] rewrites shapes written by an
//! older build to the ones the current build understands before decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::program::Program;
use crate::soup::ExecutionSoup;

pub const MAGIC: &[u8; 6] = b"TWSOUP";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = MAGIC.len() + 2;

/// Name of the discriminator field rewritten by a [`RemapTable`].
pub const SHAPE_FIELD: &str = "shape";

/// A stored blob could not be turned back into a soup.
#[derive(Debug, Error)]
pub enum CorruptStateError {
  #[error("execution state truncated after {len} bytes")]
  Truncated { len: usize },

  #[error("execution state does not start with the soup magic")]
  BadMagic,

  #[error("execution state format {found} is newer than supported format {supported}")]
  UnsupportedVersion { found: u16, supported: u16 },

  #[error("shape '{shape}' cannot be resolved through the remap table")]
  UnresolvedRemap { shape: String },

  #[error("malformed execution state: {0}")]
  Malformed(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("failed to encode execution state: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Substitutions of stored shape identifiers by current ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemapTable {
  replacements: BTreeMap<String, String>,
}

impl RemapTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style [`Self::insert`].
  pub fn with(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
    self.insert(old, new);
    self
  }

  pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
    self.replacements.insert(old.into(), new.into());
  }

  pub fn is_empty(&self) -> bool {
    self.replacements.is_empty()
  }

  /// Follow replacements from `shape` until a shape without a replacement is
  /// reached. Cycles cannot be resolved.
  pub fn resolve<'a>(&'a self, shape: &'a str) -> Result<&'a str, CorruptStateError> {
    let mut current = shape;
    for _ in 0..=self.replacements.len() {
      match self.replacements.get(current) {
        Some(next) => current = next,
        None => return Ok(current),
      }
    }

    Err(CorruptStateError::UnresolvedRemap {
      shape: shape.to_string(),
    })
  }

  fn apply(&self, value: &mut Value) -> Result<(), CorruptStateError> {
    match value {
      Value::Object(map) => {
        for (key, field) in map.iter_mut() {
          if key == SHAPE_FIELD
            && let Value::String(shape) = field
          {
            let resolved = self.resolve(shape)?;
            if resolved != shape.as_str() {
              *shape = resolved.to_string();
            }
          } else {
            self.apply(field)?;
          }
        }
        Ok(())
      }
      Value::Array(items) => items.iter_mut().try_for_each(|item| self.apply(item)),
      _ => Ok(()),
    }
  }
}

/// Serialize a soup into a versioned blob.
pub fn write<P: Program>(soup: &ExecutionSoup<P>) -> Result<Vec<u8>, EncodeError> {
  let mut bytes = Vec::with_capacity(256);
  bytes.extend_from_slice(MAGIC);
  bytes.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
  serde_json::to_writer(&mut bytes, soup)?;
  Ok(bytes)
}

/// Deserialize a blob, remapping stored shapes through `remap` first.
pub fn read<P: Program>(bytes: &[u8], remap: &RemapTable) -> Result<ExecutionSoup<P>, CorruptStateError> {
  if bytes.len() < HEADER_LEN {
    if !MAGIC.starts_with(&bytes[..bytes.len().min(MAGIC.len())]) {
      return Err(CorruptStateError::BadMagic);
    }
    return Err(CorruptStateError::Truncated { len: bytes.len() });
  }

  let (magic, rest) = bytes.split_at(MAGIC.len());
  if magic != MAGIC {
    return Err(CorruptStateError::BadMagic);
  }

  let (version, body) = rest.split_at(2);
  let version = u16::from_be_bytes([version[0], version[1]]);
  if version > FORMAT_VERSION {
    return Err(CorruptStateError::UnsupportedVersion {
      found: version,
      supported: FORMAT_VERSION,
    });
  }

  let mut document: Value = serde_json::from_slice(body).map_err(|e| {
    if e.is_eof() {
      CorruptStateError::Truncated { len: bytes.len() }
    } else {
      CorruptStateError::Malformed(e)
    }
  })?;

  if !remap.is_empty() {
    remap.apply(&mut document)?;
  }

  serde_json::from_value(document).map_err(CorruptStateError::Malformed)
}
