use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

lazy_static! {
    static ref UNSAFE_KEY_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_-]").expect("valid regex");
}

/// One local feature descriptor. All descriptors in a store share one length.
pub type Descriptor = Vec<f32>;

/// Every descriptor extracted from one corpus image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSet {
    /// Corpus-relative path, always `/`-separated, e.g. `cats/tabby.jpg`
    pub identity: String,
    pub vectors: Vec<Descriptor>,
}

impl DescriptorSet {
    pub fn new(identity: impl Into<String>, vectors: Vec<Descriptor>) -> Self {
        Self { identity: identity.into(), vectors }
    }

    pub fn len(&self) -> usize { self.vectors.len() }

    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }

    /// Length of the first vector, or `None` for an empty set.
    pub fn dimension(&self) -> Option<usize> { self.vectors.first().map(|v| v.len()) }

    pub fn storage_key(&self) -> String { storage_key(&self.identity) }
}

/// A scored candidate produced by one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity: String,
    pub score: u32,
}

/// Derive a filesystem-safe record key from an identity.
///
/// The readable prefix replaces separators, dots and anything else outside
/// `[A-Za-z0-9_-]` with `_`. Since that alone maps `a.b` and `a_b` to the same
/// string, a SHA-1 digest of the untouched identity is appended.
pub fn storage_key(identity: &str) -> String {
    let safe = UNSAFE_KEY_CHARS.replace_all(identity, "_");
    let digest = Sha1::digest(identity.as_bytes());
    let mut key = String::with_capacity(safe.len() + 17);
    key.push_str(&safe);
    key.push('-');
    for b in &digest[..8] {
        key.push_str(&format!("{b:02x}"));
    }
    key
}
