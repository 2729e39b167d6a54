//! Composite chunk identifiers and payload checksums

use sha2::{Digest, Sha256};

/// The externally quoted identifier of a chunk: `<baseId>:<chunkIndex>`
///
/// The base id may itself contain colons (URLs routinely do), so parsing
/// splits on the LAST colon and the index must be a non-negative integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkId {
    pub base_id: String,
    pub index: i32,
}

impl ChunkId {
    pub fn new(base_id: impl Into<String>, index: i32) -> Self {
        Self {
            base_id: base_id.into(),
            index,
        }
    }

    /// Parse a composite chunk id
    ///
    /// # Errors
    ///
    /// Returns a message describing the malformation when the input has no
    /// colon, an empty base id, or a non-numeric / negative index.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some((base_id, index_part)) = raw.rsplit_once(':') else {
            return Err(format!("chunk id '{raw}' is missing the ':<index>' suffix"));
        };
        if base_id.is_empty() {
            return Err(format!("chunk id '{raw}' has an empty base id"));
        }
        let index: i32 = index_part
            .parse()
            .map_err(|_| format!("chunk id '{raw}' has a non-numeric index '{index_part}'"))?;
        if index < 0 {
            return Err(format!("chunk id '{raw}' has a negative index"));
        }
        Ok(Self {
            base_id: base_id.to_string(),
            index,
        })
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.base_id, self.index)
    }
}

/// Stable checksum over a document's chunk texts
///
/// The checksum changes whenever any chunk text changes, giving callers a
/// cheap way to detect stale cached payloads.
pub fn payload_checksum<S: AsRef<str>>(texts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for text in texts {
        hasher.update(text.as_ref().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
