//! Conversation export documents: loading, structural validation and content digests

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Read size for digest computation
const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// A loaded and validated export
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub metadata: DocumentMetadata,
}

/// Summary facts about an export, reported on upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub size: u64,
    pub conversations: usize,
    pub messages: usize,
    pub date_range: Option<(String, String)>,
}

impl Document {
    /// Read and validate a document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::not_found(format!("Document '{}'", path.display()))
            }
            _ => Error::validation(format!("Failed to read '{}': {}", path.display(), e)),
        })?;
        let metadata = inspect(&bytes)?;

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            metadata,
        })
    }
}

/// Validate export structure and extract metadata
pub fn inspect(bytes: &[u8]) -> Result<DocumentMetadata> {
    let root: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::validation(format!("Invalid JSON format: {}", e)))?;

    let conversations = validate_structure(&root)?;

    let messages = conversations
        .iter()
        .map(|conv| message_list(conv).map_or(0, |m| m.len()))
        .sum();

    let mut dates: Vec<&str> = Vec::new();
    for conv in conversations {
        for field in ["created_at", "updated_at"] {
            if let Some(date) = conv.get(field).and_then(Value::as_str) {
                dates.push(date);
            }
        }
    }
    let date_range = match (dates.iter().min(), dates.iter().max()) {
        (Some(min), Some(max)) => Some((min.to_string(), max.to_string())),
        _ => None,
    };

    Ok(DocumentMetadata {
        size: bytes.len() as u64,
        conversations: conversations.len(),
        messages,
        date_range,
    })
}

/// Check the export layout, returning its conversations
pub fn validate_structure(root: &Value) -> Result<&Vec<Value>> {
    let object = root
        .as_object()
        .ok_or_else(|| Error::validation("Invalid JSON: root must be an object"))?;

    let conversations = object
        .get("conversations")
        .ok_or_else(|| Error::validation("Invalid JSON: missing 'conversations' field"))?
        .as_array()
        .ok_or_else(|| Error::validation("Invalid JSON: 'conversations' must be an array"))?;

    if conversations.is_empty() {
        return Err(Error::validation("No conversations found in export"));
    }

    Ok(conversations)
}

/// Messages of a conversation, under either export spelling
pub fn message_list(conversation: &Value) -> Option<&Vec<Value>> {
    conversation
        .get("chat_messages")
        .or_else(|| conversation.get("messages"))
        .and_then(Value::as_array)
}

/// SHA-256 of everything readable from `reader`, as lowercase hex
pub fn digest_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Content digest of a file, read in fixed-size chunks
pub fn content_digest(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    digest_reader(BufReader::with_capacity(DIGEST_CHUNK_SIZE, file))
}

/// Reduce an uploaded filename to a safe single path component.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Only JSON exports are accepted
pub fn is_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
