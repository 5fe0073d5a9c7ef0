//! Suggestion / Draft advisory records. These are append-only: no field is
//! ever mutated once a record is constructed and persisted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub data_point: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limitations {
    pub assumptions: Vec<String>,
    pub missing_data: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion_id: Uuid,
    pub category: String,
    pub title: String,
    pub message: String,
    pub context: serde_json::Value,
    pub metadata: serde_json::Value,
    /// In `[0, 1]`, computed by a fixed formula per analyzer.
    pub confidence: f64,
    pub reasoning_steps: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub limitations: Limitations,
    /// The execution this suggestion was derived from, if any — carried
    /// through to the guardrail audit trail.
    pub source_execution_id: Option<Uuid>,
    /// Assigned by the guardrail enforcer, not by the analyzer.
    pub requires_human_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DraftStatus {
    #[serde(rename = "DRAFT_ONLY")]
    DraftOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub draft_id: Uuid,
    pub category: String,
    pub confidence: f64,
    pub reasoning_steps: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub limitations: Limitations,
    pub content: serde_json::Value,
    /// Hex-encoded SHA-256 over the content bytes.
    pub content_hash: String,
    pub status: DraftStatus,
}

impl Draft {
    /// Compute a SHA-256 over the canonical JSON-serialized content bytes.
    pub fn hash_content(content: &serde_json::Value) -> String {
        use sha2::{Digest, Sha256};
        let bytes = serde_json::to_vec(content).expect("Value always serializes");
        let digest = Sha256::digest(&bytes);
        hex_encode(&digest)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
