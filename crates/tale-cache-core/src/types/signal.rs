//! Invalidation signal wire format
//!
//! Shared by the server endpoint and the client poller.

use serde::{Deserialize, Serialize};

/// What the client should do with its local cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instructions {
    #[serde(default)]
    pub clear_all: bool,
}

/// Answer to an invalidation poll
///
/// `{ "success": bool, "instructions": { "clearAll": bool }, "generation": n }`.
/// Anything other than `success && clearAll` means "no invalidation".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    pub success: bool,
    #[serde(default)]
    pub instructions: Instructions,
    /// Server generation at the time of the answer; clients echo it back as
    /// `since` on the next poll
    #[serde(default)]
    pub generation: u64,
}

impl SignalResponse {
    pub fn new(clear_all: bool, generation: u64) -> Self {
        Self {
            success: true,
            instructions: Instructions { clear_all },
            generation,
        }
    }

    /// A response the client must ignore
    pub fn failed() -> Self {
        Self::default()
    }

    /// Whether the client should drop everything it holds
    pub fn should_clear(&self) -> bool {
        self.success && self.instructions.clear_all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(SignalResponse::new(true, 7)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "instructions": {"clearAll": true}, "generation": 7})
        );
    }

    #[test]
    fn test_minimal_payload_parses() {
        let parsed: SignalResponse =
            serde_json::from_str(r#"{"success":true,"instructions":{"clearAll":true}}"#).unwrap();
        assert!(parsed.should_clear());
        assert_eq!(parsed.generation, 0);
    }

    #[test]
    fn test_failure_never_clears() {
        let parsed: SignalResponse =
            serde_json::from_str(r#"{"success":false,"instructions":{"clearAll":true}}"#).unwrap();
        assert!(!parsed.should_clear());
        assert!(!SignalResponse::failed().should_clear());
    }
}
