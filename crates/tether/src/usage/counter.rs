//! Token counting.

use std::fmt;

use tiktoken_rs::CoreBPE;
use tracing::warn;

use crate::Message;

/// Deterministic text → token count.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u64;
}

/// `cl100k_base` byte-pair encoding.
///
/// If the encoding cannot be built the counter logs one warning and counts
/// every text as zero tokens.
pub struct BpeTokenCounter {
    bpe: Option<CoreBPE>,
}

impl BpeTokenCounter {
    pub fn cl100k() -> Self {
        let bpe = match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!("cl100k_base encoding unavailable, token counts will be 0: {e}");
                None
            }
        };
        Self { bpe }
    }

    /// Whether counts are real (the encoding loaded).
    pub fn is_available(&self) -> bool {
        self.bpe.is_some()
    }
}

impl Default for BpeTokenCounter {
    fn default() -> Self {
        Self::cl100k()
    }
}

impl fmt::Debug for BpeTokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BpeTokenCounter")
            .field("available", &self.is_available())
            .finish()
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> u64 {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
            None => 0,
        }
    }
}

/// Character-ratio estimate for environments without BPE data.
#[derive(Debug, Clone, Copy)]
pub struct EstimatingTokenCounter {
    chars_per_token: f64,
}

impl EstimatingTokenCounter {
    pub fn new(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }
}

impl Default for EstimatingTokenCounter {
    fn default() -> Self {
        Self::new(3.5)
    }
}

impl TokenCounter for EstimatingTokenCounter {
    fn count(&self, text: &str) -> u64 {
        let chars = text.chars().count();
        (chars as f64 / self.chars_per_token).ceil() as u64
    }
}

/// Flatten an exchange into `"<role>:<content>\n"` per message.
pub fn flatten_messages(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(&message.role.to_string());
        out.push(':');
        out.push_str(&message.content);
        out.push('\n');
    }
    out
}
