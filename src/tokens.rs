//! Token estimation.
//!
//! The pipeline never needs exact provider-side counts, only a
//! deterministic estimate for budgeting. Two implementations: a BPE
//! estimator wrapping `tiktoken-rs` (cached per encoding) and a cheap
//! heuristic for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tiktoken_rs::CoreBPE;

/// Maps text to a token count. Must be deterministic for a fixed
/// configuration and must never panic on empty or non-ASCII input.
pub trait TokenEstimator {
    fn estimate(&self, text: &str) -> u32;
}

/// `ceil(len / 4)`. Deterministic and setup-free; intended for tests and
/// hosts that do not care about exact budgets.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> u32 {
        (text.len().div_ceil(4)) as u32
    }
}

/// Known encoding families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Cl100kBase,
    O200kBase,
}

impl Encoding {
    fn name(&self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
        }
    }
}

fn bpe_cache() -> &'static Mutex<HashMap<&'static str, Arc<CoreBPE>>> {
    static CACHE: OnceLock<Mutex<HashMap<&'static str, Arc<CoreBPE>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// BPE-backed estimator. Encodings are constructed once per process and
/// shared; `for_model` picks the encoding family from the model id.
#[derive(Clone)]
pub struct BpeEstimator {
    bpe: Arc<CoreBPE>,
}

impl BpeEstimator {
    pub fn for_encoding(encoding: Encoding) -> Self {
        let mut cache = bpe_cache().lock().expect("bpe cache poisoned");
        let bpe = cache
            .entry(encoding.name())
            .or_insert_with(|| {
                let core = match encoding {
                    Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
                    Encoding::O200kBase => tiktoken_rs::o200k_base(),
                }
                .expect("builtin encoding tables");
                Arc::new(core)
            })
            .clone();
        Self { bpe }
    }

    /// Model-id heuristic: o-series and gpt-4o map to o200k, everything
    /// else to cl100k.
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        let encoding = if lower.contains("gpt-4o") || lower.starts_with("o1") || lower.starts_with("o3")
        {
            Encoding::O200kBase
        } else {
            Encoding::Cl100kBase
        };
        Self::for_encoding(encoding)
    }
}

impl std::fmt::Debug for BpeEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeEstimator").finish_non_exhaustive()
    }
}

impl TokenEstimator for BpeEstimator {
    fn estimate(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_rounds_up() {
        let est = HeuristicEstimator;
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("abc"), 1);
        assert_eq!(est.estimate("abcd"), 1);
        assert_eq!(est.estimate("abcde"), 2);
    }

    #[test]
    fn heuristic_handles_non_ascii() {
        let est = HeuristicEstimator;
        // Byte-based: 4 CJK chars are 12 bytes
        assert_eq!(est.estimate("你好世界"), 3);
    }

    #[test]
    fn bpe_empty_is_zero() {
        let est = BpeEstimator::for_encoding(Encoding::Cl100kBase);
        assert_eq!(est.estimate(""), 0);
    }

    #[test]
    fn bpe_is_deterministic_and_cached() {
        let a = BpeEstimator::for_encoding(Encoding::Cl100kBase);
        let b = BpeEstimator::for_encoding(Encoding::Cl100kBase);
        let text = "Dragons breathe fire over the ramparts. 你好";
        assert_eq!(a.estimate(text), b.estimate(text));
        assert!(a.estimate(text) > 0);
    }

    #[test]
    fn model_routing() {
        // Just exercise both paths; counts differ by vocabulary.
        let cl = BpeEstimator::for_model("gpt-4-turbo");
        let o2 = BpeEstimator::for_model("gpt-4o-mini");
        assert!(cl.estimate("hello world") > 0);
        assert!(o2.estimate("hello world") > 0);
    }
}
