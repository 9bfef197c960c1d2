//! Token estimation for LLM context budgeting
//!
//! Exact counts come from tiktoken BPE encodings (cl100k_base by default).
//! When an encoding cannot be loaded, or when the exact backend is disabled,
//! a deterministic character-class heuristic is used instead and the
//! estimator reports itself as approximate.
//!
//! Usage:
//! ```rust
//! use contextor::core::tokenizer::{TokenEstimator, TokenModel};
//!
//! let estimator = TokenEstimator::new(TokenModel::default());
//! let tokens = estimator.estimate("Hello world");
//! assert!(tokens > 0);
//!
//! // Approximate counting only
//! let fast = TokenEstimator::heuristic();
//! assert!(!fast.is_exact());
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

/// Supported token models/encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TokenModel {
    /// cl100k_base encoding (GPT-4, GPT-3.5-turbo, Claude 3)
    #[default]
    Cl100k,
    /// o200k_base encoding (GPT-4o native)
    O200k,
    /// GPT-4 / GPT-4-turbo (alias for Cl100k)
    Gpt4,
    /// GPT-4o (alias for O200k)
    Gpt4o,
    /// GPT-3.5-turbo (alias for Cl100k)
    Gpt35Turbo,
    /// Claude 3 / 3.5 (approximated with Cl100k)
    Claude3,
    /// Fast heuristic estimation (no BPE encoding)
    Heuristic,
}

impl TokenModel {
    /// The BPE encoding family backing this model, if any
    fn encoding(&self) -> Option<Encoding> {
        match self {
            TokenModel::O200k | TokenModel::Gpt4o => Some(Encoding::O200k),
            TokenModel::Cl100k
            | TokenModel::Gpt4
            | TokenModel::Gpt35Turbo
            | TokenModel::Claude3 => Some(Encoding::Cl100k),
            TokenModel::Heuristic => None,
        }
    }

    /// List all available models
    pub fn available_models() -> &'static [&'static str] {
        &[
            "cl100k",
            "o200k",
            "gpt4",
            "gpt4o",
            "gpt35",
            "claude3",
            "heuristic",
        ]
    }
}

impl fmt::Display for TokenModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenModel::Cl100k => "cl100k",
            TokenModel::O200k => "o200k",
            TokenModel::Gpt4 => "gpt4",
            TokenModel::Gpt4o => "gpt4o",
            TokenModel::Gpt35Turbo => "gpt35",
            TokenModel::Claude3 => "claude3",
            TokenModel::Heuristic => "heuristic",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TokenModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cl100k" | "cl100k_base" | "default" => Ok(TokenModel::Cl100k),
            "o200k" | "o200k_base" => Ok(TokenModel::O200k),
            "gpt4" | "gpt-4" | "gpt-4-turbo" => Ok(TokenModel::Gpt4),
            "gpt4o" | "gpt-4o" => Ok(TokenModel::Gpt4o),
            "gpt35" | "gpt-3.5" | "gpt-3.5-turbo" => Ok(TokenModel::Gpt35Turbo),
            "claude" | "claude3" | "claude-3" | "claude-3.5" => Ok(TokenModel::Claude3),
            "heuristic" | "fast" | "estimate" => Ok(TokenModel::Heuristic),
            _ => Err(format!(
                "Unknown model: {}. Available: {}",
                s,
                TokenModel::available_models().join(", ")
            )),
        }
    }
}

impl TryFrom<String> for TokenModel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TokenModel> for String {
    fn from(model: TokenModel) -> Self {
        model.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Cl100k,
    O200k,
}

impl Encoding {
    fn name(&self) -> &'static str {
        match self {
            Encoding::Cl100k => "cl100k_base",
            Encoding::O200k => "o200k_base",
        }
    }

    fn load(&self) -> &'static Result<CoreBPE, String> {
        match self {
            Encoding::Cl100k => &CL100K_BPE,
            Encoding::O200k => &O200K_BPE,
        }
    }
}

// Loaded once per process on first use; the probe result is reused by every
// estimator built afterwards.
static CL100K_BPE: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| cl100k_base().map_err(|e| format!("Failed to load cl100k_base: {}", e)));

static O200K_BPE: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| o200k_base().map_err(|e| format!("Failed to load o200k_base: {}", e)));

/// Name reported for the heuristic backend
pub const HEURISTIC_ENCODING: &str = "heuristic";

/// A token count tagged with the backend that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub tokens: usize,
    pub exact: bool,
}

/// Token counter with a resolved backend
///
/// The backend is chosen once in the constructor. Afterwards `estimate` is a
/// pure function of its input and the estimator can be shared freely across
/// worker threads.
#[derive(Clone)]
pub struct TokenEstimator {
    model: TokenModel,
    bpe: Option<&'static CoreBPE>,
    encoding_name: &'static str,
    fallback_reason: Option<String>,
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("model", &self.model)
            .field("encoding", &self.encoding_name)
            .field("exact", &self.is_exact())
            .finish()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(TokenModel::default())
    }
}

impl TokenEstimator {
    /// Resolve the backend for `model`, falling back to the heuristic when the
    /// encoding cannot be loaded
    pub fn new(model: TokenModel) -> Self {
        let Some(encoding) = model.encoding() else {
            return Self::heuristic();
        };

        match encoding.load() {
            Ok(bpe) => Self {
                model,
                bpe: Some(bpe),
                encoding_name: encoding.name(),
                fallback_reason: None,
            },
            Err(e) => {
                tracing::warn!(
                    model = %model,
                    error = %e,
                    "exact token backend unavailable, using heuristic estimates"
                );
                Self {
                    model,
                    bpe: None,
                    encoding_name: HEURISTIC_ENCODING,
                    fallback_reason: Some(e.clone()),
                }
            }
        }
    }

    /// Estimator with the exact backend disabled
    pub fn heuristic() -> Self {
        Self {
            model: TokenModel::Heuristic,
            bpe: None,
            encoding_name: HEURISTIC_ENCODING,
            fallback_reason: None,
        }
    }

    /// Whether counts come from a real BPE encoding
    pub fn is_exact(&self) -> bool {
        self.bpe.is_some()
    }

    /// The requested model
    pub fn model(&self) -> TokenModel {
        self.model
    }

    /// Name of the active encoding ("heuristic" when approximate)
    pub fn encoding_name(&self) -> &'static str {
        self.encoding_name
    }

    /// Why the exact backend was not used, when it was requested but failed
    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    /// Count tokens in `text`; blank text counts as zero
    pub fn estimate(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }

        match self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate_tokens_heuristic(text),
        }
    }

    /// Count tokens in `text` and tag the result with its exactness
    pub fn estimate_tagged(&self, text: &str) -> TokenEstimate {
        TokenEstimate {
            tokens: self.estimate(text),
            exact: self.is_exact(),
        }
    }
}

/// Availability of one BPE encoding
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probe every BPE encoding the estimator can use
pub fn backend_status() -> Vec<BackendStatus> {
    [
        (Encoding::Cl100k, "cl100k_base (GPT-4/Claude)"),
        (Encoding::O200k, "o200k_base (GPT-4o)"),
    ]
    .into_iter()
    .map(|(encoding, label)| match encoding.load() {
        Ok(_) => BackendStatus {
            name: label.to_string(),
            available: true,
            error: None,
        },
        Err(e) => BackendStatus {
            name: label.to_string(),
            available: false,
            error: Some(e.clone()),
        },
    })
    .collect()
}

/// Characters that usually split into short tokens in source code
const CODE_SYMBOLS: &str = "()[]{}<>=+-*/%&|^!~?:;,.@#$\\\"'`";

/// Ideographs, kana, hangul and fullwidth forms
const CJK_RANGES: [(u32, u32); 7] = [
    (0x3000, 0x303F),
    (0x3040, 0x309F),
    (0x30A0, 0x30FF),
    (0x3400, 0x4DBF),
    (0x4E00, 0x9FFF),
    (0xAC00, 0xD7AF),
    (0xFF00, 0xFFEF),
];

fn is_cjk_char(c: char) -> bool {
    let cp = c as u32;
    CJK_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&cp))
}

/// Estimate tokens without a BPE encoding
///
/// Plain ASCII and whitespace count ~4 chars per token, code symbols ~2,
/// CJK ~1.5 and any other Unicode ~2. Each class is rounded up separately.
pub fn estimate_tokens_heuristic(text: &str) -> usize {
    // [plain, symbol, cjk, other]
    let mut counts = [0usize; 4];
    for c in text.chars() {
        let class = if c.is_ascii() {
            usize::from(CODE_SYMBOLS.contains(c))
        } else if is_cjk_char(c) {
            2
        } else {
            3
        };
        counts[class] += 1;
    }

    let [plain, symbol, cjk, other] = counts;
    plain.div_ceil(4) + symbol.div_ceil(2) + (cjk * 2).div_ceil(3) + other.div_ceil(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_empty() {
        assert_eq!(TokenEstimator::default().estimate(""), 0);
        assert_eq!(TokenEstimator::heuristic().estimate(""), 0);
    }

    #[test]
    fn test_estimate_blank_is_zero() {
        for text in [" ", "\n\n", "\t  \r\n"] {
            assert_eq!(TokenEstimator::default().estimate(text), 0);
            assert_eq!(TokenEstimator::heuristic().estimate(text), 0);
        }
        assert!(TokenEstimator::heuristic().estimate("  x  ") > 0);
    }

    #[test]
    fn test_estimate_exact_ascii() {
        let estimator = TokenEstimator::new(TokenModel::Cl100k);
        assert!(estimator.is_exact());
        assert_eq!(estimator.encoding_name(), "cl100k_base");
        let tokens = estimator.estimate("Hello, world!");
        assert!(tokens > 0 && tokens < 10);
    }

    #[test]
    fn test_estimate_o200k() {
        let estimator = TokenEstimator::new(TokenModel::Gpt4o);
        assert_eq!(estimator.encoding_name(), "o200k_base");
        assert!(estimator.estimate("Hello 你好 World 世界") > 0);
    }

    #[test]
    fn test_heuristic_model_is_not_exact() {
        let estimator = TokenEstimator::new(TokenModel::Heuristic);
        assert!(!estimator.is_exact());
        assert_eq!(estimator.encoding_name(), HEURISTIC_ENCODING);
        assert!(estimator.fallback_reason().is_none());
    }

    #[test]
    fn test_fallback_never_fails() {
        let estimator = TokenEstimator::heuristic();
        assert!(!estimator.is_exact());
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("a"), 1);

        let large = "abcdefghij".repeat(10_000);
        assert_eq!(large.chars().count(), 100_000);
        assert_eq!(estimator.estimate(&large), 25_000);
    }

    #[test]
    fn test_estimate_tagged() {
        let tagged = TokenEstimator::heuristic().estimate_tagged("fn main() {}");
        assert!(!tagged.exact);
        assert!(tagged.tokens > 0);

        let exact = TokenEstimator::new(TokenModel::Cl100k).estimate_tagged("fn main() {}");
        assert!(exact.exact);
    }

    #[test]
    fn test_heuristic_ascii() {
        let tokens = estimate_tokens_heuristic("Hello world, this is a test.");
        assert!((5..=12).contains(&tokens));
    }

    #[test]
    fn test_heuristic_cjk() {
        let tokens = estimate_tokens_heuristic("这是一个测试文档");
        assert!((4..=8).contains(&tokens));
    }

    #[test]
    fn test_heuristic_is_deterministic() {
        let text = "Mixed 混合 content テスト { x => y }";
        assert_eq!(
            estimate_tokens_heuristic(text),
            estimate_tokens_heuristic(text)
        );
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!("cl100k".parse::<TokenModel>().unwrap(), TokenModel::Cl100k);
        assert_eq!("gpt-4o".parse::<TokenModel>().unwrap(), TokenModel::Gpt4o);
        assert_eq!("FAST".parse::<TokenModel>().unwrap(), TokenModel::Heuristic);
        assert!("unknown".parse::<TokenModel>().is_err());
    }

    #[test]
    fn test_model_display() {
        assert_eq!(TokenModel::Cl100k.to_string(), "cl100k");
        assert_eq!(TokenModel::Gpt35Turbo.to_string(), "gpt35");
    }

    #[test]
    fn test_backend_status_lists_encodings() {
        let status = backend_status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.available || s.error.is_some()));
    }

    #[test]
    fn test_is_cjk_char() {
        assert!(is_cjk_char('中'));
        assert!(is_cjk_char('あ'));
        assert!(is_cjk_char('한'));
        assert!(!is_cjk_char('a'));
    }

    #[test]
    fn test_heuristic_vs_tiktoken_approximation() {
        let estimator = TokenEstimator::new(TokenModel::Cl100k);
        let texts = [
            "Hello, world!",
            "This is a longer piece of English text for testing.",
            "fn main() { println!(\"test\"); }",
        ];

        for text in texts {
            let exact = estimator.estimate(text);
            let heuristic = estimate_tokens_heuristic(text);
            let ratio = heuristic as f64 / exact.max(1) as f64;
            assert!(
                (0.5..=2.0).contains(&ratio),
                "Heuristic too far from tiktoken for '{}': {} vs {}",
                text,
                heuristic,
                exact
            );
        }
    }
}
