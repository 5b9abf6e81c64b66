use std::fmt;
use thiserror::Error;
use tiktoken_rs::CoreBPE;

pub const FALLBACK_ENCODING: &str = "cl100k_base";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizerError {
    #[error("failed to load encoding {name}: {reason}")]
    Load { name: String, reason: String },
    #[error("tokenization failed: {0}")]
    Encode(String),
}

/// Anything that turns text into a token sequence. Only the length of the
/// sequence is used when budgeting packs.
pub trait Tokenize {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;
}

impl<F> Tokenize for F
where
    F: Fn(&str) -> Result<Vec<u32>, TokenizerError>,
{
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        self(text)
    }
}

/// Which path `TiktokenTokenizer::for_model` took to find an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Model,
    Fallback,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncodingSource::Model => "model",
            EncodingSource::Fallback => "fallback",
        };
        write!(f, "{name}")
    }
}

pub struct TiktokenTokenizer {
    encoding: CoreBPE,
    source: EncodingSource,
}

impl TiktokenTokenizer {
    /// Resolves the encoding registered for `model`; unknown model names fall
    /// back to `cl100k_base`.
    pub fn for_model(model: &str) -> Result<Self, TokenizerError> {
        if let Ok(encoding) = tiktoken_rs::get_bpe_from_model(model) {
            return Ok(Self {
                encoding,
                source: EncodingSource::Model,
            });
        }
        Self::fallback()
    }

    pub fn fallback() -> Result<Self, TokenizerError> {
        let encoding = tiktoken_rs::cl100k_base().map_err(|err| TokenizerError::Load {
            name: FALLBACK_ENCODING.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            encoding,
            source: EncodingSource::Fallback,
        })
    }

    pub fn source(&self) -> EncodingSource {
        self.source
    }

    pub fn count(&self, text: &str) -> usize {
        self.encoding.encode_with_special_tokens(text).len()
    }
}

impl Tokenize for TiktokenTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        Ok(self
            .encoding
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|token| token as u32)
            .collect())
    }
}
