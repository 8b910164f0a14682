use thiserror::Error;

/// Binary schema/decode failures raised by the [codec](crate::codec).
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(String),

    #[error("{extra} trailing bytes after decoding {type_name}")]
    TrailingBytes { type_name: String, extra: usize },

    #[error("unexpected end of buffer while reading {0}")]
    Eof(String),

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("invalid {what}: {detail}")]
    Invalid { what: String, detail: String },
}

impl CodecError {
    pub fn invalid(what: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Invalid {
            what: what.into(),
            detail: detail.to_string(),
        }
    }

    /// Schema violations are fatal to the session; everything else is a
    /// plain decode failure.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVariant(_) | Self::TrailingBytes { .. }
        )
    }
}

/// A per-action decoder failure. Collected into the block's error list
/// under debug, fatal otherwise.
#[derive(Debug, Clone, Error)]
#[error("transaction deserialization failed ({trx_id}): {message}")]
pub struct TxDeserializationError {
    pub trx_id: String,
    pub message: String,
}

/// Pipeline errors, split along the recoverability boundary: transport
/// errors trigger a reconnect, the rest abort the session.
#[derive(Debug, Clone, Error)]
pub enum TranslatorError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("schema: {0}")]
    Schema(CodecError),

    #[error("decode: {0}")]
    Decode(String),

    #[error("block gap: expected {expected}, got {got}")]
    Gap { expected: u32, got: u32 },

    #[error("fork: block {got} at or below last accepted {last}")]
    Fork { got: u32, last: u32 },

    #[error(transparent)]
    TxDeserialization(#[from] TxDeserializationError),

    #[error("sink: {0}")]
    Sink(String),
}

impl TranslatorError {
    /// Whether a reconnect (resuming from `last_accepted + 1`) can
    /// recover. Schema and decoder failures cannot: the same bytes
    /// would fail again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Gap { .. })
    }
}

impl From<CodecError> for TranslatorError {
    fn from(e: CodecError) -> Self {
        if e.is_schema_error() {
            Self::Schema(e)
        } else {
            Self::Decode(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_are_fatal_variants() {
        let e: TranslatorError = CodecError::UnsupportedVariant("signed_block_v0".into()).into();
        assert!(matches!(e, TranslatorError::Schema(_)));
        assert!(!e.is_recoverable());

        let e: TranslatorError = CodecError::Eof("uint32".into()).into();
        assert!(matches!(e, TranslatorError::Decode(_)));
    }
}
