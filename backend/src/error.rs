//! Error taxonomy shared by extraction, edit application and the session layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EditError {
    /// Source bytes are not a readable PDF.
    #[error("failed to parse document: {0}")]
    Parse(String),

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// The stable identity no longer resolves after re-extraction.
    #[error("text item {index} not found on page {page}")]
    ItemNotFound { page: u32, index: usize },

    /// Zero or too many candidate literals for a content-stream substitution.
    #[error("no confident match for {needle:?} ({candidates} candidates)")]
    AmbiguousMatch { needle: String, candidates: usize },

    /// A page task was superseded. Callers swallow this.
    #[error("task for page {0} was cancelled")]
    RenderCancelled(u32),

    #[error("pdf backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("scale {value} is outside the supported range {min}..={max}")]
    InvalidScale { value: f64, min: f64, max: f64 },

    #[error("rotation {0} is not a multiple of 90 degrees")]
    InvalidRotation(i64),

    #[error("text cannot be encoded for the target font: {0}")]
    Encoding(String),

    /// The match was found but rewriting it in place would disturb the page.
    #[error("substitution infeasible: {0}")]
    SubstitutionInfeasible(String),

    /// Applied edits are part of the document bytes and cannot be reverted.
    #[error("edit for text item {index} on page {page} is already applied")]
    AlreadyApplied { page: u32, index: usize },

    /// The page shows an external extraction whose items are not editable.
    #[error("page {0} shows an external extraction and is read-only")]
    ReadOnlyPage(u32),

    #[error("document {0} is not open")]
    DocumentNotFound(String),

    #[error("failed to write document: {0}")]
    Write(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EditError {
    /// Short machine-readable name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            EditError::Parse(_) => "parseError",
            EditError::PageOutOfRange { .. } => "pageOutOfRange",
            EditError::ItemNotFound { .. } => "itemNotFound",
            EditError::AmbiguousMatch { .. } => "ambiguousMatch",
            EditError::RenderCancelled(_) => "renderCancelled",
            EditError::BackendUnavailable(_) => "backendUnavailable",
            EditError::InvalidScale { .. } => "invalidScale",
            EditError::InvalidRotation(_) => "invalidRotation",
            EditError::Encoding(_) => "encoding",
            EditError::SubstitutionInfeasible(_) => "substitutionInfeasible",
            EditError::AlreadyApplied { .. } => "alreadyApplied",
            EditError::ReadOnlyPage(_) => "readOnlyPage",
            EditError::DocumentNotFound(_) => "documentNotFound",
            EditError::Write(_) => "writeError",
            EditError::Internal(_) => "internal",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, EditError::RenderCancelled(_))
    }
}

pub type EditResult<T> = std::result::Result<T, EditError>;
