#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A node or input slot named by the binding spec does not exist in the
    /// workflow template.
    #[error("Workflow schema mismatch: node '{node}' has no input '{input}'")]
    SchemaMismatch { node: String, input: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The workflow template or binding file could not be read or parsed.
    #[error("Template error: {0}")]
    Template(String),
}
