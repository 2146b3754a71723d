use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported query-DSL / settings shape.
    #[error("{0}")]
    ParsingException(String),

    /// A document value does not match the field's established mapping.
    #[error("field [{field}] was set type to [{expected}] but got a {actual} value")]
    TypeConflict {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    IllegalArgument(String),

    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::ParsingException(msg.into())
    }

    pub fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    pub fn index_not_found(index: &str) -> Self {
        Self::NotFound(format!("index {} does not exists", index))
    }

    /// Elasticsearch error type reported in error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ParsingException(_) => "parsing_exception",
            Self::TypeConflict { .. } => "mapper_parsing_exception",
            Self::NotFound(msg) if msg.starts_with("index ") => "index_not_found_exception",
            Self::NotFound(_) => "resource_not_found_exception",
            Self::IllegalArgument(_) => "illegal_argument_exception",
            Self::EngineFailure(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Tantivy(_)
            | Self::Config(_) => "engine_exception",
        }
    }

    /// HTTP-equivalent status code for the error kind.
    pub fn status(&self) -> u16 {
        match self {
            Self::ParsingException(_) | Self::TypeConflict { .. } | Self::IllegalArgument(_) => 400,
            Self::NotFound(_) => 404,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_engine_failure(&self) -> bool {
        self.status() == 500
    }
}
