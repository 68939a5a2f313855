use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not unique: {0}")]
    NotUnique(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("OPML error: {0}")]
    Opml(#[from] opml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown feed type: {0}")]
    FeedType(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Any failure during a feed's fetch, parse or persist cycle.
    #[error("{context}: {original}")]
    Synchronization {
        context: String,
        #[source]
        original: Box<AppError>,
    },

    /// Any failure while turning a raw entry into a stored post.
    #[error("{context}: {original}")]
    Wrangling {
        context: String,
        #[source]
        original: Box<AppError>,
    },

    /// Failure of the optional full page fetch for a wrangled post.
    #[error("{context}: {original}")]
    Fetch {
        context: String,
        #[source]
        original: Box<AppError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn synchronization(context: impl Into<String>, original: AppError) -> Self {
        AppError::Synchronization {
            context: context.into(),
            original: Box::new(original),
        }
    }

    pub fn wrangling(context: impl Into<String>, original: AppError) -> Self {
        AppError::Wrangling {
            context: context.into(),
            original: Box::new(original),
        }
    }

    pub fn fetch(context: impl Into<String>, original: AppError) -> Self {
        AppError::Fetch {
            context: context.into(),
            original: Box::new(original),
        }
    }

    /// Short kind name used as a key in a run's error tally.
    pub fn type_name(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DatabaseError",
            AppError::NotUnique(_) => "NotUniqueError",
            AppError::Io(_) => "IOError",
            AppError::Http(_) => "HTTPError",
            AppError::HttpStatus { .. } => "HTTPStatusError",
            AppError::FeedParse(_) => "FeedParseError",
            AppError::Opml(_) => "OPMLError",
            AppError::Json(_) => "JSONError",
            AppError::Toml(_) => "TOMLError",
            AppError::Config(_) => "ConfigurationError",
            AppError::InvalidUrl(_) => "URLError",
            AppError::InvalidDate(_) => "DateError",
            AppError::Validation(_) => "ValidationError",
            AppError::FeedType(_) => "FeedTypeError",
            AppError::Ingestion(_) => "IngestionError",
            AppError::Synchronization { .. } => "SynchronizationError",
            AppError::Wrangling { .. } => "WranglingError",
            AppError::Fetch { .. } => "FetchError",
            AppError::Other(_) => "Error",
        }
    }

    /// The wrapped cause, if this is one of the pipeline wrappers.
    pub fn original(&self) -> Option<&AppError> {
        match self {
            AppError::Synchronization { original, .. }
            | AppError::Wrangling { original, .. }
            | AppError::Fetch { original, .. } => Some(original),
            _ => None,
        }
    }

    /// Composite kind name, e.g. `WranglingError (ValidationError)`.
    pub fn classify(&self) -> String {
        match self.original() {
            Some(original) => format!("{} ({})", self.type_name(), original.type_name()),
            None => self.type_name().to_string(),
        }
    }

    pub fn is_not_unique(&self) -> bool {
        matches!(self, AppError::NotUnique(_))
    }

    /// True when a wrapped failure was caused by a store uniqueness violation.
    pub fn is_duplicate(&self) -> bool {
        self.is_not_unique() || self.original().is_some_and(AppError::is_not_unique)
    }

    /// Fetch failures belong to the wrangling family.
    pub fn is_wrangling(&self) -> bool {
        matches!(self, AppError::Wrangling { .. } | AppError::Fetch { .. })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        if is_unique_violation(&err) {
            AppError::NotUnique(err.to_string())
        } else {
            AppError::Database(err.to_string())
        }
    }
}

impl From<tokio_rusqlite::Error> for AppError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => e.into(),
            other => AppError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
