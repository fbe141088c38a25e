use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinditError {
    #[error("failed to initialize store at {}: {source}", .path.display())]
    StoreInit {
        path: PathBuf,
        #[source]
        source: Box<FinditError>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid regular expression: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("failed to build metadata worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("a crawl is already running on this session")]
    CrawlInProgress,

    #[error("invalid session handle")]
    InvalidHandle,

    #[error("session lock poisoned")]
    LockPoisoned,
}

impl FinditError {
    pub(crate) fn store_init(path: impl Into<PathBuf>, source: impl Into<FinditError>) -> Self {
        FinditError::StoreInit {
            path: path.into(),
            source: Box::new(source.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FinditError>;
