pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
