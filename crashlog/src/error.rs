use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Report(#[from] crashlog_symbols::Error),

    #[error("Could not read {0}: {1}")]
    FileRead(String, #[source] std::io::Error),

    #[error("Could not parse {0}: {1}")]
    Json(String, #[source] serde_json::Error),
}
