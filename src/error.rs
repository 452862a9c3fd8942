use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("set index bits (-s) must be greater than 0")]
    ZeroSetBits,
    #[error("lines per set (-E) must be greater than 0")]
    ZeroLines,
    #[error("block offset bits (-b) must be greater than 0")]
    ZeroBlockBits,
    #[error("s + b must fit in a 64-bit address (s = {s}, b = {b})")]
    AddressTooWide { s: u32, b: u32 },
    #[error("2^{s} sets cannot be allocated on this host")]
    TooManySets { s: u32 },
    #[error("missing required option {0}")]
    Missing(&'static str),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace i/o: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("{0}")]
    Args(#[from] pico_args::Error),
    #[error("unexpected arguments: {0:?}")]
    Unexpected(Vec<std::ffi::OsString>),
    #[error("{path}: {source}")]
    Io { path: String, source: io::Error },
}
