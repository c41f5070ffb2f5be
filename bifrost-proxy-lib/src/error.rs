#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors that can occur in the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("only {ready} of {total} interfaces are ready")]
    InterfacesNotReady { ready: usize, total: usize },

    #[error("proxy error in one-shot mode, not restarting")]
    OneShot,
}

pub type Result<T> = std::result::Result<T, ProxyError>;
