use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("chat_id_send has {groups} group(s), no group at index {index}")]
    GroupOutOfRange { index: usize, groups: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
