#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("migration failed")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("could not encode stored value")]
    Encoding(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("unknown store type: {0}")]
    UnknownFormat(String),
}
