#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeatmapError {
    #[error("invalid heatmap parameters: {0}")]
    InvalidParameters(String),
    #[error("render cancelled")]
    Cancelled,
}
