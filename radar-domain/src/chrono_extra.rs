use chrono::Duration;

pub trait DurationExt {
    fn truncate_to_seconds(&self) -> Duration;
    /// Negative durations clamp to zero instead of failing.
    fn to_std_saturating(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn truncate_to_seconds(&self) -> Duration {
        Duration::seconds(self.num_seconds())
    }

    fn to_std_saturating(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
