/// Per-item failure kinds. None of these abort a cycle; they are carried on
/// the audit record as `status = incomplete` plus a reason string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ItemError {
    /// No usable home/away team identity for the event
    #[error("missing_team_id")]
    ResolutionMissing,
    /// One or more odds legs missing or not above 1.0
    #[error("missing_odds")]
    MarketDataIncomplete,
    /// The probability source failed or returned an invalid triple
    #[error("model_error: {0}")]
    ModelEvaluation(String),
    /// Fixture not finished yet; metrics stay null
    #[error("metrics_not_applicable")]
    MetricsNotApplicable,
}

impl ItemError {
    /// Value persisted in the `reason` column.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
