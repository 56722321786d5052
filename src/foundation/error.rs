pub type MintResult<T> = Result<T, MintError>;

#[derive(thiserror::Error, Debug)]
pub enum MintError {
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error(
        "capacity exceeded: requested {requested} outputs but the catalog yields only {capacity} distinct draws"
    )]
    CapacityExceeded { requested: u64, capacity: u64 },

    #[error("{}missing asset for {category}/{option} ('{image}')", token_prefix(.token_id))]
    MissingAsset {
        token_id: Option<u64>,
        category: String,
        option: String,
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{}persistence failure", token_prefix(.token_id))]
    Persistence {
        token_id: Option<u64>,
        #[source]
        source: anyhow::Error,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn token_prefix(token_id: &Option<u64>) -> String {
    match token_id {
        Some(id) => format!("token #{id}: "),
        None => String::new(),
    }
}

impl MintError {
    pub fn invalid_catalog(msg: impl Into<String>) -> Self {
        Self::InvalidCatalog(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    pub fn persistence(source: impl Into<anyhow::Error>) -> Self {
        Self::Persistence {
            token_id: None,
            source: source.into(),
        }
    }

    /// Attach the token id to errors raised below the orchestrator.
    pub fn with_token(self, id: u64) -> Self {
        match self {
            Self::MissingAsset {
                category,
                option,
                image,
                source,
                ..
            } => Self::MissingAsset {
                token_id: Some(id),
                category,
                option,
                image,
                source,
            },
            Self::Persistence { source, .. } => Self::Persistence {
                token_id: Some(id),
                source,
            },
            other => other,
        }
    }

    pub fn token_id(&self) -> Option<u64> {
        match self {
            Self::MissingAsset { token_id, .. } | Self::Persistence { token_id, .. } => *token_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            MintError::invalid_catalog("x")
                .to_string()
                .contains("invalid catalog:")
        );
        assert!(
            MintError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            MintError::serde("x")
                .to_string()
                .contains("serialization error:")
        );
        let cap = MintError::CapacityExceeded {
            requested: 3,
            capacity: 2,
        };
        assert!(cap.to_string().contains("requested 3"));
        assert!(cap.to_string().contains("only 2"));
    }

    #[test]
    fn with_token_tags_missing_asset() {
        let err = MintError::MissingAsset {
            token_id: None,
            category: "Body".to_string(),
            option: "Original".to_string(),
            image: "Body/Original.png".to_string(),
            source: anyhow::anyhow!("no such file"),
        };
        assert_eq!(err.token_id(), None);
        assert!(!err.to_string().starts_with("token #"));

        let err = err.with_token(7);
        assert_eq!(err.token_id(), Some(7));
        let msg = err.to_string();
        assert!(msg.starts_with("token #7: missing asset for Body/Original"));
        assert!(!msg.contains("no such file"));

        let cause = std::error::Error::source(&err).unwrap();
        assert_eq!(cause.to_string(), "no such file");
    }

    #[test]
    fn report_prints_each_cause_once() {
        let err = MintError::persistence(anyhow::anyhow!("disk full")).with_token(2);
        let report = format!("{:?}", anyhow::Error::new(err));
        assert!(report.starts_with("token #2: persistence failure"));
        assert_eq!(report.matches("disk full").count(), 1);
    }

    #[test]
    fn with_token_leaves_other_kinds_untouched() {
        let err = MintError::validation("count must be > 0").with_token(3);
        assert!(matches!(err, MintError::Validation(_)));
        assert_eq!(err.token_id(), None);
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = MintError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
