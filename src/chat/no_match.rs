use crate::core::config::KbSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    /// Answer with this text and skip generation.
    ShortCircuit(String),
}

/// What to do when retrieval finds nothing.
#[derive(Debug, Clone, Default)]
pub struct NoMatchPolicy {
    fallback: Option<String>,
}

impl NoMatchPolicy {
    pub fn new(enabled: bool, fallback_text: impl Into<String>) -> Self {
        Self {
            fallback: enabled.then(|| fallback_text.into()),
        }
    }

    pub fn from_settings(settings: &KbSettings) -> Self {
        Self::new(
            settings.no_match_fallback_enabled,
            settings.no_match_fallback_text.clone(),
        )
    }

    pub fn decide(&self, doc_count: usize) -> Decision {
        match (&self.fallback, doc_count) {
            (Some(text), 0) => Decision::ShortCircuit(text.clone()),
            _ => Decision::Proceed,
        }
    }
}
