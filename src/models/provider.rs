use serde::{Deserialize, Serialize};

/// Image-generation provider as configured by the admin process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    pub cost_per_image: f64,
    pub quality_score: i32,
    pub is_active: bool,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, cost_per_image: f64, quality_score: i32) -> Self {
        Self {
            name: name.into(),
            cost_per_image,
            quality_score,
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Per-provider tallies for one worker batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cost: f64,
}
