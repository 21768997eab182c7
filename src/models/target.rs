use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Marker found in image URLs that are stand-ins rather than real images.
pub const PLACEHOLDER_MARKER: &str = "placeholder";

/// Catalog entity kinds that carry an `image_url`.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetKind {
    PlantType,
    PlantPart,
    Product,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Catalog table holding entities of this kind.
    pub fn table(self) -> &'static str {
        match self {
            TargetKind::PlantType => "hemp_plant_types",
            TargetKind::PlantPart => "plant_parts",
            TargetKind::Product => "uses_products",
        }
    }
}

/// Reference from a job to the entity that receives its image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: i64,
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A plant type, plant part or product row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetEntity {
    pub kind: TargetKind,
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl TargetEntity {
    pub fn target_ref(&self) -> TargetRef {
        TargetRef {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn needs_image(&self) -> bool {
        needs_image(self.image_url.as_deref())
    }
}

/// An image is missing when the URL is absent, blank or a placeholder.
pub fn needs_image(image_url: Option<&str>) -> bool {
    match image_url.map(str::trim) {
        None | Some("") => true,
        Some(url) => url.to_lowercase().contains(PLACEHOLDER_MARKER),
    }
}

/// How many entities of a kind already have a real image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageCoverage {
    pub kind: TargetKind,
    pub total: i64,
    pub with_image: i64,
}
