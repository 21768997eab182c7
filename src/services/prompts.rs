use strsim::jaro_winkler;

use crate::models::job::NewJob;
use crate::models::target::{TargetEntity, TargetKind};

/// Names closer than this reuse the matched template.
const NEAR_MATCH_THRESHOLD: f64 = 0.92;

pub const NEGATIVE_PROMPT: &str =
    "text, watermark, logo, blurry, low quality, distorted, cartoon, people, faces";

const PLANT_TYPE_TEMPLATES: &[(&str, &str)] = &[
    (
        "Fiber Hemp",
        "Tall industrial fiber hemp plants growing densely in a field, slender stalks, minimal branching",
    ),
    (
        "Grain Hemp",
        "Industrial hemp plants with heavy seed heads ready for harvest, golden late-summer field",
    ),
    (
        "Cannabinoid Hemp",
        "Bushy hemp plants with dense flowering tops in neat rows, agricultural field",
    ),
    (
        "Dual-Purpose Hemp",
        "Medium-height hemp plants with both sturdy stalks and seed heads, open farmland",
    ),
];

const PLANT_PART_TEMPLATES: &[(&str, &str)] = &[
    ("Hemp Seed", "Close-up of whole hemp seeds spilling from a burlap sack on a wooden table"),
    ("Hemp Bast Fiber", "Bundles of long raw hemp bast fibers, natural beige color, textured detail"),
    ("Hemp Hurds", "Pile of chopped hemp hurds (shiv), woody core pieces, macro detail"),
    ("Hemp Flowers", "Close-up of a hemp flower cluster with visible trichomes, soft natural light"),
    ("Hemp Leaves", "Fresh serrated hemp leaves arranged on a neutral background"),
    ("Hemp Roots", "Washed hemp taproot system laid out on dark soil, botanical study"),
];

const PLANT_TYPE_FALLBACK: &str = "Industrial hemp plants of the {name} variety growing in a field";
const PLANT_PART_FALLBACK: &str = "Detailed botanical view of hemp {name}, natural materials";
const PRODUCT_FALLBACK: &str =
    "Professional product photography of {name}, made from industrial hemp, clean studio background";

/// Name -> prompt lookup with a generic fallback per kind.
pub struct PromptCatalog;

impl PromptCatalog {
    pub fn style_preset(kind: TargetKind) -> &'static str {
        match kind {
            TargetKind::PlantType | TargetKind::PlantPart => "photographic",
            TargetKind::Product => "product-photography",
        }
    }

    pub fn default_priority(kind: TargetKind) -> i32 {
        match kind {
            TargetKind::PlantType => 5,
            TargetKind::PlantPart => 4,
            TargetKind::Product => 3,
        }
    }

    /// Prompt for an entity name. Exact names match case-insensitively,
    /// near names reuse the closest template.
    pub fn prompt_for(kind: TargetKind, name: &str) -> String {
        let templates: &[(&str, &str)] = match kind {
            TargetKind::PlantType => PLANT_TYPE_TEMPLATES,
            TargetKind::PlantPart => PLANT_PART_TEMPLATES,
            TargetKind::Product => &[],
        };

        let wanted = name.trim().to_lowercase();
        let best = templates
            .iter()
            .map(|(known, prompt)| (jaro_winkler(&known.to_lowercase(), &wanted), *prompt))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, prompt)) if score >= NEAR_MATCH_THRESHOLD => prompt.to_string(),
            _ => fallback(kind).replace("{name}", name.trim()),
        }
    }

    /// The job a producer enqueues for an entity missing its image.
    pub fn job_for(entity: &TargetEntity) -> NewJob {
        let mut prompt = Self::prompt_for(entity.kind, &entity.name);
        if entity.kind == TargetKind::Product {
            if let Some(description) = entity.description.as_deref().filter(|d| !d.trim().is_empty()) {
                let short: String = description.trim().chars().take(200).collect();
                prompt = format!("{prompt}. {short}");
            }
        }

        NewJob {
            target: Some(entity.target_ref()),
            prompt,
            style_preset: Some(Self::style_preset(entity.kind).to_string()),
            negative_prompt: Some(NEGATIVE_PROMPT.to_string()),
            priority: Self::default_priority(entity.kind),
        }
    }
}

fn fallback(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::PlantType => PLANT_TYPE_FALLBACK,
        TargetKind::PlantPart => PLANT_PART_FALLBACK,
        TargetKind::Product => PRODUCT_FALLBACK,
    }
}
