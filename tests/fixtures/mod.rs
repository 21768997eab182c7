//! Catalog fixtures for queue tests

use hemp_image_queue::models::target::{TargetEntity, TargetKind};

fn entity(kind: TargetKind, id: i64, name: &str, image_url: Option<&str>) -> TargetEntity {
    TargetEntity {
        kind,
        id,
        name: name.to_string(),
        description: None,
        image_url: image_url.map(str::to_string),
    }
}

/// Three entities missing an image (one per kind) and one that already has one.
pub fn catalog() -> Vec<TargetEntity> {
    let mut product = entity(TargetKind::Product, 30, "Hempcrete Blocks", None);
    product.description = Some("Lightweight building blocks made from hemp hurds and lime".to_string());

    vec![
        entity(TargetKind::PlantType, 10, "Fiber Hemp", None),
        entity(
            TargetKind::PlantPart,
            20,
            "Hemp Seeds",
            Some("https://via.placeholder.com/300?text=seeds"),
        ),
        product,
        entity(
            TargetKind::Product,
            31,
            "Hemp Rope",
            Some("https://cdn.example.com/hemp-rope.jpg"),
        ),
    ]
}

/// Number of entities in `catalog()` without a real image.
pub const MISSING_IN_CATALOG: u32 = 3;
