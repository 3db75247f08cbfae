//! Region-of-interest layout for shipping labels
//!
//! During an advanced retry pass the label is carved into named rectangular
//! regions, each expected to contain one semantic field. The layout uses
//! fixed fractions of the label dimensions, derived from the canonical
//! carrier label template, and attaches field-specific engine parameters:
//! identifier regions read best as a single word over a digit whitelist,
//! free-text regions as a uniform block over the broader alphabet.

use serde::{Deserialize, Serialize};

use crate::engine::{EngineParams, PageSegMode, LABEL_WHITELIST, NUMERIC_WHITELIST};

/// A rectangular sub-area of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A named label region, optionally carrying its own engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionOfInterest {
    /// Field name ("shipping_number", "postal_code", ...).
    pub name: String,
    pub bounding_box: BoundingBox,
    /// Region-specific parameter override; wins over call-level parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_params: Option<EngineParams>,
}

/// Assumed label dimensions when the real ones are unknown.
pub const CANONICAL_LABEL_SIZE: (u32, u32) = (800, 600);

fn fraction_box(width: u32, height: u32, fx: f32, fy: f32, fw: f32, fh: f32) -> BoundingBox {
    BoundingBox {
        x: (width as f32 * fx).round() as u32,
        y: (height as f32 * fy).round() as u32,
        width: (width as f32 * fw).round() as u32,
        height: (height as f32 * fh).round() as u32,
    }
}

/// Single-word, digits-only parameters for identifier fields.
fn identifier_params() -> EngineParams {
    EngineParams {
        page_seg_mode: Some(PageSegMode::SingleWord),
        whitelist: Some(NUMERIC_WHITELIST.to_string()),
        numeric_mode: Some(true),
        ..Default::default()
    }
}

/// Uniform-block parameters for free-text fields.
fn free_text_params() -> EngineParams {
    EngineParams {
        page_seg_mode: Some(PageSegMode::SingleBlock),
        whitelist: Some(LABEL_WHITELIST.to_string()),
        ..Default::default()
    }
}

/// General label parameters for everything else.
fn general_params() -> EngineParams {
    EngineParams {
        whitelist: Some(LABEL_WHITELIST.to_string()),
        ..Default::default()
    }
}

/// Generate the named regions of a shipping label of the given dimensions.
///
/// The fractions encode the carrier template: shipment number in the top
/// right, recipient and address in the upper middle band, postal code and
/// locality side by side, delivery date and shipping type near the bottom.
pub fn shipping_label_regions(width: u32, height: u32) -> Vec<RegionOfInterest> {
    vec![
        RegionOfInterest {
            name: "shipping_number".to_string(),
            bounding_box: fraction_box(width, height, 0.5, 0.1, 0.45, 0.15),
            engine_params: Some(identifier_params()),
        },
        RegionOfInterest {
            name: "recipient".to_string(),
            bounding_box: fraction_box(width, height, 0.1, 0.25, 0.8, 0.1),
            engine_params: Some(free_text_params()),
        },
        RegionOfInterest {
            name: "address".to_string(),
            bounding_box: fraction_box(width, height, 0.1, 0.35, 0.8, 0.15),
            engine_params: Some(free_text_params()),
        },
        RegionOfInterest {
            name: "postal_code".to_string(),
            bounding_box: fraction_box(width, height, 0.1, 0.5, 0.3, 0.1),
            engine_params: Some(identifier_params()),
        },
        RegionOfInterest {
            name: "locality".to_string(),
            bounding_box: fraction_box(width, height, 0.4, 0.5, 0.5, 0.1),
            engine_params: Some(free_text_params()),
        },
        RegionOfInterest {
            name: "delivery_date".to_string(),
            bounding_box: fraction_box(width, height, 0.1, 0.65, 0.4, 0.1),
            engine_params: Some(general_params()),
        },
        RegionOfInterest {
            name: "shipping_type".to_string(),
            bounding_box: fraction_box(width, height, 0.5, 0.65, 0.4, 0.1),
            engine_params: Some(general_params()),
        },
    ]
}
