//! Linking a prediction to a catalog entry.
//!
//! The catalog itself is external; it is reached through [`FoodLookup`],
//! which resolves a predicted label by exact slug match.

use crate::backend::ClassifierBackend;
use crate::postprocessing::Prediction;
use crate::service::ClassifierService;
use std::collections::HashMap;
use std::hash::BuildHasher;

pub trait FoodLookup {
    type Food;

    fn find_by_slug(&self, slug: &str) -> Option<Self::Food>;
}

impl<F: Clone, S: BuildHasher> FoodLookup for HashMap<String, F, S> {
    type Food = F;

    fn find_by_slug(&self, slug: &str) -> Option<F> {
        self.get(slug).cloned()
    }
}

/// Outcome of recognizing a meal photo.
#[derive(Debug, Clone, PartialEq)]
pub struct MealRecognition<F> {
    pub predicted_label: Option<String>,
    /// Confidence as a percentage, rounded to one decimal.
    pub confidence_percent: f32,
    pub food: Option<F>,
    /// Set when nothing was recognized or the label has no catalog entry.
    pub not_found: bool,
}

impl<F> MealRecognition<F> {
    pub fn from_prediction<L>(prediction: Prediction, lookup: &L) -> Self
    where
        L: FoodLookup<Food = F>,
    {
        let food = prediction
            .label
            .as_deref()
            .and_then(|slug| lookup.find_by_slug(slug));

        match (&prediction.label, &food) {
            (Some(label), None) => {
                tracing::debug!(slug = %label, "No catalog entry for predicted label");
            }
            (None, _) => tracing::debug!("Prediction returned no label"),
            _ => {}
        }

        Self {
            not_found: food.is_none(),
            confidence_percent: confidence_percent(prediction.confidence),
            predicted_label: prediction.label,
            food,
        }
    }
}

pub fn confidence_percent(confidence: f32) -> f32 {
    (confidence * 1000.0).round() / 10.0
}

/// Classify `image_bytes` and resolve the label through `lookup`.
pub fn recognize<B, L>(
    service: &ClassifierService<B>,
    lookup: &L,
    image_bytes: &[u8],
) -> MealRecognition<L::Food>
where
    B: ClassifierBackend,
    L: FoodLookup,
{
    MealRecognition::from_prediction(service.predict(image_bytes), lookup)
}
