use crate::error::ClassifierError;
use crate::labels::Labels;
use ndarray::{Array1, ArrayView1};

/// Best-guess label and its softmax probability.
///
/// `label` is `None` when the prediction failed; `confidence` is then `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Option<String>,
    pub confidence: f32,
}

impl Prediction {
    /// Sentinel returned whenever recognition fails.
    pub fn unrecognized() -> Self {
        Self {
            label: None,
            confidence: 0.0,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.label.is_some()
    }
}

/// Arg-max class of a probability distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScore {
    pub index: usize,
    pub probability: f32,
}

/// Numerically stable softmax over the class dimension.
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exp = logits.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: ArrayView1<f32>) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, best_v)) if best_v >= v => best,
            _ => Some((i, v)),
        })
}

pub fn top_class(logits: ArrayView1<f32>) -> Result<ClassScore, ClassifierError> {
    if logits.is_empty() {
        return Err(ClassifierError::Inference("model returned no class scores".into()));
    }
    if logits.iter().any(|x| !x.is_finite()) {
        return Err(ClassifierError::Inference("model returned non-finite scores".into()));
    }

    let probabilities = softmax(logits);
    let (index, probability) = argmax(probabilities.view())
        .ok_or_else(|| ClassifierError::Inference("empty probability distribution".into()))?;

    Ok(ClassScore {
        index,
        probability: probability.clamp(0.0, 1.0),
    })
}

/// Map a class index to its label.
///
/// An index outside the label table means the head and the labels diverged
/// after load; that is reported as an inference failure instead of inventing
/// a placeholder label.
pub fn decode(score: ClassScore, labels: &Labels) -> Result<Prediction, ClassifierError> {
    let label = labels.get(score.index).ok_or_else(|| {
        ClassifierError::Inference(format!(
            "predicted index {} outside label table of {}",
            score.index,
            labels.len()
        ))
    })?;

    Ok(Prediction {
        label: Some(label.to_string()),
        confidence: score.probability,
    })
}
