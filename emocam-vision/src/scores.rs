/// Softmax output for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    pub probabilities: Vec<f32>,
    pub class_index: usize,
    pub confidence: f32,
}

/// Turn raw class scores into probabilities and pick the top class.
///
/// The maximum is subtracted before exponentiating, so arbitrarily large
/// finite logits are fine. A logit of negative infinity gets probability 0.
/// Returns `None` for an empty vector, a NaN or positive infinite logit, or
/// when every logit is negative infinity.
pub fn normalize(logits: &[f32]) -> Option<Scores> {
    if logits.is_empty() || logits.iter().any(|v| v.is_nan() || *v == f32::INFINITY) {
        return None;
    }

    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return None;
    }
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    // the max entry contributes exp(0) = 1, so sum >= 1
    let sum: f32 = exps.iter().sum();
    let probabilities: Vec<f32> = exps.iter().map(|e| e / sum).collect();

    let mut class_index = 0;
    for (i, p) in probabilities.iter().enumerate().skip(1) {
        if *p > probabilities[class_index] {
            class_index = i;
        }
    }

    Some(Scores {
        confidence: probabilities[class_index],
        class_index,
        probabilities,
    })
}
