//! Side classifiers over normalized crops: demographics and deepfake likelihood.

use crate::onnx::{ModelError, OnnxBatchModel};
use crate::types::{Demographics, NormalizedFace};
use std::path::Path;

/// Sex / age / ethnicity scores for each crop of a batch.
pub trait DemographicClassifier: Send {
    fn classify(&mut self, batch: &[NormalizedFace]) -> Result<Vec<Demographics>, ModelError>;
}

/// Probability in [0, 1] that each crop is synthetic.
pub trait DeepfakeClassifier: Send {
    fn predict(&mut self, batch: &[NormalizedFace]) -> Result<Vec<f32>, ModelError>;
}

/// Three independent ONNX heads, one per attribute.
pub struct OnnxDemographics {
    sex: OnnxBatchModel,
    age: OnnxBatchModel,
    ethnicity: OnnxBatchModel,
}

impl OnnxDemographics {
    pub fn load(sex: &Path, age: &Path, ethnicity: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            sex: OnnxBatchModel::load(sex, "sex")?,
            age: OnnxBatchModel::load(age, "age")?,
            ethnicity: OnnxBatchModel::load(ethnicity, "ethnicity")?,
        })
    }
}

impl DemographicClassifier for OnnxDemographics {
    fn classify(&mut self, batch: &[NormalizedFace]) -> Result<Vec<Demographics>, ModelError> {
        let sex = self.sex.run(batch)?;
        let age = self.age.run(batch)?;
        let ethnicity = self.ethnicity.run(batch)?;
        Ok(zip_demographics(sex, age, ethnicity))
    }
}

fn zip_demographics(sex: Vec<Vec<f32>>, age: Vec<Vec<f32>>, ethnicity: Vec<Vec<f32>>) -> Vec<Demographics> {
    sex.into_iter()
        .zip(age)
        .zip(ethnicity)
        .map(|((sex, age), ethnicity)| Demographics {
            sex: Some(sex),
            age: Some(age),
            ethnicity: Some(ethnicity),
        })
        .collect()
}

pub struct OnnxDeepfake {
    model: OnnxBatchModel,
}

impl OnnxDeepfake {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            model: OnnxBatchModel::load(model_path, "deepfake")?,
        })
    }
}

impl DeepfakeClassifier for OnnxDeepfake {
    fn predict(&mut self, batch: &[NormalizedFace]) -> Result<Vec<f32>, ModelError> {
        let rows = self.model.run(batch)?;
        Ok(rows.into_iter().map(|row| fake_probability(&row)).collect())
    }
}

/// A single sigmoid output is the probability itself; a two-way softmax
/// reports it in the second column.
fn fake_probability(row: &[f32]) -> f32 {
    match row {
        [p] => *p,
        [_, fake, ..] => *fake,
        [] => 0.0,
    }
}

/// Deepfake probability as an integer percentage, truncated toward zero.
pub fn to_percentage(score: f32) -> i32 {
    (score * 100.0) as i32
}
