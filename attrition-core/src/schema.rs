//! Feature schema and feature vectors.
//!
//! The schema is the ordered list of columns the classifier was trained on.
//! Column order is a binding contract with the model: there is no name
//! binding at inference time, so a reordered vector silently corrupts
//! predictions. A [`FeatureVector`] can only be built against a schema and
//! always has exactly the schema's width.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ModelError;

/// Column layout of the IBM HR attrition model after one-hot encoding with
/// the first level of every categorical attribute dropped.
pub const IBM_HR_COLUMNS: &[&str] = &[
    "Age",
    "DailyRate",
    "DistanceFromHome",
    "Education",
    "EnvironmentSatisfaction",
    "HourlyRate",
    "JobInvolvement",
    "JobLevel",
    "JobSatisfaction",
    "MonthlyIncome",
    "MonthlyRate",
    "NumCompaniesWorked",
    "PercentSalaryHike",
    "PerformanceRating",
    "RelationshipSatisfaction",
    "StockOptionLevel",
    "TotalWorkingYears",
    "TrainingTimesLastYear",
    "WorkLifeBalance",
    "YearsAtCompany",
    "YearsInCurrentRole",
    "YearsSinceLastPromotion",
    "YearsWithCurrManager",
    "BusinessTravel_Travel_Frequently",
    "BusinessTravel_Travel_Rarely",
    "Department_Research & Development",
    "Department_Sales",
    "EducationField_Life Sciences",
    "EducationField_Marketing",
    "EducationField_Medical",
    "EducationField_Other",
    "EducationField_Technical Degree",
    "Gender_Male",
    "JobRole_Human Resources",
    "JobRole_Laboratory Technician",
    "JobRole_Manager",
    "JobRole_Manufacturing Director",
    "JobRole_Research Director",
    "JobRole_Research Scientist",
    "JobRole_Sales Executive",
    "JobRole_Sales Representative",
    "MaritalStatus_Married",
    "MaritalStatus_Single",
    "OverTime_Yes",
];

/// Ordered, named feature schema recovered from the model bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSchema {
    names: Arc<[String]>,
    index: Arc<HashMap<String, usize>>,
}

impl FeatureSchema {
    /// Build a schema from column names. Names must be non-empty and unique.
    pub fn new<I, S>(names: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ModelError::InvalidModel {
                message: "feature schema is empty".to_string(),
            });
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(ModelError::InvalidModel {
                    message: format!("duplicate feature name '{}' in schema", name),
                });
            }
        }

        Ok(Self {
            names: names.into(),
            index: Arc::new(index),
        })
    }

    /// The 44-column IBM HR attrition schema.
    pub fn ibm_hr() -> Self {
        let names: Vec<String> = IBM_HR_COLUMNS.iter().map(|s| s.to_string()).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names: names.into(),
            index: Arc::new(index),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Position of a column in the schema.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// A zero-initialized vector over this schema.
    pub fn zeros(&self) -> FeatureVector {
        FeatureVector {
            schema: self.clone(),
            values: vec![0.0; self.len()],
        }
    }
}

impl TryFrom<Vec<String>> for FeatureSchema {
    type Error = ModelError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<FeatureSchema> for Vec<String> {
    fn from(schema: FeatureSchema) -> Self {
        schema.names.to_vec()
    }
}

/// One instance as a fixed-width numeric row in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: FeatureSchema,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Wrap raw values. Fails when the width does not match the schema.
    pub fn from_values(schema: &FeatureSchema, values: Vec<f64>) -> Result<Self, ModelError> {
        if values.len() != schema.len() {
            return Err(ModelError::InvalidModel {
                message: format!(
                    "feature vector has {} values, schema has {} columns",
                    values.len(),
                    schema.len()
                ),
            });
        }
        Ok(Self {
            schema: schema.clone(),
            values,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).map(|i| self.values[i])
    }

    /// Named values in schema order, for logging and chat context.
    pub fn named_values(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub(crate) fn set_index(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}
