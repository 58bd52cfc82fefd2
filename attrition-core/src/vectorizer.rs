//! Feature vectorizer: sparse raw attributes to a fixed-width feature vector.
//!
//! Raw instances use the user-facing attribute names of the HR dataset
//! (`Age`, `OverTime`, `JobRole`, ...). The [`AttributeMap`] lists, for every
//! attribute, which schema column(s) it feeds and the default used when the
//! attribute is absent. Categorical attributes carry an explicit enumerated
//! mapping from level to indicator column; the level dropped during one-hot
//! encoding maps to no column.
//!
//! The map is resolved against the loaded schema once, in
//! [`Vectorizer::new`], so a mapping that points at a column the model does
//! not have fails at startup instead of producing a silent no-op.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

use crate::error::VectorizeError;
use crate::schema::{FeatureSchema, FeatureVector};

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// A single raw attribute value as entered by a user or read from a CSV cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Parse a CSV cell or CLI argument: numbers become `Number`.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => RawValue::Number(n),
            _ => RawValue::Text(trimmed.to_string()),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

impl From<i64> for RawValue {
    fn from(n: i64) -> Self {
        RawValue::Number(n as f64)
    }
}

impl From<i32> for RawValue {
    fn from(n: i32) -> Self {
        RawValue::Number(n as f64)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

/// Sparse mapping of raw attribute names to values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawInstance {
    attributes: BTreeMap<String, RawValue>,
}

impl RawInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.attributes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Build an instance from one dataset record (header names + cells).
    /// Empty cells are skipped so the attribute falls back to its default.
    pub fn from_record(columns: &[String], cells: &[String]) -> Self {
        let attributes = columns
            .iter()
            .zip(cells.iter())
            .filter(|(_, cell)| !cell.trim().is_empty())
            .map(|(name, cell)| (name.clone(), RawValue::parse(cell)))
            .collect();
        Self { attributes }
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for RawInstance {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute map
// ---------------------------------------------------------------------------

/// What to do with attributes or categorical levels the map does not know.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    /// Log and drop the attribute.
    #[default]
    Ignore,
    /// Fail the vectorization.
    Reject,
}

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownPolicy::Ignore => write!(f, "ignore"),
            UnknownPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// A numeric attribute written straight into one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericField {
    pub attribute: String,
    pub column: String,
    pub default: f64,
}

/// One level of a categorical attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryLevel {
    pub value: String,
    /// Indicator column, or `None` for the dropped reference level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

/// A categorical attribute expanded into one-hot indicator columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalField {
    pub attribute: String,
    pub default: String,
    pub levels: Vec<CategoryLevel>,
}

/// Declarative mapping from raw attributes to schema columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeMap {
    #[serde(default)]
    pub numeric: Vec<NumericField>,
    #[serde(default)]
    pub categorical: Vec<CategoricalField>,
}

fn numeric(attribute: &str, default: f64) -> NumericField {
    NumericField {
        attribute: attribute.to_string(),
        column: attribute.to_string(),
        default,
    }
}

fn categorical(
    attribute: &str,
    default: &str,
    reference: &str,
    levels: &[&str],
) -> CategoricalField {
    let mut all = vec![CategoryLevel {
        value: reference.to_string(),
        column: None,
    }];
    all.extend(levels.iter().map(|level| CategoryLevel {
        value: level.to_string(),
        column: Some(format!("{}_{}", attribute, level)),
    }));
    CategoricalField {
        attribute: attribute.to_string(),
        default: default.to_string(),
        levels: all,
    }
}

impl AttributeMap {
    /// Mapping for the IBM HR attrition schema with the documented defaults.
    pub fn ibm_hr() -> Self {
        Self {
            numeric: vec![
                numeric("Age", 30.0),
                numeric("DailyRate", 802.0),
                numeric("DistanceFromHome", 10.0),
                numeric("Education", 3.0),
                numeric("EnvironmentSatisfaction", 3.0),
                numeric("HourlyRate", 65.0),
                numeric("JobInvolvement", 3.0),
                numeric("JobLevel", 2.0),
                numeric("JobSatisfaction", 3.0),
                numeric("MonthlyIncome", 5000.0),
                numeric("MonthlyRate", 14313.0),
                numeric("NumCompaniesWorked", 1.0),
                numeric("PercentSalaryHike", 15.0),
                numeric("PerformanceRating", 3.0),
                numeric("RelationshipSatisfaction", 3.0),
                numeric("StockOptionLevel", 0.0),
                numeric("TotalWorkingYears", 10.0),
                numeric("TrainingTimesLastYear", 3.0),
                numeric("WorkLifeBalance", 3.0),
                numeric("YearsAtCompany", 5.0),
                numeric("YearsInCurrentRole", 4.0),
                numeric("YearsSinceLastPromotion", 2.0),
                numeric("YearsWithCurrManager", 4.0),
            ],
            categorical: vec![
                categorical(
                    "BusinessTravel",
                    "Travel_Rarely",
                    "Non-Travel",
                    &["Travel_Frequently", "Travel_Rarely"],
                ),
                categorical(
                    "Department",
                    "Sales",
                    "Human Resources",
                    &["Research & Development", "Sales"],
                ),
                categorical(
                    "EducationField",
                    "Human Resources",
                    "Human Resources",
                    &[
                        "Life Sciences",
                        "Marketing",
                        "Medical",
                        "Other",
                        "Technical Degree",
                    ],
                ),
                categorical("Gender", "Female", "Female", &["Male"]),
                categorical(
                    "JobRole",
                    "Sales Executive",
                    "Healthcare Representative",
                    &[
                        "Human Resources",
                        "Laboratory Technician",
                        "Manager",
                        "Manufacturing Director",
                        "Research Director",
                        "Research Scientist",
                        "Sales Executive",
                        "Sales Representative",
                    ],
                ),
                categorical("MaritalStatus", "Single", "Divorced", &["Married", "Single"]),
                categorical("OverTime", "No", "No", &["Yes"]),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Vectorizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ResolvedNumeric {
    index: usize,
    default: f64,
}

#[derive(Debug, Clone)]
struct ResolvedCategorical {
    default_column: Option<usize>,
    levels: HashMap<String, Option<usize>>,
    /// Every indicator column of this attribute, cleared before a level is set.
    columns: Vec<usize>,
}

#[derive(Debug, Clone)]
enum Field {
    Numeric(ResolvedNumeric),
    Categorical(ResolvedCategorical),
}

/// Schema-bound vectorizer. Read-only after construction.
#[derive(Debug, Clone)]
pub struct Vectorizer {
    schema: FeatureSchema,
    fields: HashMap<String, Field>,
    /// Fields in declaration order, so defaults are applied deterministically.
    order: Vec<String>,
    policy: UnknownPolicy,
}

impl Vectorizer {
    /// Resolve `map` against `schema`. Every referenced column must exist.
    pub fn new(
        schema: FeatureSchema,
        map: &AttributeMap,
        policy: UnknownPolicy,
    ) -> Result<Self, VectorizeError> {
        let mut fields = HashMap::new();
        let mut order = Vec::new();

        let resolve = |attribute: &str, column: &str| {
            schema
                .index_of(column)
                .ok_or_else(|| VectorizeError::UnmappedColumn {
                    attribute: attribute.to_string(),
                    column: column.to_string(),
                })
        };

        for field in &map.numeric {
            let index = resolve(&field.attribute, &field.column)?;
            order.push(field.attribute.clone());
            fields.insert(
                field.attribute.clone(),
                Field::Numeric(ResolvedNumeric {
                    index,
                    default: field.default,
                }),
            );
        }

        for field in &map.categorical {
            let mut levels = HashMap::new();
            let mut columns = Vec::new();
            for level in &field.levels {
                let index = match &level.column {
                    Some(column) => {
                        let index = resolve(&field.attribute, column)?;
                        columns.push(index);
                        Some(index)
                    }
                    None => None,
                };
                levels.insert(level.value.clone(), index);
            }
            let default_column = *levels.get(&field.default).ok_or_else(|| {
                VectorizeError::UnknownCategory {
                    attribute: field.attribute.clone(),
                    value: field.default.clone(),
                }
            })?;
            order.push(field.attribute.clone());
            fields.insert(
                field.attribute.clone(),
                Field::Categorical(ResolvedCategorical {
                    default_column,
                    levels,
                    columns,
                }),
            );
        }

        debug!(
            fields = fields.len(),
            columns = schema.len(),
            policy = %policy,
            "Vectorizer resolved against schema"
        );

        Ok(Self {
            schema,
            fields,
            order,
            policy,
        })
    }

    /// Vectorizer for the IBM HR schema with the built-in attribute map.
    pub fn ibm_hr(schema: FeatureSchema, policy: UnknownPolicy) -> Result<Self, VectorizeError> {
        Self::new(schema, &AttributeMap::ibm_hr(), policy)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn policy(&self) -> UnknownPolicy {
        self.policy
    }

    /// The vector produced when no attribute is supplied.
    pub fn defaults(&self) -> FeatureVector {
        let mut vector = self.schema.zeros();
        for name in &self.order {
            match &self.fields[name] {
                Field::Numeric(f) => vector.set_index(f.index, f.default),
                Field::Categorical(f) => {
                    if let Some(index) = f.default_column {
                        vector.set_index(index, 1.0);
                    }
                }
            }
        }
        vector
    }

    /// Map a raw instance onto the schema.
    pub fn vectorize(&self, instance: &RawInstance) -> Result<FeatureVector, VectorizeError> {
        let mut vector = self.defaults();

        for (name, value) in instance.iter() {
            let Some(field) = self.fields.get(name) else {
                self.unknown(VectorizeError::UnknownAttribute {
                    name: name.to_string(),
                })?;
                continue;
            };

            match field {
                Field::Numeric(f) => match value.as_number() {
                    Some(n) => vector.set_index(f.index, n),
                    None => self.unknown(VectorizeError::InvalidValue {
                        attribute: name.to_string(),
                        reason: format!("'{}' is not a number", value),
                    })?,
                },
                Field::Categorical(f) => {
                    let level = value.to_string();
                    match f.levels.get(&level) {
                        Some(column) => {
                            for &index in &f.columns {
                                vector.set_index(index, 0.0);
                            }
                            if let Some(index) = column {
                                vector.set_index(*index, 1.0);
                            }
                        }
                        None => self.unknown(VectorizeError::UnknownCategory {
                            attribute: name.to_string(),
                            value: level,
                        })?,
                    }
                }
            }
        }

        Ok(vector)
    }

    /// Vectorize one dataset record (header + cells).
    ///
    /// Columns outside the attribute map (target, identifiers, constants)
    /// are skipped regardless of policy. Values of mapped columns still go
    /// through [`UnknownPolicy`].
    pub fn vectorize_row(
        &self,
        columns: &[String],
        cells: &[String],
    ) -> Result<FeatureVector, VectorizeError> {
        let record: RawInstance = RawInstance::from_record(columns, cells)
            .iter()
            .filter(|(name, _)| self.fields.contains_key(*name))
            .map(|(name, value)| (name, value.clone()))
            .collect();
        self.vectorize(&record)
    }

    fn unknown(&self, err: VectorizeError) -> Result<(), VectorizeError> {
        match self.policy {
            UnknownPolicy::Reject => Err(err),
            UnknownPolicy::Ignore => {
                match &err {
                    VectorizeError::UnknownAttribute { .. } => {
                        debug!(error = %err, "Ignoring attribute not in the attribute map")
                    }
                    _ => warn!(error = %err, "Ignoring unusable attribute value"),
                }
                Ok(())
            }
        }
    }
}
