//! Integration tests for the explanation pipeline.
//!
//! Exercise vectorization, attribution, ranking and the explanation service
//! end-to-end with stub classifiers and a small tree-ensemble bundle.

use attrition_core::attribution::{
    Attribution, AttributionOutput, Attributor, BackgroundReference,
};
use attrition_core::config::{BackgroundKind, GuardianConfig};
use attrition_core::error::{ExplanationError, ModelError};
use attrition_core::model::{Node, Tree};
use attrition_core::schema::IBM_HR_COLUMNS;
use attrition_core::{
    Classifier, Direction, ExplanationService, FeatureSchema, FeatureVector, GuardianError,
    ModelBundle, RawInstance, TreeEnsemble, UnknownPolicy, Vectorizer,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Returns 0.7 for the positive class regardless of input.
struct ConstantClassifier;

impl Classifier for ConstantClassifier {
    fn name(&self) -> &str {
        "constant"
    }

    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        Ok(rows.iter().map(|_| vec![0.3, 0.7]).collect())
    }
}

/// Fails every prediction.
struct BrokenClassifier;

impl Classifier for BrokenClassifier {
    fn name(&self) -> &str {
        "broken"
    }

    fn predict_proba(&self, _rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        Err(ModelError::Prediction {
            message: "model weights unavailable".into(),
        })
    }
}

/// Returns a fixed attribution, ignoring the classifier.
struct FixedAttributor(AttributionOutput);

impl Attributor for FixedAttributor {
    fn attribute(
        &self,
        _classifier: &dyn Classifier,
        _schema: &FeatureSchema,
        _instance: &[f64],
        _background: &BackgroundReference,
    ) -> Result<Attribution, ExplanationError> {
        Ok(Attribution {
            output: self.0.clone(),
            base_values: vec![0.6, 0.4],
            prediction: vec![0.3, 0.7],
        })
    }
}

fn split(feature: usize, threshold: f64, left: usize, right: usize) -> Node {
    Node::Split {
        feature,
        threshold,
        left,
        right,
        missing_left: true,
    }
}

fn leaf(value: f64) -> Node {
    Node::Leaf { value }
}

/// Overtime, income and tenure stumps over the 44-column HR schema.
fn hr_bundle() -> ModelBundle {
    let schema = FeatureSchema::ibm_hr();
    let overtime = schema.index_of("OverTime_Yes").unwrap();
    let income = schema.index_of("MonthlyIncome").unwrap();
    let age = schema.index_of("Age").unwrap();
    let years = schema.index_of("TotalWorkingYears").unwrap();

    let ensemble = TreeEnsemble {
        base_score: -1.0,
        trees: vec![
            Tree {
                nodes: vec![split(overtime, 0.5, 1, 2), leaf(-0.4), leaf(1.1)],
            },
            Tree {
                nodes: vec![
                    split(income, 3000.0, 1, 2),
                    leaf(0.9),
                    split(age, 35.0, 3, 4),
                    leaf(0.2),
                    leaf(-0.5),
                ],
            },
            Tree {
                nodes: vec![split(years, 3.0, 1, 2), leaf(0.6), leaf(-0.1)],
            },
        ],
    };
    ModelBundle::new(ensemble, schema, Some(0.5)).unwrap()
}

fn hr_service() -> ExplanationService {
    ExplanationService::from_bundle(hr_bundle(), &GuardianConfig::default()).unwrap()
}

fn sample_instance() -> RawInstance {
    RawInstance::new()
        .with("Age", 30)
        .with("MonthlyIncome", 5000)
        .with("OverTime", "Yes")
        .with("TotalWorkingYears", 5)
        .with("YearsAtCompany", 3)
        .with("NumCompaniesWorked", 1)
}

#[test]
fn test_end_to_end_with_constant_classifier() {
    let service =
        ExplanationService::builder(Arc::new(ConstantClassifier), FeatureSchema::ibm_hr())
            .build()
            .unwrap();

    let explanation = service.explain(&sample_instance()).unwrap();
    let statements = explanation.statements();

    assert_eq!(statements.len(), 3);
    for s in &statements {
        assert!(s.contains(" (Value: "), "{}", s);
        assert!(s.ends_with(") increases risk") || s.ends_with(") decreases risk"), "{}", s);
    }
    // A constant model attributes nothing, so schema order decides.
    assert_eq!(
        statements,
        vec![
            "Age (Value: 30) decreases risk",
            "DailyRate (Value: 802) decreases risk",
            "DistanceFromHome (Value: 10) decreases risk",
        ]
    );
    assert_eq!(explanation.dropped, 0);
    assert!((explanation.prediction - 0.7).abs() < 1e-12);
}

#[test]
fn test_overtime_only_instance_column_by_column() {
    let vectorizer = Vectorizer::ibm_hr(FeatureSchema::ibm_hr(), UnknownPolicy::Reject).unwrap();
    let vector = vectorizer
        .vectorize(&RawInstance::new().with("OverTime", "Yes"))
        .unwrap();

    let expected: Vec<(&str, f64)> = vec![
        ("Age", 30.0),
        ("DailyRate", 802.0),
        ("DistanceFromHome", 10.0),
        ("Education", 3.0),
        ("EnvironmentSatisfaction", 3.0),
        ("HourlyRate", 65.0),
        ("JobInvolvement", 3.0),
        ("JobLevel", 2.0),
        ("JobSatisfaction", 3.0),
        ("MonthlyIncome", 5000.0),
        ("MonthlyRate", 14313.0),
        ("NumCompaniesWorked", 1.0),
        ("PercentSalaryHike", 15.0),
        ("PerformanceRating", 3.0),
        ("RelationshipSatisfaction", 3.0),
        ("StockOptionLevel", 0.0),
        ("TotalWorkingYears", 10.0),
        ("TrainingTimesLastYear", 3.0),
        ("WorkLifeBalance", 3.0),
        ("YearsAtCompany", 5.0),
        ("YearsInCurrentRole", 4.0),
        ("YearsSinceLastPromotion", 2.0),
        ("YearsWithCurrManager", 4.0),
        ("BusinessTravel_Travel_Frequently", 0.0),
        ("BusinessTravel_Travel_Rarely", 1.0),
        ("Department_Research & Development", 0.0),
        ("Department_Sales", 1.0),
        ("EducationField_Life Sciences", 0.0),
        ("EducationField_Marketing", 0.0),
        ("EducationField_Medical", 0.0),
        ("EducationField_Other", 0.0),
        ("EducationField_Technical Degree", 0.0),
        ("Gender_Male", 0.0),
        ("JobRole_Human Resources", 0.0),
        ("JobRole_Laboratory Technician", 0.0),
        ("JobRole_Manager", 0.0),
        ("JobRole_Manufacturing Director", 0.0),
        ("JobRole_Research Director", 0.0),
        ("JobRole_Research Scientist", 0.0),
        ("JobRole_Sales Executive", 1.0),
        ("JobRole_Sales Representative", 0.0),
        ("MaritalStatus_Married", 0.0),
        ("MaritalStatus_Single", 1.0),
        ("OverTime_Yes", 1.0),
    ];

    assert_eq!(expected.len(), IBM_HR_COLUMNS.len());
    let actual: Vec<(&str, f64)> = vector.named_values().collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_truncated_attribution_pairs_with_leading_features() {
    let scores = vec![0.01, -0.3, 0.0, 0.2, -0.05];
    let service =
        ExplanationService::builder(Arc::new(ConstantClassifier), FeatureSchema::ibm_hr())
            .attributor(Arc::new(FixedAttributor(AttributionOutput::Single(scores))))
            .top_k(10)
            .build()
            .unwrap();

    let explanation = service.explain(&sample_instance()).unwrap();
    assert_eq!(explanation.dropped, 44 - 5);
    assert_eq!(explanation.factors.len(), 5);

    let leading: Vec<&str> = IBM_HR_COLUMNS[..5].to_vec();
    for f in &explanation.factors {
        assert!(leading.contains(&f.feature.as_str()), "{}", f.feature);
    }
    let statements = explanation.statements();
    assert_eq!(statements[0], "DailyRate (Value: 802) decreases risk");
    assert_eq!(statements[1], "Education (Value: 3) increases risk");
}

#[test]
fn test_per_class_attribution_uses_positive_class() {
    let service =
        ExplanationService::builder(Arc::new(ConstantClassifier), FeatureSchema::ibm_hr())
            .attributor(Arc::new(FixedAttributor(AttributionOutput::PerClass(vec![
                vec![-0.4; 44],
                vec![0.4; 44],
            ]))))
            .build()
            .unwrap();

    let explanation = service.explain(&RawInstance::new()).unwrap();
    assert!(
        explanation
            .factors
            .iter()
            .all(|f| f.direction == Direction::IncreasesRisk)
    );
    assert_eq!(explanation.base_value, 0.4);
    assert_eq!(explanation.prediction, 0.7);
}

#[test]
fn test_tree_bundle_overtime_increases_risk() {
    let service = hr_service();
    let assessment = service.assess(&sample_instance()).unwrap();

    assert!(assessment.explanation.factors.len() <= 3);
    let top = &assessment.explanation.factors[0];
    assert_eq!(top.feature, "OverTime_Yes");
    assert_eq!(top.direction, Direction::IncreasesRisk);
    assert!(top.score > 0.0);
    assert!((assessment.risk.probability - assessment.explanation.prediction).abs() < 1e-12);
}

#[test]
fn test_scores_sum_to_prediction_minus_base() {
    let service = hr_service();
    let explanation = service.explain_top(&sample_instance(), 44).unwrap();
    assert_eq!(explanation.factors.len(), 44);

    let total: f64 = explanation.factors.iter().map(|f| f.score).sum();
    let gap = explanation.prediction - explanation.base_value;
    assert!((total - gap).abs() < 1e-9, "{} vs {}", total, gap);
}

#[test]
fn test_explanations_are_idempotent() {
    let service = hr_service();
    let a = service.explain(&sample_instance()).unwrap();
    let b = service.explain(&sample_instance()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_all_defaults_instance() {
    let service = hr_service();
    let explanation = service.explain(&RawInstance::new()).unwrap();
    assert_eq!(explanation.factors.len(), 3);
    for f in &explanation.factors {
        assert_eq!(f.direction, Direction::from_score(f.score));
        assert!(f.score.is_finite());
    }
    let k_zero = service.explain_top(&RawInstance::new(), 0).unwrap();
    assert!(k_zero.factors.is_empty());
}

#[test]
fn test_from_config_with_median_background() {
    let dir = tempfile::tempdir().unwrap();
    let bundle_path = dir.path().join("models").join("bundle.json");
    hr_bundle().save(&bundle_path).unwrap();

    let csv_path = dir.path().join("hr.csv");
    std::fs::write(
        &csv_path,
        "Age,Attrition,MonthlyIncome,OverTime,Over18\n\
         41,Yes,5993,Yes,Y\n\
         49,No,5130,No,Y\n\
         37,Yes,2090,Yes,Y\n",
    )
    .unwrap();

    let mut config = GuardianConfig::default();
    config.model.bundle_path = bundle_path;
    config.explain.background = BackgroundKind::Medians;
    config.explain.background_dataset = Some(csv_path);

    let service = ExplanationService::from_config(&config).unwrap();
    let explanation = service.explain(&sample_instance()).unwrap();

    // Median Age is 41 against an instance Age of 30.
    assert!(explanation.base_value > 0.0 && explanation.base_value < 1.0);
    let total: f64 = service
        .explain_top(&sample_instance(), 44)
        .unwrap()
        .factors
        .iter()
        .map(|f| f.score)
        .sum();
    assert!((total - (explanation.prediction - explanation.base_value)).abs() < 1e-9);
}

#[test]
fn test_reject_policy_surfaces_unknown_category() {
    let mut config = GuardianConfig::default();
    config.vectorizer.unknown_policy = UnknownPolicy::Reject;
    let service = ExplanationService::from_bundle(hr_bundle(), &config).unwrap();

    let err = service
        .explain(&RawInstance::new().with("OverTime", "Sometimes"))
        .unwrap_err();
    assert!(matches!(err, GuardianError::Vectorize(_)));
}

#[test]
fn test_reordered_vector_is_rejected() {
    let service = hr_service();
    let reversed: Vec<&str> = IBM_HR_COLUMNS.iter().rev().copied().collect();
    let schema = FeatureSchema::new(reversed).unwrap();
    let values: Vec<f64> = (0..schema.len()).map(|i| i as f64).collect();
    let vector = FeatureVector::from_values(&schema, values).unwrap();

    let err = service.explain_vector(&vector).unwrap_err();
    assert!(
        matches!(
            err,
            GuardianError::Explanation(ExplanationError::SchemaMismatch { .. })
        ),
        "{}",
        err
    );

    // The service's own column order still explains.
    let vector = service.vectorize(&sample_instance()).unwrap();
    assert!(service.explain_vector(&vector).is_ok());
}

#[test]
fn test_reject_policy_with_median_background() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("hr.csv");
    std::fs::write(
        &csv_path,
        "Age,Attrition,EmployeeCount,MonthlyIncome,OverTime\n\
         41,Yes,1,5993,Yes\n\
         49,No,1,5130,No\n\
         37,Yes,1,2090,Yes\n",
    )
    .unwrap();

    let mut config = GuardianConfig::default();
    config.vectorizer.unknown_policy = UnknownPolicy::Reject;
    config.explain.background = BackgroundKind::Medians;
    config.explain.background_dataset = Some(csv_path);

    let service = ExplanationService::from_bundle(hr_bundle(), &config).unwrap();
    let explanation = service.explain_top(&sample_instance(), 44).unwrap();
    let total: f64 = explanation.factors.iter().map(|f| f.score).sum();
    assert!((total - (explanation.prediction - explanation.base_value)).abs() < 1e-9);

    // Unmapped columns were skipped, not whole rows: the median Age is 41.
    assert!(explanation.base_value > 0.0 && explanation.base_value < 1.0);
    let age = explanation
        .factors
        .iter()
        .find(|f| f.feature == "Age")
        .unwrap();
    assert_eq!(age.value, 30.0);
    assert!(age.score != 0.0);
}

#[test]
fn test_classifier_failure_is_an_explanation_error() {
    let service = ExplanationService::builder(Arc::new(BrokenClassifier), FeatureSchema::ibm_hr())
        .build()
        .unwrap();

    let err = service.explain(&sample_instance()).unwrap_err();
    assert!(
        matches!(
            err,
            GuardianError::Explanation(ExplanationError::Classifier(ModelError::Prediction { .. }))
        ),
        "{:?}",
        err
    );

    let err = service.assess(&sample_instance()).unwrap_err();
    assert!(
        matches!(
            err,
            GuardianError::Explanation(ExplanationError::Classifier(ModelError::Prediction { .. }))
        ),
        "{:?}",
        err
    );

    // Plain prediction keeps the model error.
    let err = service.predict(&sample_instance()).unwrap_err();
    assert!(matches!(err, GuardianError::Model(_)), "{:?}", err);
}
