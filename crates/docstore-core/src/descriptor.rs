//! Backend-agnostic descriptions of search intent.
//!
//! Descriptors are immutable once built. Every constructor validates its
//! input, so a descriptor that exists is well formed; backends never need to
//! re-check field presence, weight signs or fusion nesting.
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryDescriptor {
    TextMatch(TextMatch),
    DenseMatch(DenseMatch),
    Fusion(Fusion),
    OrderBy(OrderBy),
}

impl QueryDescriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::TextMatch(_) => DescriptorKind::TextMatch,
            Self::DenseMatch(_) => DescriptorKind::DenseMatch,
            Self::Fusion(_) => DescriptorKind::Fusion,
            Self::OrderBy(_) => DescriptorKind::OrderBy,
        }
    }

    /// Every dense match in this descriptor, including fusion children.
    pub fn dense_matches(&self) -> Vec<&DenseMatch> {
        match self {
            Self::DenseMatch(dense) => vec![dense],
            Self::Fusion(fusion) => fusion.children.iter().flat_map(QueryDescriptor::dense_matches).collect(),
            Self::TextMatch(_) | Self::OrderBy(_) => Vec::new(),
        }
    }
}

impl From<TextMatch> for QueryDescriptor {
    fn from(value: TextMatch) -> Self {
        Self::TextMatch(value)
    }
}

impl From<DenseMatch> for QueryDescriptor {
    fn from(value: DenseMatch) -> Self {
        Self::DenseMatch(value)
    }
}

impl From<Fusion> for QueryDescriptor {
    fn from(value: Fusion) -> Self {
        Self::Fusion(value)
    }
}

impl From<OrderBy> for QueryDescriptor {
    fn from(value: OrderBy) -> Self {
        Self::OrderBy(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    TextMatch,
    DenseMatch,
    Fusion,
    OrderBy,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TextMatch => "text_match",
            Self::DenseMatch => "dense_match",
            Self::Fusion => "fusion",
            Self::OrderBy => "order_by",
        };
        f.write_str(name)
    }
}

fn require_field(field: impl Into<String>) -> Result<String, ValidationError> {
    let field = field.into();
    if field.trim().is_empty() {
        return Err(ValidationError::EmptyField);
    }
    Ok(field)
}

/// Full-text match against one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMatch {
    field: String,
    text: String,
    minimum_should_match: f64,
}

impl TextMatch {
    /// # Errors
    ///
    /// Returns an error if the field or the query text is blank.
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> Result<Self, ValidationError> {
        let field = require_field(field)?;
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyQueryText);
        }
        Ok(Self { field, text, minimum_should_match: 0.0 })
    }

    /// Fraction of query terms a document must contain, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `fraction` is outside `[0, 1]`.
    pub fn with_minimum_should_match(mut self, fraction: f64) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ValidationError::MinimumShouldMatch(fraction));
        }
        self.minimum_should_match = fraction;
        Ok(self)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn minimum_should_match(&self) -> f64 {
        self.minimum_should_match
    }

    /// Number of terms out of `term_count` a document must contain. Never below one.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn required_terms(&self, term_count: usize) -> usize {
        let required = (self.minimum_should_match * term_count as f64).ceil() as usize;
        required.clamp(1, term_count.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    L2,
    Cosine,
    InnerProduct,
}

impl FromStr for Metric {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "cosine" => Ok(Self::Cosine),
            "ip" | "inner_product" | "dot" => Ok(Self::InnerProduct),
            other => Err(ValidationError::UnknownMetric(other.to_string())),
        }
    }
}

/// Dense-vector similarity against one vector field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DenseMatch {
    field: String,
    vector: Vec<f32>,
    metric: Metric,
    topk: usize,
    similarity: Option<f64>,
}

impl DenseMatch {
    /// # Errors
    ///
    /// Returns an error if the field is blank, the vector is empty or holds a
    /// non-finite component, or `topk` is zero.
    pub fn new(
        field: impl Into<String>,
        vector: Vec<f32>,
        metric: Metric,
        topk: usize,
    ) -> Result<Self, ValidationError> {
        let field = require_field(field)?;
        if vector.is_empty() {
            return Err(ValidationError::EmptyVector);
        }
        if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
            return Err(ValidationError::NonFiniteVector(index));
        }
        if topk == 0 {
            return Err(ValidationError::ZeroTopK);
        }
        Ok(Self { field, vector, metric, topk, similarity: None })
    }

    /// Drop hits whose normalized score falls below `threshold`.
    ///
    /// # Errors
    ///
    /// Returns an error if `threshold` is outside `[0, 1]`.
    pub fn with_similarity(mut self, threshold: f64) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ValidationError::Similarity(threshold));
        }
        self.similarity = Some(threshold);
        Ok(self)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn topk(&self) -> usize {
        self.topk
    }

    pub fn similarity(&self) -> Option<f64> {
        self.similarity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    WeightedSum,
    RankFusion,
}

impl FusionMethod {
    pub fn name(self) -> &'static str {
        match self {
            Self::WeightedSum => "weighted_sum",
            Self::RankFusion => "rank_fusion",
        }
    }
}

impl FromStr for FusionMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted_sum" | "weighted-sum" | "weighted" => Ok(Self::WeightedSum),
            "rrf" | "rank_fusion" | "rank-fusion" => Ok(Self::RankFusion),
            other => Err(ValidationError::UnknownFusionMethod(other.to_string())),
        }
    }
}

/// Parse a comma separated weight list such as `"0.05,0.95"`.
///
/// # Errors
///
/// Returns an error if any entry is not a number.
pub fn parse_weights(input: &str) -> Result<Vec<f64>, ValidationError> {
    input
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| ValidationError::MalformedWeights(input.to_string())))
        .collect()
}

/// Combines the scores of two or more leaf descriptors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fusion {
    children: Vec<QueryDescriptor>,
    method: FusionMethod,
    weights: Vec<f64>,
}

impl Fusion {
    /// Weights need not sum to one.
    ///
    /// # Errors
    ///
    /// Returns an error if there are fewer than two children, a child is a
    /// fusion or ordering descriptor, the weight count differs from the child
    /// count, or a weight is negative or non-finite.
    pub fn new(
        children: Vec<QueryDescriptor>,
        method: FusionMethod,
        weights: Vec<f64>,
    ) -> Result<Self, ValidationError> {
        if children.len() < 2 {
            return Err(ValidationError::TooFewChildren(children.len()));
        }
        for child in &children {
            match child {
                QueryDescriptor::Fusion(_) => return Err(ValidationError::NestedFusion),
                QueryDescriptor::OrderBy(_) => return Err(ValidationError::OrderByInFusion),
                QueryDescriptor::TextMatch(_) | QueryDescriptor::DenseMatch(_) => {}
            }
        }
        if weights.len() != children.len() {
            return Err(ValidationError::WeightCount { children: children.len(), weights: weights.len() });
        }
        if let Some((index, &value)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(ValidationError::InvalidWeight { index, value });
        }
        Ok(Self { children, method, weights })
    }

    /// # Errors
    ///
    /// Same conditions as [`Fusion::new`], minus the weight checks.
    pub fn equal_weights(children: Vec<QueryDescriptor>, method: FusionMethod) -> Result<Self, ValidationError> {
        let weights = vec![1.0; children.len()];
        Self::new(children, method, weights)
    }

    pub fn children(&self) -> &[QueryDescriptor] {
        &self.children
    }

    pub fn method(&self) -> FusionMethod {
        self.method
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    field: String,
    direction: SortDirection,
}

impl OrderBy {
    /// # Errors
    ///
    /// Returns an error if the field is blank.
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Result<Self, ValidationError> {
        Ok(Self { field: require_field(field)?, direction })
    }

    /// # Errors
    ///
    /// Returns an error if the field is blank.
    pub fn asc(field: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(field, SortDirection::Asc)
    }

    /// # Errors
    ///
    /// Returns an error if the field is blank.
    pub fn desc(field: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(field, SortDirection::Desc)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }
}
