//! Template catalog.
//!
//! Pre-registered, parameterized analytics queries, safe by construction: the
//! query shape is fixed at registration time and only scalar parameters vary,
//! so rendering needs parameter-schema checking but no free-text validation.
//! Templates never accept raw query fragments as parameters.

use crate::driver::ParamMap;
use crate::error::ValidationError;
use crate::gateway::{CacheClass, ExecutionRequest};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Scalar parameter types accepted by templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Integer,
    Float,
    String,
    Boolean,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Integer => value.as_i64().is_some(),
            ParamType::Float => value.as_f64().is_some(),
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

/// Declared schema for one template parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    /// Inclusive range for integer parameters.
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ParamSpec {
    pub fn required(name: &str, ty: ParamType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: true,
            default: None,
            min: None,
            max: None,
        }
    }

    pub fn optional(name: &str, ty: ParamType, default: Value) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
            default: Some(default),
            min: None,
            max: None,
        }
    }

    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// A fixed, parameterized analytics query.
#[derive(Debug, Clone)]
pub struct AnalyticTemplate {
    pub id: String,
    pub description: String,
    /// Query text with `$name` placeholders resolved as bound parameters by
    /// the driver, never by text substitution.
    pub query: String,
    pub params: Vec<ParamSpec>,
    /// Row cap applied when no `limit` parameter is supplied.
    pub default_limit: usize,
    /// Upper bound any supplied `limit` is clamped to.
    pub max_limit: usize,
}

impl AnalyticTemplate {
    /// JSON description of the parameter schema, for tool discovery.
    pub fn schema_json(&self) -> Value {
        let params: Vec<Value> = self
            .params
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "type": p.ty.name(),
                    "required": p.required,
                    "default": p.default,
                    "min": p.min,
                    "max": p.max,
                })
            })
            .collect();
        json!({
            "id": self.id,
            "description": self.description,
            "parameters": params,
            "default_limit": self.default_limit,
            "max_limit": self.max_limit,
        })
    }
}

/// Registry of templates, built at process start and immutable thereafter.
pub struct TemplateCatalog {
    templates: HashMap<String, AnalyticTemplate>,
}

impl TemplateCatalog {
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Catalog of built-in learning-analytics templates.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(AnalyticTemplate {
            id: "get_top_countries_by_learners".into(),
            description: "Countries ranked by number of registered learners".into(),
            query: "MATCH (l:Learner)-[:LOCATED_IN]->(c:Country) \
                    RETURN c.name AS country, count(l) AS learners \
                    ORDER BY learners DESC LIMIT $limit"
                .into(),
            params: vec![ParamSpec::optional("limit", ParamType::Integer, json!(10))],
            default_limit: 10,
            max_limit: 1_000,
        });
        catalog.register(AnalyticTemplate {
            id: "get_popular_courses".into(),
            description: "Courses ranked by enrollment count".into(),
            query: "MATCH (l:Learner)-[:ENROLLED_IN]->(c:Course) \
                    RETURN c.title AS course, count(l) AS enrollments \
                    ORDER BY enrollments DESC LIMIT $limit"
                .into(),
            params: vec![ParamSpec::optional("limit", ParamType::Integer, json!(10))],
            default_limit: 10,
            max_limit: 1_000,
        });
        catalog.register(AnalyticTemplate {
            id: "get_course_enrollment".into(),
            description: "Enrollment count for a single course code".into(),
            query: "MATCH (l:Learner)-[:ENROLLED_IN]->(c:Course {code: $course_code}) \
                    RETURN c.code AS course, count(l) AS enrolled LIMIT 1"
                .into(),
            params: vec![ParamSpec::required("course_code", ParamType::String)],
            default_limit: 1,
            max_limit: 1,
        });
        catalog.register(AnalyticTemplate {
            id: "get_recently_active_learners".into(),
            description: "Learners active within the last N days".into(),
            query: "MATCH (l:Learner) WHERE l.last_active_days <= $days \
                    RETURN l.name AS learner, l.last_active_days AS days_ago \
                    ORDER BY days_ago ASC LIMIT $limit"
                .into(),
            params: vec![
                ParamSpec::optional("days", ParamType::Integer, json!(30))
                    .with_range(1, 365),
                ParamSpec::optional("limit", ParamType::Integer, json!(25)),
            ],
            default_limit: 25,
            max_limit: 1_000,
        });
        catalog.register(AnalyticTemplate {
            id: "get_completion_rate_by_course".into(),
            description: "Courses ranked by average learner progress".into(),
            query: "MATCH (l:Learner)-[e:ENROLLED_IN]->(c:Course) \
                    RETURN c.title AS course, avg(e.progress) AS avg_progress \
                    ORDER BY avg_progress DESC LIMIT $limit"
                .into(),
            params: vec![ParamSpec::optional("limit", ParamType::Integer, json!(10))],
            default_limit: 10,
            max_limit: 1_000,
        });
        catalog
    }

    pub fn register(&mut self, template: AnalyticTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, id: &str) -> Option<&AnalyticTemplate> {
        self.templates.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnalyticTemplate> {
        self.templates.values()
    }

    /// Check supplied parameters against the template's schema and produce an
    /// execution request. Performs no I/O.
    pub fn render(
        &self,
        template_id: &str,
        supplied: &ParamMap,
    ) -> Result<ExecutionRequest, ValidationError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| ValidationError::UnknownTemplate(template_id.to_string()))?;

        for name in supplied.keys() {
            if !template.params.iter().any(|p| &p.name == name) {
                return Err(ValidationError::ParameterTypeMismatch {
                    name: name.clone(),
                    expected: "a declared parameter".into(),
                    got: "undeclared parameter".into(),
                });
            }
        }

        let mut bound = ParamMap::new();
        let mut row_limit = template.default_limit.min(template.max_limit);

        for spec in &template.params {
            let value = match supplied.get(&spec.name) {
                Some(value) => value.clone(),
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(ValidationError::ParameterTypeMismatch {
                            name: spec.name.clone(),
                            expected: spec.ty.name().into(),
                            got: "missing".into(),
                        });
                    }
                },
            };

            if !spec.ty.matches(&value) {
                return Err(ValidationError::ParameterTypeMismatch {
                    name: spec.name.clone(),
                    expected: spec.ty.name().into(),
                    got: json_type_name(&value).into(),
                });
            }

            // A `limit` parameter is clamped into [1, max_limit] rather than
            // rejected; other integer parameters must satisfy their range.
            if spec.name == "limit" && spec.ty == ParamType::Integer {
                let requested = value.as_i64().unwrap_or(1);
                let clamped = requested.clamp(1, template.max_limit as i64);
                row_limit = clamped as usize;
                bound.insert(spec.name.clone(), json!(clamped));
                continue;
            }

            if let (ParamType::Integer, Some(parsed)) = (spec.ty, value.as_i64()) {
                let min = spec.min.unwrap_or(i64::MIN);
                let max = spec.max.unwrap_or(i64::MAX);
                if parsed < min || parsed > max {
                    return Err(ValidationError::ParameterOutOfRange {
                        name: spec.name.clone(),
                        value: parsed,
                        min,
                        max,
                    });
                }
            }

            bound.insert(spec.name.clone(), value);
        }

        Ok(ExecutionRequest {
            query_text: template.query.clone(),
            params: bound,
            row_limit,
            timeout: None,
            class: CacheClass::Template,
        })
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_unknown_template() {
        let catalog = TemplateCatalog::builtin();
        let err = catalog
            .render("get_top_invoices", &ParamMap::new())
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTemplate(id) if id == "get_top_invoices"));
    }

    #[test]
    fn test_defaults_applied() {
        let catalog = TemplateCatalog::builtin();
        let request = catalog
            .render("get_top_countries_by_learners", &ParamMap::new())
            .unwrap();
        assert_eq!(request.row_limit, 10);
        assert_eq!(request.params["limit"], json!(10));
        assert!(request.query_text.contains("$limit"));
    }

    #[test]
    fn test_limit_clamped_to_max() {
        let catalog = TemplateCatalog::builtin();
        let request = catalog
            .render(
                "get_top_countries_by_learners",
                &params(&[("limit", json!(5_000))]),
            )
            .unwrap();
        assert_eq!(request.row_limit, 1_000);
        assert_eq!(request.params["limit"], json!(1_000));
    }

    #[test]
    fn test_limit_clamped_up_from_zero() {
        let catalog = TemplateCatalog::builtin();
        let request = catalog
            .render(
                "get_top_countries_by_learners",
                &params(&[("limit", json!(0))]),
            )
            .unwrap();
        assert_eq!(request.row_limit, 1);
    }

    #[test]
    fn test_missing_required_parameter() {
        let catalog = TemplateCatalog::builtin();
        let err = catalog
            .render("get_course_enrollment", &ParamMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ParameterTypeMismatch { name, .. } if name == "course_code"
        ));
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let catalog = TemplateCatalog::builtin();
        let err = catalog
            .render(
                "get_course_enrollment",
                &params(&[("course_code", json!(42))]),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ParameterTypeMismatch { name, expected, .. }
                if name == "course_code" && expected == "string"
        ));
    }

    #[test]
    fn test_out_of_range_parameter() {
        let catalog = TemplateCatalog::builtin();
        let err = catalog
            .render(
                "get_recently_active_learners",
                &params(&[("days", json!(900))]),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::ParameterOutOfRange {
                name: "days".into(),
                value: 900,
                min: 1,
                max: 365,
            }
        );
    }

    #[test]
    fn test_undeclared_parameter_rejected() {
        let catalog = TemplateCatalog::builtin();
        let err = catalog
            .render(
                "get_top_countries_by_learners",
                &params(&[("query", json!("MATCH (n) DETACH DELETE n"))]),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ParameterTypeMismatch { name, .. } if name == "query"
        ));
    }

    #[test]
    fn test_builtin_ids_sorted() {
        let catalog = TemplateCatalog::builtin();
        let ids = catalog.ids();
        assert!(ids.contains(&"get_top_countries_by_learners"));
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_schema_json_shape() {
        let catalog = TemplateCatalog::builtin();
        let schema = catalog
            .get("get_recently_active_learners")
            .unwrap()
            .schema_json();
        assert_eq!(schema["id"], "get_recently_active_learners");
        assert_eq!(schema["parameters"][0]["name"], "days");
        assert_eq!(schema["parameters"][0]["min"], 1);
    }
}
