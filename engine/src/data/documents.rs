//! Typed views of CDM documents
//!
//! Every collection stores denormalized documents: a `tag` document carries the
//! `run` it belongs to, a `period` carries its `run`, `iteration` and `sample`.
//! Only the fields the engine reads are modeled.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DataError;
use crate::utils::time::parse_millis;

/// Projection of a raw `_source` into a typed wrapper
pub trait CdmDocument: DeserializeOwned {
    /// Document kind used in error messages
    const KIND: &'static str;
    /// Top-level keys that must be present
    const REQUIRED: &'static [&'static str];

    fn project(source: &Value) -> Result<Self, DataError> {
        let Some(object) = source.as_object() else {
            return Err(DataError::backend_shape(Self::KIND, "document is not an object"));
        };
        if Self::REQUIRED.iter().any(|key| !object.contains_key(*key)) {
            return Err(DataError::missing_keys(
                Self::KIND,
                Self::REQUIRED,
                object.keys().cloned().collect(),
            ));
        }
        serde_json::from_value(source.clone())
            .map_err(|e| DataError::backend_shape(Self::KIND, e.to_string()))
    }
}

/// Loosely typed CDM value; numbers are often stored as strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Text(t) => parse_millis(t),
            Self::Bool(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(t) => t.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(t) => f.write_str(t),
        }
    }
}

/// Reference to an owning entity
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdRef {
    pub id: String,
}

// ============================================================================
// Run hierarchy
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RunFields {
    pub id: String,
    pub benchmark: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub source: Option<String>,
    pub host: Option<String>,
    pub harness: Option<String>,
    pub desc: Option<String>,
    pub begin: Option<Scalar>,
    pub end: Option<Scalar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunDoc {
    pub run: RunFields,
}

impl CdmDocument for RunDoc {
    const KIND: &'static str = "run";
    const REQUIRED: &'static [&'static str] = &["run"];
}

#[derive(Debug, Clone, Deserialize)]
pub struct IterationFields {
    pub id: String,
    pub num: Option<Scalar>,
    pub status: Option<String>,
    #[serde(rename = "primary-metric")]
    pub primary_metric: Option<String>,
    #[serde(rename = "primary-period")]
    pub primary_period: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IterationDoc {
    pub run: IdRef,
    pub iteration: IterationFields,
}

impl CdmDocument for IterationDoc {
    const KIND: &'static str = "iteration";
    const REQUIRED: &'static [&'static str] = &["run", "iteration"];
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleFields {
    pub id: String,
    pub num: Option<Scalar>,
    pub status: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleDoc {
    pub run: IdRef,
    pub iteration: IdRef,
    pub sample: SampleFields,
}

impl CdmDocument for SampleDoc {
    const KIND: &'static str = "sample";
    const REQUIRED: &'static [&'static str] = &["run", "iteration", "sample"];
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodFields {
    pub id: String,
    pub name: String,
    pub begin: Option<Scalar>,
    pub end: Option<Scalar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodDoc {
    pub run: IdRef,
    pub iteration: IdRef,
    pub sample: IdRef,
    pub period: PeriodFields,
}

impl CdmDocument for PeriodDoc {
    const KIND: &'static str = "period";
    const REQUIRED: &'static [&'static str] = &["run", "iteration", "sample", "period"];
}

// ============================================================================
// Tags and params
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TagFields {
    pub name: String,
    pub val: Scalar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagDoc {
    pub run: IdRef,
    pub tag: TagFields,
}

impl CdmDocument for TagDoc {
    const KIND: &'static str = "tag";
    const REQUIRED: &'static [&'static str] = &["run", "tag"];
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamFields {
    pub arg: String,
    pub val: Scalar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamDoc {
    pub run: IdRef,
    pub iteration: IdRef,
    pub param: ParamFields,
}

impl CdmDocument for ParamDoc {
    const KIND: &'static str = "param";
    const REQUIRED: &'static [&'static str] = &["run", "iteration", "param"];
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDescFields {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub class: Option<String>,
    #[serde(default)]
    pub names: BTreeMap<String, Scalar>,
}

impl MetricDescFields {
    /// `source::type` label shared by all descriptors of one metric
    pub fn label(&self) -> String {
        format!("{}::{}", self.source, self.kind)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDescDoc {
    pub run: IdRef,
    pub period: Option<IdRef>,
    pub metric_desc: MetricDescFields,
}

impl CdmDocument for MetricDescDoc {
    const KIND: &'static str = "metric_desc";
    const REQUIRED: &'static [&'static str] = &["run", "metric_desc"];
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDataFields {
    pub begin: Scalar,
    pub end: Scalar,
    pub duration: Option<Scalar>,
    pub value: Scalar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDataDoc {
    pub metric_desc: IdRef,
    pub metric_data: MetricDataFields,
}

impl CdmDocument for MetricDataDoc {
    const KIND: &'static str = "metric_data";
    const REQUIRED: &'static [&'static str] = &["metric_desc", "metric_data"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projects_iteration_with_dashed_keys() {
        let doc = IterationDoc::project(&json!({
            "cdm": { "ver": "v8dev" },
            "run": { "id": "r1" },
            "iteration": {
                "id": "i1",
                "num": "2",
                "status": "pass",
                "primary-metric": "uperf::Gbps",
                "primary-period": "measurement"
            }
        }))
        .unwrap();
        assert_eq!(doc.run.id, "r1");
        assert_eq!(doc.iteration.num.and_then(|n| n.as_i64()), Some(2));
        assert_eq!(doc.iteration.primary_metric.as_deref(), Some("uperf::Gbps"));
        assert_eq!(doc.iteration.primary_period.as_deref(), Some("measurement"));
    }

    #[test]
    fn missing_required_key_lists_both_sets() {
        let err = ParamDoc::project(&json!({
            "run": { "id": "r1" },
            "param": { "arg": "bs", "val": "4k" }
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected param shape: missing required keys: required [run, iteration, param], present [param, run]"
        );
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(TagDoc::project(&json!([1, 2])).is_err());
    }

    #[test]
    fn scalar_accepts_strings_and_numbers() {
        let data = MetricDataDoc::project(&json!({
            "metric_desc": { "id": "d1" },
            "metric_data": { "begin": "1000", "end": 1999, "duration": "1000", "value": "2.5" }
        }))
        .unwrap();
        assert_eq!(data.metric_data.begin.as_i64(), Some(1000));
        assert_eq!(data.metric_data.end.as_i64(), Some(1999));
        assert_eq!(data.metric_data.value.as_f64(), Some(2.5));
    }

    #[test]
    fn descriptor_label_and_names() {
        let desc = MetricDescDoc::project(&json!({
            "run": { "id": "r1" },
            "period": { "id": "p1" },
            "metric_desc": {
                "id": "d1", "source": "mpstat", "type": "Busy-CPU", "class": "throughput",
                "names": { "cpu": "3", "type": "usr" }
            }
        }))
        .unwrap();
        assert_eq!(desc.metric_desc.label(), "mpstat::Busy-CPU");
        assert_eq!(desc.period.unwrap().id, "p1");
        assert_eq!(desc.metric_desc.names["cpu"].to_string(), "3");
    }
}
