//! Job parameters, instance identity, validation and incrementers.

use crate::error::{BatchError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Key injected by [`RunIdIncrementer`]
pub const RUN_ID_KEY: &str = "run.id";

/// Typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum JobParameter {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
}

impl JobParameter {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobParameter::String(_) => "string",
            JobParameter::Long(_) => "long",
            JobParameter::Double(_) => "double",
            JobParameter::Date(_) => "date",
            JobParameter::Boolean(_) => "boolean",
        }
    }

    /// Integral view of the value; string values holding a number count too.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            JobParameter::Long(v) => Some(*v),
            JobParameter::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Parses a value of the given type name (`string`, `long`, `double`,
    /// `date`, `boolean`). Dates accept RFC 3339 or `yyyy-MM-dd`.
    pub fn parse_typed(type_name: &str, raw: &str) -> Result<Self> {
        let invalid = |what: &str| {
            BatchError::InvalidParameters(format!("'{raw}' is not a valid {what}"))
        };
        match type_name.to_lowercase().as_str() {
            "string" => Ok(JobParameter::String(raw.to_string())),
            "long" => raw.parse().map(JobParameter::Long).map_err(|_| invalid("long")),
            "double" => raw.parse().map(JobParameter::Double).map_err(|_| invalid("double")),
            "boolean" => raw.parse().map(JobParameter::Boolean).map_err(|_| invalid("boolean")),
            "date" => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                    return Ok(JobParameter::Date(dt.with_timezone(&Utc)));
                }
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| JobParameter::Date(dt.and_utc()))
                    .ok_or_else(|| invalid("date"))
            },
            other => Err(BatchError::InvalidParameters(format!(
                "unknown parameter type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for JobParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobParameter::String(v) => write!(f, "{v}"),
            JobParameter::Long(v) => write!(f, "{v}"),
            JobParameter::Double(v) => write!(f, "{v}"),
            JobParameter::Date(v) => write!(f, "{}", v.to_rfc3339()),
            JobParameter::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for JobParameter {
    fn from(v: &str) -> Self {
        JobParameter::String(v.to_string())
    }
}

impl From<String> for JobParameter {
    fn from(v: String) -> Self {
        JobParameter::String(v)
    }
}

impl From<i64> for JobParameter {
    fn from(v: i64) -> Self {
        JobParameter::Long(v)
    }
}

impl From<f64> for JobParameter {
    fn from(v: f64) -> Self {
        JobParameter::Double(v)
    }
}

impl From<bool> for JobParameter {
    fn from(v: bool) -> Self {
        JobParameter::Boolean(v)
    }
}

impl From<DateTime<Utc>> for JobParameter {
    fn from(v: DateTime<Utc>) -> Self {
        JobParameter::Date(v)
    }
}

/// Immutable name -> value mapping supplied to a launch.
///
/// Stored sorted, so equality and the derived job key ignore insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    params: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.params.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.params.iter()
    }

    /// Copy of `self` with every entry of `other` laid on top.
    pub fn merged(&self, other: &JobParameters) -> JobParameters {
        let mut params = self.params.clone();
        params.extend(other.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        JobParameters { params }
    }

    /// Stable digest identifying a job instance.
    ///
    /// Only `identifying` keys take part when given; otherwise every key does.
    pub fn job_key(&self, identifying: Option<&BTreeSet<String>>) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.params {
            if identifying.is_some_and(|keys| !keys.contains(key)) {
                continue;
            }
            hasher.update(format!("{key}={}:{value};", value.type_name()).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Parses `key=value` or `key(type)=value` launch arguments.
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<JobParameters> {
        let mut builder = JobParameters::builder();
        for arg in args {
            let arg = arg.as_ref();
            let (lhs, raw) = arg.split_once('=').ok_or_else(|| {
                BatchError::InvalidParameters(format!("expected key=value, got '{arg}'"))
            })?;
            let lhs = lhs.trim();
            let (key, value) = match lhs.strip_suffix(')').and_then(|l| l.split_once('(')) {
                Some((key, type_name)) => (key, JobParameter::parse_typed(type_name, raw)?),
                None => (lhs, JobParameter::String(raw.to_string())),
            };
            if key.is_empty() {
                return Err(BatchError::InvalidParameters(format!(
                    "empty parameter name in '{arg}'"
                )));
            }
            builder = builder.add(key, value);
        }
        Ok(builder.build())
    }
}

impl std::fmt::Display for JobParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    params: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn add(mut self, key: impl Into<String>, value: impl Into<JobParameter>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            params: self.params,
        }
    }
}

/// Checks launch parameters before any execution is created
pub trait JobParametersValidator: Send + Sync {
    fn validate(&self, params: &JobParameters) -> Result<()>;
}

/// Required/optional key validator.
///
/// Missing required keys are rejected. When optional keys are declared, any
/// key outside `required ∪ optional` is rejected too.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required: BTreeSet<String>,
    optional: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    pub fn new<R, O>(required: R, optional: O) -> Result<Self>
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let required: BTreeSet<String> = required.into_iter().map(Into::into).collect();
        let optional: BTreeSet<String> = optional.into_iter().map(Into::into).collect();
        if let Some(both) = required.intersection(&optional).next() {
            return Err(BatchError::InvalidDefinition(format!(
                "parameter '{both}' is declared both required and optional"
            )));
        }
        Ok(Self { required, optional })
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, params: &JobParameters) -> Result<()> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !params.contains(key))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(BatchError::InvalidParameters(format!(
                "missing required keys [{}] in {params}",
                missing.join(", ")
            )));
        }

        if !self.optional.is_empty() {
            let unknown: Vec<&str> = params
                .iter()
                .map(|(key, _)| key.as_str())
                .filter(|key| !self.required.contains(*key) && !self.optional.contains(*key))
                .collect();
            if !unknown.is_empty() {
                return Err(BatchError::InvalidParameters(format!(
                    "keys [{}] are neither required nor optional",
                    unknown.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Derives the parameters of the next launch from the previous instance's.
pub trait JobParametersIncrementer: Send + Sync {
    /// Key this incrementer owns; its value always wins over caller input.
    fn key(&self) -> &str;

    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Sets `run.id` to the previous value + 1, starting at 1.
#[derive(Debug, Clone)]
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub fn new() -> Self {
        Self {
            key: RUN_ID_KEY.to_string(),
        }
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn key(&self) -> &str {
        &self.key
    }

    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let id = previous
            .and_then(|p| p.get(&self.key))
            .and_then(JobParameter::as_long)
            .map_or(1, |id| id + 1);
        let base = previous.cloned().unwrap_or_default();
        base.merged(&JobParameters::builder().add(self.key.clone(), id).build())
    }
}
