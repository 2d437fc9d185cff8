//! Typed job parameters.
//!
//! A job run is identified by its job name and its identifying parameters.
//! Parameters are checked against a [`JobParametersValidator`] when the job is
//! submitted, so steps never discover a missing or mistyped key half way through.

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Key of the parameter injected by [`RunIdIncrementer`].
pub const RUN_ID_KEY: &str = "run.id";

/// Type of a job parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Long,
    Double,
    Date,
}

/// A single typed job parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobParameter {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl JobParameter {
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            JobParameter::String(_) => ParameterType::String,
            JobParameter::Long(_) => ParameterType::Long,
            JobParameter::Double(_) => ParameterType::Double,
            JobParameter::Date(_) => ParameterType::Date,
        }
    }
}

impl fmt::Display for JobParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobParameter::String(value) => write!(f, "{}", value),
            JobParameter::Long(value) => write!(f, "{}", value),
            JobParameter::Double(value) => write!(f, "{}", value),
            JobParameter::Date(value) => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParameterEntry {
    value: JobParameter,
    identifying: bool,
}

/// Immutable set of named, typed job parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, ParameterEntry>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key).map(|entry| &entry.value)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(JobParameter::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(JobParameter::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(JobParameter::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key) {
            Some(JobParameter::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn is_identifying(&self, key: &str) -> bool {
        self.parameters
            .get(key)
            .is_some_and(|entry| entry.identifying)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters
            .iter()
            .map(|(key, entry)| (key.as_str(), &entry.value))
    }

    /// Identifying parameters, keyed by name.
    ///
    /// Values keep their type, so a `String` "5" and a `Long` 5 differ.
    pub fn identity(&self) -> BTreeMap<&str, &JobParameter> {
        self.parameters
            .iter()
            .filter(|(_, entry)| entry.identifying)
            .map(|(key, entry)| (key.as_str(), &entry.value))
            .collect()
    }

    /// Whether both parameter sets describe the same job instance.
    pub fn same_identity(&self, other: &JobParameters) -> bool {
        self.identity() == other.identity()
    }

    fn with(mut self, key: &str, value: JobParameter, identifying: bool) -> Self {
        self.parameters
            .insert(key.to_string(), ParameterEntry { value, identifying });
        self
    }
}

/// Builder for [`JobParameters`].
///
/// # Example
///
/// ```rust
/// use spring_batch_flow::core::parameters::JobParametersBuilder;
///
/// let parameters = JobParametersBuilder::new()
///     .add_string("type", "roses")
///     .add_long("quantity", 12)
///     .build();
///
/// assert_eq!(parameters.get_string("type"), Some("roses"));
/// assert_eq!(parameters.get_long("quantity"), Some(12));
/// ```
#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: JobParameters,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing parameter set.
    pub fn from(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.clone(),
        }
    }

    pub fn add_string(self, key: &str, value: impl Into<String>) -> Self {
        self.add(key, JobParameter::String(value.into()), true)
    }

    pub fn add_long(self, key: &str, value: i64) -> Self {
        self.add(key, JobParameter::Long(value), true)
    }

    pub fn add_double(self, key: &str, value: f64) -> Self {
        self.add(key, JobParameter::Double(value), true)
    }

    pub fn add_date(self, key: &str, value: DateTime<Utc>) -> Self {
        self.add(key, JobParameter::Date(value), true)
    }

    /// Adds a parameter that is carried to the steps but does not take part
    /// in the identity of the run.
    pub fn add_non_identifying(self, key: &str, value: JobParameter) -> Self {
        self.add(key, value, false)
    }

    pub fn add(mut self, key: &str, value: JobParameter, identifying: bool) -> Self {
        self.parameters = self.parameters.with(key, value, identifying);
        self
    }

    pub fn build(self) -> JobParameters {
        self.parameters
    }
}

/// Declares the keys a job accepts and their types.
///
/// Validation fails on a missing required key, an unknown key, or a value of
/// the wrong type. The `run.id` key injected by [`RunIdIncrementer`] is always
/// accepted as a `Long`.
#[derive(Debug, Clone, Default)]
pub struct JobParametersValidator {
    required: BTreeMap<String, ParameterType>,
    optional: BTreeMap<String, ParameterType>,
}

impl JobParametersValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, key: &str, parameter_type: ParameterType) -> Self {
        self.required.insert(key.to_string(), parameter_type);
        self
    }

    pub fn optional(mut self, key: &str, parameter_type: ParameterType) -> Self {
        self.optional.insert(key.to_string(), parameter_type);
        self
    }

    pub fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        for key in self.required.keys() {
            if parameters.get(key).is_none() {
                return Err(BatchError::InvalidJobParameters(format!(
                    "missing required parameter '{}'",
                    key
                )));
            }
        }

        for (key, value) in parameters.iter() {
            let expected = self
                .required
                .get(key)
                .or_else(|| self.optional.get(key))
                .copied()
                .or((key == RUN_ID_KEY).then_some(ParameterType::Long));

            match expected {
                None => {
                    return Err(BatchError::InvalidJobParameters(format!(
                        "unknown parameter '{}'",
                        key
                    )));
                }
                Some(expected) if expected != value.parameter_type() => {
                    return Err(BatchError::InvalidJobParameters(format!(
                        "parameter '{}' expected {:?}, got {:?}",
                        key,
                        expected,
                        value.parameter_type()
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Monotonic source of run identifiers.
///
/// Owned by the component that needs it, usually a [`RunIdIncrementer`].
#[derive(Debug, Default)]
pub struct RunIdSequence {
    last: AtomicI64,
}

impl RunIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence whose next value is `last + 1`.
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Makes sure the next value is greater than `value`.
    pub fn advance_past(&self, value: i64) {
        self.last.fetch_max(value, Ordering::SeqCst);
    }

    pub fn next_id(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Computes the parameters of the next run of a job.
pub trait JobParametersIncrementer: Sync {
    /// `previous` holds the parameters of the last recorded execution of the
    /// job, whatever its instance, when the repository has one.
    fn next(&self, parameters: &JobParameters, previous: Option<&JobParameters>) -> JobParameters;
}

/// Injects an increasing `run.id` so that otherwise identical parameter sets
/// still produce distinct runs.
#[derive(Debug, Default)]
pub struct RunIdIncrementer {
    sequence: RunIdSequence,
}

impl RunIdIncrementer {
    pub fn new(sequence: RunIdSequence) -> Self {
        Self { sequence }
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, parameters: &JobParameters, previous: Option<&JobParameters>) -> JobParameters {
        let known = [Some(parameters), previous]
            .into_iter()
            .flatten()
            .filter_map(|parameters| parameters.get_long(RUN_ID_KEY));
        for run_id in known {
            self.sequence.advance_past(run_id);
        }
        let run_id = self.sequence.next_id();

        JobParametersBuilder::from(parameters)
            .add_long(RUN_ID_KEY, run_id)
            .build()
    }
}
