//! Request context and query parameters.
//!
//! A [`Context`] tags every cache write with the tenant scope it belongs to
//! (user, institute, class, subject, role) so that invalidation can later
//! target "everything touching institute X".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tenant scope attached to reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institute_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// One tag of a [`Context`], in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextField {
    User,
    Institute,
    Class,
    Subject,
    Role,
}

impl ContextField {
    /// All fields in the fixed order used for cache keys.
    pub const ALL: &'static [Self] = &[
        Self::User,
        Self::Institute,
        Self::Class,
        Self::Subject,
        Self::Role,
    ];

    /// Wire name of the field.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "userId",
            Self::Institute => "instituteId",
            Self::Class => "classId",
            Self::Subject => "subjectId",
            Self::Role => "role",
        }
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_institute(mut self, id: impl Into<String>) -> Self {
        self.institute_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_class(mut self, id: impl Into<String>) -> Self {
        self.class_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_subject(mut self, id: impl Into<String>) -> Self {
        self.subject_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Value of a single tag.
    #[must_use]
    pub fn get(&self, field: ContextField) -> Option<&str> {
        match field {
            ContextField::User => self.user_id.as_deref(),
            ContextField::Institute => self.institute_id.as_deref(),
            ContextField::Class => self.class_id.as_deref(),
            ContextField::Subject => self.subject_id.as_deref(),
            ContextField::Role => self.role.as_deref(),
        }
    }

    /// Present tags in key order.
    pub fn fields(&self) -> impl Iterator<Item = (ContextField, &str)> {
        ContextField::ALL
            .iter()
            .filter_map(|field| self.get(*field).map(|value| (*field, value)))
    }

    /// Returns true if no tag is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields().next().is_none()
    }
}

// =============================================================================
// Query Parameters
// =============================================================================

/// A scalar query-parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    /// Non-finite values are treated as [`Scalar::Null`].
    Float(f64),
    Bool(bool),
    /// Absent value; omitted from keys and query strings.
    Null,
}

impl Scalar {
    /// Query-string rendering, or `None` for [`Scalar::Null`].
    #[must_use]
    pub fn as_query_value(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(f) if f.is_finite() => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Float(_) | Self::Null => None,
        }
    }

    /// JSON rendering used for cache keys.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Int(n) => Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Bool(b) => Value::Bool(*b),
            Self::Null => Value::Null,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float(f) => !f.is_finite(),
            _ => false,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Query parameters, kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    values: BTreeMap<String, Scalar>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter (builder style). Null values are kept but ignored downstream.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.values.insert(name.into(), value.into());
    }

    /// Non-null parameters in lexicographic name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.values
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Name/value pairs for the request query string.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.iter()
            .filter_map(|(name, value)| value.as_query_value().map(|v| (name.to_string(), v)))
            .collect()
    }

    /// Returns true if there are no non-null parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Parse a `name=value` argument as given on the command line.
    ///
    /// # Errors
    ///
    /// Returns an error message if the argument has no `=`.
    pub fn parse_pair(arg: &str) -> std::result::Result<(String, Scalar), String> {
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, got '{arg}'"))?;
        let scalar = value
            .parse::<i64>()
            .map(Scalar::Int)
            .or_else(|_| value.parse::<bool>().map(Scalar::Bool))
            .unwrap_or_else(|_| Scalar::Str(value.to_string()));
        Ok((name.trim().to_string(), scalar))
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}
