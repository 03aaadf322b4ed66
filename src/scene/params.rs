//! Typed access to a command's loosely typed `params` object.
//!
//! Absent and `null` parameters fall back to the caller's default.

use super::Vec3;
use crate::executor::ExecutionError;
use serde_json::{Map, Value};

pub(crate) struct Params<'a>(&'a Map<String, Value>);

impl<'a> Params<'a> {
    pub(crate) fn new(params: &'a Map<String, Value>) -> Self {
        Self(params)
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// A required string, such as `object_name`.
    pub(crate) fn required_str(&self, name: &'static str) -> Result<&'a str, ExecutionError> {
        match self.get(name) {
            None => Err(ExecutionError::MissingParam(name)),
            Some(value) => value
                .as_str()
                .ok_or_else(|| ExecutionError::invalid(name, "expected a string")),
        }
    }

    pub(crate) fn string(&self, name: &'static str, default: &str) -> Result<String, ExecutionError> {
        match self.get(name) {
            None => Ok(default.to_string()),
            Some(value) => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ExecutionError::invalid(name, "expected a string")),
        }
    }

    pub(crate) fn number(&self, name: &'static str, default: f64) -> Result<f64, ExecutionError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => as_finite(name, value),
        }
    }

    /// A size, radius or depth: finite and not negative.
    pub(crate) fn extent(&self, name: &'static str, default: f64) -> Result<f64, ExecutionError> {
        let value = self.number(name, default)?;
        if value < 0.0 {
            return Err(ExecutionError::invalid(name, "must not be negative"));
        }
        Ok(value)
    }

    /// Pixel dimension in `1..=max`.
    pub(crate) fn dimension(&self, name: &'static str, default: u32, max: u32) -> Result<u32, ExecutionError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .filter(|n| (1..=u64::from(max)).contains(n))
                .map(|n| n as u32)
                .ok_or_else(|| {
                    ExecutionError::invalid(name, format!("expected an integer between 1 and {max}"))
                }),
        }
    }

    pub(crate) fn vec3(&self, name: &'static str, default: Vec3) -> Result<Vec3, ExecutionError> {
        Ok(self.optional_vec3(name)?.unwrap_or(default))
    }

    pub(crate) fn optional_vec3(&self, name: &'static str) -> Result<Option<Vec3>, ExecutionError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let components = components(name, value, 3, 3)?;
        Ok(Some([components[0], components[1], components[2]]))
    }

    /// RGBA color; three components get an alpha of 1.
    pub(crate) fn color(&self, name: &'static str, default: [f64; 4]) -> Result<[f64; 4], ExecutionError> {
        let Some(value) = self.get(name) else {
            return Ok(default);
        };
        let c = components(name, value, 3, 4)?;
        Ok([c[0], c[1], c[2], c.get(3).copied().unwrap_or(1.0)])
    }
}

fn as_finite(name: &'static str, value: &Value) -> Result<f64, ExecutionError> {
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ExecutionError::invalid(name, "expected a number"))
}

fn components(
    name: &'static str,
    value: &Value,
    min: usize,
    max: usize,
) -> Result<Vec<f64>, ExecutionError> {
    let items = value
        .as_array()
        .filter(|items| (min..=max).contains(&items.len()))
        .ok_or_else(|| {
            let expected = if min == max {
                format!("expected an array of {min} numbers")
            } else {
                format!("expected an array of {min} to {max} numbers")
            };
            ExecutionError::invalid(name, expected)
        })?;
    items.iter().map(|item| as_finite(name, item)).collect()
}
