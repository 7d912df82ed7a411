//! Typed, lazily evaluated module parameters.
//!
//! Parameters are attached to modules (and channels) through dotted paths
//! and raw string values, e.g. `net.host.queue: 16`. Values are interpreted
//! on read: literals, quoted strings, or expressions over sibling and
//! ancestor parameters and a fixed set of pure functions. Expression values
//! are volatile (re-evaluated per read) unless prefixed with `const`, in
//! which case the first evaluation is memoized.

use crate::net::module::with_ctx;
use crate::net::runtime::globals;
use crate::runtime::SimError;
use crate::time::Duration;
use std::fmt::Display;
use std::sync::Arc;

mod expr;
pub use expr::ParValue;
use expr::{evaluate_in, EvalCtx};

mod map;
pub use map::ParMap;

mod unit;
pub use unit::{convert_unit, unit, Unit};

///
/// Returns a handle to a parameter of the current module.
///
/// > *This function requires a node-context within the simulation.*
///
/// # Panics
///
/// Panics if no module is currently in scope.
///
#[must_use]
pub fn par(key: &str) -> Par {
    let module = with_ctx(|ctx| ctx.path().as_str().to_string());
    Par::new(globals().parameters.clone(), key, &module)
}

///
/// Returns a handle to a parameter of the module at the given path.
///
/// # Panics
///
/// Panics if no simulation is currently active.
///
#[must_use]
pub fn par_for(module: impl AsRef<str>, key: &str) -> Par {
    Par::new(globals().parameters.clone(), key, module.as_ref())
}

///
/// A handle to a parameter associated with a node within the simulation.
///
#[derive(Debug, Clone)]
pub struct Par {
    full_key: String,
    module: String,
    map: Arc<ParMap>,
}

impl Par {
    pub(crate) fn new(map: Arc<ParMap>, key: &str, module: &str) -> Par {
        let full_key = if module.is_empty() {
            key.to_string()
        } else {
            format!("{module}.{key}")
        };
        Par {
            full_key,
            module: module.to_string(),
            map,
        }
    }

    /// Indicates whether the parameter has an assigned value.
    #[must_use]
    pub fn is_some(&self) -> bool {
        self.map.get(&self.full_key).is_some()
    }

    /// Indicates whether the parameter is unassigned.
    #[must_use]
    pub fn is_none(&self) -> bool {
        !self.is_some()
    }

    ///
    /// Evaluates the parameter to a typed value.
    ///
    /// # Errors
    ///
    /// Fails with [`SimError::ParameterUnassigned`] if no value is assigned,
    /// with [`SimError::CircularReference`] if expressions form a cycle, and
    /// with [`SimError::UnitMismatch`] on unit errors within expressions.
    ///
    pub fn value(&self) -> Result<ParValue, SimError> {
        let Some(raw) = self.map.get(&self.full_key) else {
            return Err(SimError::ParameterUnassigned {
                path: self.full_key.clone(),
            });
        };

        let raw = raw.trim();
        if let Some(inner) = raw.strip_prefix("const ") {
            if let Some(memo) = self.map.memoized(&self.full_key) {
                return Ok(memo);
            }
            let value = self.evaluate(inner)?;
            self.map.memoize(&self.full_key, value.clone());
            return Ok(value);
        }

        self.evaluate(raw)
    }

    fn evaluate(&self, raw: &str) -> Result<ParValue, SimError> {
        let mut ctx = EvalCtx {
            map: &self.map,
            module: &self.module,
            visiting: vec![self.full_key.clone()],
        };
        evaluate_in(raw, &mut ctx)
    }

    fn type_error(&self, expected: &str, found: &ParValue) -> SimError {
        SimError::Internal {
            reason: format!("parameter '{}': expected {expected}, found '{found}'", self.full_key),
        }
    }

    ///
    /// Reads the parameter as a boolean.
    ///
    /// # Errors
    ///
    /// See [`Par::value`]; additionally fails on non-boolean values.
    ///
    pub fn as_bool(&self) -> Result<bool, SimError> {
        match self.value()? {
            ParValue::Bool(v) => Ok(v),
            other => Err(self.type_error("a boolean", &other)),
        }
    }

    ///
    /// Reads the parameter as an integer.
    ///
    /// # Errors
    ///
    /// See [`Par::value`]; additionally fails on non-integer values.
    ///
    pub fn as_int(&self) -> Result<i64, SimError> {
        match self.value()? {
            ParValue::Int(v) => Ok(v),
            #[allow(clippy::cast_possible_truncation)]
            ParValue::Double(v, None) if v.fract() == 0.0 => Ok(v as i64),
            other => Err(self.type_error("an integer", &other)),
        }
    }

    ///
    /// Reads the parameter as a floating point number, ignoring any unit.
    ///
    /// # Errors
    ///
    /// See [`Par::value`]; additionally fails on non-numeric values.
    ///
    pub fn as_double(&self) -> Result<f64, SimError> {
        match self.value()? {
            #[allow(clippy::cast_precision_loss)]
            ParValue::Int(v) => Ok(v as f64),
            ParValue::Double(v, _) => Ok(v),
            other => Err(self.type_error("a number", &other)),
        }
    }

    ///
    /// Reads the parameter as a floating point number, converted
    /// into the given unit.
    ///
    /// # Errors
    ///
    /// See [`Par::value`]; additionally fails with [`SimError::UnitMismatch`]
    /// for conversions across dimensions.
    ///
    pub fn as_double_in(&self, target: Unit) -> Result<f64, SimError> {
        match self.value()? {
            #[allow(clippy::cast_precision_loss)]
            ParValue::Int(v) => Ok(v as f64),
            ParValue::Double(v, Some(u)) => convert_unit(v, u, target),
            ParValue::Double(v, None) => Ok(v),
            other => Err(self.type_error("a number", &other)),
        }
    }

    ///
    /// Reads the parameter as a time span. Unitless numbers are
    /// interpreted as seconds.
    ///
    /// # Errors
    ///
    /// See [`Par::as_double_in`].
    ///
    pub fn as_time(&self) -> Result<Duration, SimError> {
        let secs = self.as_double_in(unit("s"))?;
        Ok(Duration::from_secs_f64(secs))
    }

    ///
    /// Reads the parameter as a string. Non-string values are rendered
    /// through their display form.
    ///
    /// # Errors
    ///
    /// See [`Par::value`].
    ///
    pub fn as_str(&self) -> Result<String, SimError> {
        Ok(self.value()?.to_string())
    }

    /// Assigns a raw value to the parameter.
    pub fn set(&self, value: impl Display) {
        self.map.insert(&self.full_key, value.to_string());
    }

    /// Removes the parameters value.
    pub fn unset(&self) {
        self.map.remove(&self.full_key);
    }
}
