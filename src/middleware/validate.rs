//! Declarative JSON body validation.
//!
//! ```rust
//! use strata::middleware::validate::{Kind, Validate};
//!
//! let rules = Validate::json()
//!     .require("name", Kind::String)
//!     .optional("age", Kind::Number);
//! ```
//!
//! Every rule is checked, so the caller learns about all bad fields at once.
//! Failures come back as [`Error::Validation`] and the handler never runs.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{Error, FieldError};

use super::{Middleware, Next};

/// Expected JSON type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl Kind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any value",
        }
    }
}

struct Rule {
    field: String,
    kind: Kind,
    required: bool,
}

/// Validates that the body is a JSON object with the declared fields.
pub struct Validate {
    rules: Vec<Rule>,
}

impl Validate {
    pub fn json() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn require(mut self, field: impl Into<String>, kind: Kind) -> Self {
        self.rules.push(Rule { field: field.into(), kind, required: true });
        self
    }

    /// Checked only when present. `null` counts as absent.
    pub fn optional(mut self, field: impl Into<String>, kind: Kind) -> Self {
        self.rules.push(Rule { field: field.into(), kind, required: false });
        self
    }

    /// All field errors for `body`, empty when it passes.
    pub fn check(&self, body: &[u8]) -> Vec<FieldError> {
        let object: Map<String, Value> = match serde_json::from_slice(body) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return vec![FieldError::new("body", "expected a JSON object")],
            Err(e) => return vec![FieldError::new("body", format!("invalid JSON: {e}"))],
        };

        self.rules.iter()
            .filter_map(|rule| match object.get(&rule.field) {
                None | Some(Value::Null) if rule.required => {
                    Some(FieldError::new(&rule.field, "is required"))
                }
                None | Some(Value::Null) => None,
                Some(value) if !rule.kind.accepts(value) => {
                    Some(FieldError::new(&rule.field, format!("expected {}", rule.kind.name())))
                }
                Some(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Middleware for Validate {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        let errors = self.check(ctx.body());
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        next.run(ctx).await
    }
}
