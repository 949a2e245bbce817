//! Decoding provider payloads into identity claims.
//!
//! Providers disagree on claim names and shapes (groups as an array or a
//! single string, `email_verified` as a bool or `"true"`). The configured
//! [`ClaimMapping`] projects the payload onto canonical keys, which are then
//! decoded into a concrete struct.

use crate::config::ClaimMapping;
use crate::error::ProviderError;
use fern_gate_access::IdentityClaims;
use rootcause::Report;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Claims read from a userinfo or ID token payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl ProviderClaims {
    /// Projects `payload` through `mapping` and decodes it.
    ///
    /// Values of the roles claim are appended to the groups.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` if the payload is not an object or a mapped
    /// claim has the wrong type.
    pub fn from_json(payload: &Value, mapping: &ClaimMapping) -> Result<Self, Report<ProviderError>> {
        let Value::Object(source) = payload else {
            return Err(ProviderError::InvalidResponse {
                details: "claims payload is not an object".to_string(),
            }
            .into());
        };

        let mut projected = Map::new();
        for (canonical, key) in [
            ("sub", &mapping.subject),
            ("email", &mapping.email),
            ("name", &mapping.name),
            ("picture", &mapping.picture),
        ] {
            if let Some(value) = source.get(key).filter(|v| !v.is_null()) {
                projected.insert(canonical.to_string(), value.clone());
            }
        }
        if let Some(verified) = source.get(&mapping.email_verified) {
            projected.insert("email_verified".to_string(), Value::Bool(truthy(verified)));
        }

        let mut groups = string_list(source.get(&mapping.groups));
        if mapping.roles != mapping.groups {
            groups.extend(string_list(source.get(&mapping.roles)));
        }
        projected.insert(
            "groups".to_string(),
            Value::Array(groups.into_iter().map(Value::String).collect()),
        );

        serde_json::from_value(Value::Object(projected)).map_err(|e| {
            ProviderError::InvalidResponse {
                details: format!("unexpected claim type: {e}"),
            }
            .into()
        })
    }

    /// True when the claims identify a person: both subject and email are present.
    #[must_use]
    pub fn has_profile(&self) -> bool {
        self.sub.as_deref().is_some_and(|s| !s.is_empty())
            && self.email.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Converts into the claims understood by the identity resolver.
    #[must_use]
    pub fn into_identity(self) -> IdentityClaims {
        IdentityClaims {
            subject: self.sub.unwrap_or_default(),
            email: self.email,
            name: self.name,
            picture: self.picture,
            email_verified: self.email_verified,
            groups: self.groups,
        }
    }
}

/// Reads a claim that may be an array of strings or a single string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
