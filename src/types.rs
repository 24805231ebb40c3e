//! Core record and identity types for the fieldgate system
//!
//! All wire-facing types use camelCase JSON serialization; sensitivity
//! classes use SCREAMING_SNAKE_CASE tags (`PII_SSN`, `PII_ACCOUNT`, ...).

use serde::{Deserialize, Serialize};

/// A structured message payload: an ordered mapping from field name to a
/// scalar value or nested record.
///
/// Built on `serde_json::Map` with the `preserve_order` feature, so field
/// order survives a protect/unprotect round trip. Arrays are treated as
/// opaque scalars: they can be sealed whole by a name pattern but are never
/// descended into.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Sensitivity class assigned to a field by the classifier
///
/// Every class except `None` must have a protection rule in the active
/// policy snapshot. `None` fields pass through the codec unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityClass {
    /// Not sensitive, passes through in clear
    #[default]
    None,
    /// Social security numbers
    PiiSsn,
    /// Bank account numbers
    PiiAccount,
    /// Payment card numbers
    PiiCard,
    /// Email addresses
    PiiEmail,
    /// Phone numbers
    PiiPhone,
    /// API keys, tokens, passwords
    Credential,
}

impl SensitivityClass {
    /// The wire tag for this class (e.g., "PII_SSN")
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityClass::None => "NONE",
            SensitivityClass::PiiSsn => "PII_SSN",
            SensitivityClass::PiiAccount => "PII_ACCOUNT",
            SensitivityClass::PiiCard => "PII_CARD",
            SensitivityClass::PiiEmail => "PII_EMAIL",
            SensitivityClass::PiiPhone => "PII_PHONE",
            SensitivityClass::Credential => "CREDENTIAL",
        }
    }

    /// Whether fields of this class require protection
    pub fn is_sensitive(&self) -> bool {
        !matches!(self, SensitivityClass::None)
    }
}

impl std::fmt::Display for SensitivityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the party invoking protect or unprotect
///
/// On receive, the transport supplies the consumer's identity; on send,
/// the pipeline's configured local identity is used for audit events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    /// Caller identifier (service name, principal id)
    pub id: String,

    /// Roles held by the caller, checked against rule role sets
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CallerIdentity {
    /// Create a new caller identity
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether the caller holds a role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check whether the caller holds any of the given roles
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// Join a field name onto a dotted path prefix
pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}
