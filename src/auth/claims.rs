//! Ordered name/value claims issued by the authorization server
//!
//! Claims are kept exactly as the user-info endpoint returned them, in
//! response order.  Nothing here interprets a claim's meaning; the
//! [`identity`](super::identity) module is the one place that does.

use serde::{Deserialize, Serialize};

/// A single name/value assertion about the authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type, e.g. `sub` or `email`.
    pub name: String,
    /// Raw claim value.
    pub value: String,
}

impl Claim {
    /// Creates a claim from anything string-like.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered sequence of [`Claim`]s.
///
/// Duplicate names are allowed (multi-valued claims such as `role`).
///
/// # Examples
///
/// ```
/// use oidc_session::auth::claims::Claims;
///
/// let claims = Claims::from_pairs([("sub", "user-42"), ("role", "admin"), ("role", "user")]);
/// assert_eq!(claims.find_first("sub"), Some("user-42"));
/// assert_eq!(claims.find_all("role").collect::<Vec<_>>(), vec!["admin", "user"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Vec<Claim>);

impl Claims {
    /// Creates an empty claim sequence.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds claims from `(name, value)` pairs, preserving order.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(name, value)| Claim::new(name, value))
                .collect(),
        )
    }

    /// Flattens a user-info JSON object into claims.
    ///
    /// Strings are taken verbatim, numbers and booleans are stringified,
    /// arrays produce one claim per element, nested objects are kept as
    /// compact JSON and `null` members are skipped.  Member order is
    /// preserved (`serde_json` is built with `preserve_order`).
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut claims = Vec::with_capacity(object.len());
        for (name, value) in object {
            match value {
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Some(v) = scalar_value(item) {
                            claims.push(Claim::new(name.as_str(), v));
                        }
                    }
                }
                other => {
                    if let Some(v) = scalar_value(other) {
                        claims.push(Claim::new(name.as_str(), v));
                    }
                }
            }
        }
        Self(claims)
    }

    /// Appends a claim.
    pub fn push(&mut self, claim: Claim) {
        self.0.push(claim);
    }

    /// Value of the first claim named `name`.
    pub fn find_first(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Values of every claim named `name`, in order.
    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Iterates over all claims in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Claim> {
        self.0.iter()
    }

    /// Number of claims.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no claims.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Claims {
    type Item = &'a Claim;
    type IntoIter = std::slice::Iter<'a, Claim>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Claim> for Claims {
    fn from_iter<T: IntoIterator<Item = Claim>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn scalar_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}
