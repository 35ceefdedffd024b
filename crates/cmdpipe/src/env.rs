//! Environment variable deltas

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::format::escape_string;

/// One environment change applied before the process is spawned
///
/// A `None` value removes the variable from the child's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    /// Hide the value in diagnostics
    #[serde(default)]
    pub confidential: bool,
}

impl EnvVar {
    /// Set `name` to `value`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            confidential: false,
        }
    }

    /// Remove `name`
    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            confidential: false,
        }
    }

    /// Mark the value as confidential
    pub fn confidential(mut self) -> Self {
        self.confidential = true;
        self
    }
}

impl<K, V> From<(K, Option<V>)> for EnvVar
where
    K: Into<String>,
    V: Into<String>,
{
    fn from((name, value): (K, Option<V>)) -> Self {
        Self {
            name: name.into(),
            value: value.map(Into::into),
            confidential: false,
        }
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = escape_string(&self.name, true);
        match &self.value {
            None => write!(f, "{name} (cleared)"),
            Some(_) if self.confidential => write!(f, "{name} ***"),
            Some(value) => write!(f, "{name}=\"{}\"", escape_string(value, false)),
        }
    }
}

/// Apply deltas in order to a base environment
///
/// Later entries win over earlier ones for the same name; a removal deletes
/// whatever value the name had at that point.
pub fn overlay<I>(base: I, deltas: &[EnvVar]) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = base.into_iter().collect();
    for var in deltas {
        match &var.value {
            Some(value) => {
                env.insert(var.name.clone(), value.clone());
            }
            None => {
                env.remove(&var.name);
            }
        }
    }
    env
}

/// Apply deltas to a command builder, in order
pub(crate) fn apply(cmd: &mut tokio::process::Command, deltas: &[EnvVar]) {
    for var in deltas {
        match &var.value {
            Some(value) => {
                tracing::trace!(name = %var.name, "Setting environment variable");
                cmd.env(&var.name, value);
            }
            None => {
                tracing::trace!(name = %var.name, "Removing environment variable");
                cmd.env_remove(&var.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(EnvVar::new("PATH", "/bin").to_string(), "PATH=\"/bin\"");
        assert_eq!(EnvVar::remove("HOME").to_string(), "HOME (cleared)");
        assert_eq!(
            EnvVar::new("TOKEN", "abc").confidential().to_string(),
            "TOKEN ***"
        );
        assert_eq!(
            EnvVar::new("MSG", "say \"hi\"\n").to_string(),
            "MSG=\"say \\\"hi\\\"\\n\""
        );
    }

    #[test]
    fn test_from_pair() {
        let set: EnvVar = ("A", Some("1")).into();
        let removed: EnvVar = ("A", None::<String>).into();
        assert_eq!(set, EnvVar::new("A", "1"));
        assert_eq!(removed, EnvVar::remove("A"));
    }

    #[test]
    fn test_overlay_order() {
        let base = vec![
            ("A".to_string(), "base".to_string()),
            ("B".to_string(), "keep".to_string()),
        ];
        let env = overlay(
            base,
            &[EnvVar::new("A", "1"), EnvVar::remove("A"), EnvVar::new("C", "3")],
        );
        assert!(!env.contains_key("A"));
        assert_eq!(env.get("B").map(String::as_str), Some("keep"));
        assert_eq!(env.get("C").map(String::as_str), Some("3"));

        let env = overlay(Vec::new(), &[EnvVar::remove("A"), EnvVar::new("A", "2")]);
        assert_eq!(env.get("A").map(String::as_str), Some("2"));
    }
}
