//! Attribute maps ("ads") describing one job in the remote queue.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::expr::{Expr, Value};

/// A job's attributes: name → literal or expression.
///
/// Attribute names are matched case-insensitively, like the queue does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassAd {
    attrs: BTreeMap<String, Expr>,
}

impl ClassAd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.insert(name, value);
        self
    }

    /// Set an attribute, replacing any existing one with the same (case-insensitive) name.
    pub fn insert(&mut self, name: impl Into<String>, value: Expr) {
        let name = name.into();
        if let Some(existing) = self.key_of(&name) {
            self.attrs.remove(&existing);
        }
        self.attrs.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Expr> {
        let key = self.key_of(name)?;
        self.attrs.remove(&key)
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.attrs.get(name).or_else(|| {
            self.attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Evaluate one attribute in the context of this ad.
    pub fn evaluate(&self, name: &str, now: i64) -> Value {
        Expr::attr(name).eval(self, now)
    }

    /// Literal integer value, if the attribute holds one.
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Expr::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Literal string value, if the attribute holds one.
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Expr::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Keep only the named attributes (an empty list keeps everything).
    pub fn project(&self, names: &[&str]) -> ClassAd {
        if names.is_empty() {
            return self.clone();
        }
        let mut out = ClassAd::new();
        for name in names {
            if let Some(value) = self.get(name) {
                out.insert(*name, value.clone());
            }
        }
        out
    }

    /// Convert one job object of the queue's JSON listing format.
    ///
    /// Unevaluated expressions arrive as strings wrapped in `/Expr(...)/` and are
    /// kept as [`Expr::Raw`].
    pub fn from_json(object: &serde_json::Map<String, JsonValue>) -> ClassAd {
        let mut ad = ClassAd::new();
        for (name, value) in object {
            ad.insert(name.clone(), json_to_expr(value));
        }
        ad
    }

    fn key_of(&self, name: &str) -> Option<String> {
        self.attrs
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }
}

fn json_to_expr(value: &JsonValue) -> Expr {
    match value {
        JsonValue::Null => Expr::Undefined,
        JsonValue::Bool(b) => Expr::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Expr::Int(i),
            None => Expr::Raw(n.to_string()),
        },
        JsonValue::String(s) => match s
            .strip_prefix("/Expr(")
            .and_then(|rest| rest.strip_suffix(")/"))
        {
            Some(inner) => Expr::Raw(inner.to_string()),
            None => Expr::Str(s.clone()),
        },
        other => Expr::Raw(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let mut ad = ClassAd::new().with("JobStatus", Expr::Int(1));
        assert_eq!(ad.int("jobstatus"), Some(1));

        ad.insert("JOBSTATUS", Expr::Int(4));
        assert_eq!(ad.len(), 1);
        assert_eq!(ad.int("JobStatus"), Some(4));

        assert_eq!(ad.remove("jobStatus"), Some(Expr::Int(4)));
        assert!(ad.is_empty());
    }

    #[test]
    fn projection_keeps_requested_attributes() {
        let ad = ClassAd::new()
            .with("ClusterId", Expr::Int(1))
            .with("ProcId", Expr::Int(0))
            .with("Cmd", Expr::str("/bin/true"));
        let projected = ad.project(&["ClusterId", "ProcId", "Missing"]);
        assert_eq!(projected.len(), 2);
        assert!(!projected.contains("Cmd"));
        assert_eq!(ad.project(&[]), ad);
    }

    #[test]
    fn parses_queue_json() {
        let json = serde_json::json!({
            "ClusterId": 12,
            "ProcId": 0,
            "Iwd": "/home/a",
            "LeaveJobInQueue": "/Expr(( time() - EnteredCurrentStatus ) < 7200)/",
            "SUBMIT_UserLog": null,
            "Rank": 0.5,
            "OnExitHold": false
        });
        let ad = ClassAd::from_json(json.as_object().unwrap());
        assert_eq!(ad.int("ClusterId"), Some(12));
        assert_eq!(ad.string("Iwd"), Some("/home/a"));
        assert_eq!(
            ad.get("LeaveJobInQueue"),
            Some(&Expr::Raw("( time() - EnteredCurrentStatus ) < 7200".to_string()))
        );
        assert_eq!(ad.get("SUBMIT_UserLog"), Some(&Expr::Undefined));
        assert_eq!(ad.get("Rank"), Some(&Expr::Raw("0.5".to_string())));
        assert_eq!(ad.get("OnExitHold"), Some(&Expr::Bool(false)));
    }
}
