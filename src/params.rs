//! Named script parameters and their single-argument wire form.
//!
//! A [`ParameterSet`] travels to the interpreter as one positional argument:
//! `key=value` entries joined by `\n`. Values escape `\`, LF and CR so that
//! the only raw newlines in the blob are entry separators. The preamble in
//! [`crate::script::PARAM_PREAMBLE`] undoes exactly these escapes.

use std::collections::BTreeMap;

use crate::error::HvError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    entries: BTreeMap<String, String>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `(name, value)` pairs, rejecting invalid names.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self, HvError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (k, v) in pairs {
            set.insert(k, v)?;
        }
        Ok(set)
    }

    /// Insert or replace a parameter. The name must be usable as a
    /// PowerShell variable name, which also rules out `=`.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HvError> {
        let name = name.into();
        validate_name(&name)?;
        self.entries.insert(name, value.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize into the blob passed as the interpreter's trailing argument.
    /// An empty set yields an empty string.
    pub fn to_blob(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={}", escape_value(v)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Inverse of [`ParameterSet::to_blob`].
    pub fn from_blob(blob: &str) -> Result<Self, HvError> {
        let mut set = Self::new();
        for line in blob.split('\n').filter(|l| !l.is_empty()) {
            let (key, value) = line.split_once('=').ok_or_else(|| HvError::Validation {
                message: format!("parameter entry without '=': '{line}'"),
            })?;
            set.insert(key, unescape_value(value))?;
        }
        Ok(set)
    }
}

/// Variables the preamble and the remoting envelope assign themselves.
const INTERNAL_PREFIX: &str = "hvParam";
const INTERNAL_NAMES: &[&str] = &["hvCredential", "hvSecurePassword", "hvSession"];

/// PowerShell variables that are constant, read-only, or overwritten by the
/// runtime as soon as a script or pipeline runs.
const AUTOMATIC_NAMES: &[&str] = &[
    "_",
    "args",
    "ConsoleFileName",
    "Error",
    "Event",
    "EventArgs",
    "EventSubscriber",
    "ExecutionContext",
    "false",
    "foreach",
    "HOME",
    "Host",
    "input",
    "IsCoreCLR",
    "IsLinux",
    "IsMacOS",
    "IsWindows",
    "LASTEXITCODE",
    "Matches",
    "MyInvocation",
    "NestedPromptLevel",
    "null",
    "PID",
    "PSBoundParameters",
    "PSCmdlet",
    "PSCommandPath",
    "PSCulture",
    "PSDebugContext",
    "PSEdition",
    "PSHOME",
    "PSItem",
    "PSScriptRoot",
    "PSSenderInfo",
    "PSUICulture",
    "PSVersionTable",
    "PWD",
    "Sender",
    "ShellId",
    "StackTrace",
    "switch",
    "this",
    "true",
];

fn validate_name(name: &str) -> Result<(), HvError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(HvError::InvalidParameterName { name: name.into() });
    }
    // PowerShell variable names are case-insensitive.
    let internal = name
        .get(..INTERNAL_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(INTERNAL_PREFIX));
    if internal
        || INTERNAL_NAMES
            .iter()
            .chain(AUTOMATIC_NAMES)
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(HvError::ReservedParameterName { name: name.into() });
    }
    Ok(())
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
