// Management Object Names
// `domain:key=value[,key=value]*` identifiers for published resources

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The requested name could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The requested management name [{name}] was not valid: {reason}")]
pub struct MalformedObjectName {
    pub name: String,
    pub reason: String,
}

impl MalformedObjectName {
    fn new(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A validated object name: a domain plus an ordered list of key properties
#[derive(Debug, Clone)]
pub struct ObjectName {
    domain: String,
    properties: Vec<(String, String)>,
}

const KEY_ILLEGAL: &[char] = &[':', ',', '=', '*', '?', '"', '\n'];
const VALUE_ILLEGAL: &[char] = &[':', ',', '=', '*', '?', '"', '\n'];

impl ObjectName {
    pub fn parse(name: &str) -> Result<Self, MalformedObjectName> {
        let (domain, rest) = name
            .split_once(':')
            .ok_or_else(|| MalformedObjectName::new(name, "missing domain separator ':'"))?;

        if domain.contains(['*', '?']) {
            return Err(MalformedObjectName::new(name, "domain patterns are not allowed"));
        }
        if domain.contains('\n') {
            return Err(MalformedObjectName::new(name, "domain contains a newline"));
        }
        if rest.is_empty() {
            return Err(MalformedObjectName::new(name, "at least one key property is required"));
        }

        let mut properties: Vec<(String, String)> = Vec::new();
        for raw in split_properties(name, rest)? {
            let (key, value) = raw
                .split_once('=')
                .ok_or_else(|| MalformedObjectName::new(name, format!("key property without '=': {}", raw)))?;

            if key.is_empty() {
                return Err(MalformedObjectName::new(name, "empty key"));
            }
            if key.contains(KEY_ILLEGAL) {
                return Err(MalformedObjectName::new(name, format!("invalid character in key: {}", key)));
            }
            validate_value(name, value)?;

            if properties.iter().any(|(k, _)| k == key) {
                return Err(MalformedObjectName::new(name, format!("duplicate key: {}", key)));
            }
            properties.push((key.to_string(), value.to_string()));
        }

        Ok(Self {
            domain: domain.to_string(),
            properties,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Value of a key property, exactly as written (quoted values keep their quotes)
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// Copy of this name with one more key property appended
    pub fn with_property(&self, key: &str, value: &str) -> Result<Self, MalformedObjectName> {
        Self::parse(&format!("{},{}={}", self, key, value))
    }

    /// Domain followed by the key properties sorted by key
    pub fn canonical(&self) -> String {
        let mut sorted: Vec<&(String, String)> = self.properties.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let props: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}:{}", self.domain, props.join(","))
    }

    /// Quote a value so it can be used in a key property
    pub fn quote(value: &str) -> String {
        let mut quoted = String::with_capacity(value.len() + 2);
        quoted.push('"');
        for c in value.chars() {
            match c {
                '"' | '\\' | '*' | '?' => {
                    quoted.push('\\');
                    quoted.push(c);
                }
                '\n' => quoted.push_str("\\n"),
                _ => quoted.push(c),
            }
        }
        quoted.push('"');
        quoted
    }
}

/// Split the key property list on commas outside quoted values
fn split_properties<'a>(name: &str, rest: &'a str) -> Result<Vec<&'a str>, MalformedObjectName> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&rest[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(MalformedObjectName::new(name, "unterminated quoted value"));
    }
    parts.push(&rest[start..]);

    if parts.iter().any(|p| p.is_empty()) {
        return Err(MalformedObjectName::new(name, "empty key property"));
    }
    Ok(parts)
}

fn validate_value(name: &str, value: &str) -> Result<(), MalformedObjectName> {
    if value.is_empty() {
        return Err(MalformedObjectName::new(name, "empty value"));
    }
    if let Some(inner) = value.strip_prefix('"') {
        let inner = inner
            .strip_suffix('"')
            .ok_or_else(|| MalformedObjectName::new(name, format!("invalid quoted value: {}", value)))?;
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('"' | '\\' | 'n' | '*' | '?') => {}
                    _ => {
                        return Err(MalformedObjectName::new(
                            name,
                            format!("invalid escape in quoted value: {}", value),
                        ))
                    }
                },
                '"' | '*' | '?' | '\n' => {
                    return Err(MalformedObjectName::new(
                        name,
                        format!("unescaped character in quoted value: {}", value),
                    ))
                }
                _ => {}
            }
        }
        return Ok(());
    }

    if value.contains(VALUE_ILLEGAL) {
        return Err(MalformedObjectName::new(name, format!("invalid character in value: {}", value)));
    }
    Ok(())
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        for (idx, (k, v)) in self.properties.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

impl FromStr for ObjectName {
    type Err = MalformedObjectName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for ObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for ObjectName {}

impl std::hash::Hash for ObjectName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}
