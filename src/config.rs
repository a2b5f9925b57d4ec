//! Server configuration.
//!
//! A flat map of lowercased parameter names to string values, validated
//! against a schema on CONFIG SET. CONFIG GET matches names with a glob
//! pattern, same as the keyspace commands match keys.

use std::collections::HashMap;

use globset::Glob;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Unknown option or number of arguments for CONFIG SET - '{0}'")]
    UnknownParameter(String),
    #[error("Invalid argument '{value}' for CONFIG SET '{parameter}'")]
    InvalidValue { parameter: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParameterKind {
    Integer,
    Memory,
    YesNo,
    Text,
    /// Settable only from the command line; CONFIG SET rejects it.
    Fixed,
}

/// The recognized parameters and their validation kind and default.
const SCHEMA: &[(&str, ParameterKind, &str)] = &[
    ("appendonly", ParameterKind::YesNo, "no"),
    ("bind", ParameterKind::Fixed, "127.0.0.1"),
    ("databases", ParameterKind::Fixed, "16"),
    ("maxmemory", ParameterKind::Memory, "0"),
    ("maxmemory-policy", ParameterKind::Text, "noeviction"),
    ("notify-keyspace-events", ParameterKind::Text, ""),
    ("port", ParameterKind::Fixed, "6379"),
    ("proto-max-bulk-len", ParameterKind::Memory, "536870912"),
    ("requirepass", ParameterKind::Text, ""),
    ("save", ParameterKind::Text, "3600 1 300 100 60 10000"),
    ("tcp-keepalive", ParameterKind::Integer, "300"),
    ("timeout", ParameterKind::Integer, "0"),
];

#[derive(Debug, Clone)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            values: SCHEMA
                .iter()
                .map(|(name, _, default)| (name.to_string(), default.to_string()))
                .collect(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn get(&self, parameter: &str) -> Option<&str> {
        self.values.get(&parameter.to_lowercase()).map(String::as_str)
    }

    pub fn get_int(&self, parameter: &str) -> i64 {
        self.get(parameter)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Parameters matching the glob pattern, sorted by name for stable
    /// CONFIG GET output.
    pub fn get_matching(&self, pattern: &str) -> Vec<(String, String)> {
        let Ok(glob) = Glob::new(&pattern.to_lowercase()) else {
            return Vec::new();
        };
        let matcher = glob.compile_matcher();

        let mut matched: Vec<(String, String)> = self
            .values
            .iter()
            .filter(|(name, _)| matcher.is_match(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        matched.sort();
        matched
    }

    pub fn set(&mut self, parameter: &str, value: &str) -> Result<(), ConfigError> {
        let name = parameter.to_lowercase();

        let Some((_, kind, _)) = SCHEMA.iter().find(|(schema_name, _, _)| *schema_name == name)
        else {
            return Err(ConfigError::UnknownParameter(name));
        };

        let valid = match kind {
            ParameterKind::Integer => value.parse::<i64>().is_ok(),
            ParameterKind::Memory => parse_memory(value).is_some(),
            ParameterKind::YesNo => matches!(value.to_lowercase().as_str(), "yes" | "no"),
            ParameterKind::Text => true,
            ParameterKind::Fixed => false,
        };

        if !valid {
            return Err(ConfigError::InvalidValue {
                parameter: name,
                value: value.to_string(),
            });
        }

        self.values.insert(name, value.to_string());
        Ok(())
    }

    /// Startup-time override that bypasses the Fixed restriction (CLI flags
    /// land here).
    pub fn set_startup(&mut self, parameter: &str, value: &str) {
        self.values
            .insert(parameter.to_lowercase(), value.to_string());
    }

    /// The `notify-keyspace-events` flag string, parsed. `None` when
    /// notifications are disabled entirely.
    pub fn notification_flags(&self) -> Option<NotificationFlags> {
        let raw = self.get("notify-keyspace-events")?;
        if raw.is_empty() {
            return None;
        }

        let mut flags = NotificationFlags::default();
        for flag in raw.chars() {
            match flag {
                'K' => flags.keyspace = true,
                'E' => flags.keyevent = true,
                'A' => flags.classes.extend("g$lshzxet".chars()),
                other => flags.classes.push(other),
            }
        }

        if !flags.keyspace && !flags.keyevent {
            return None;
        }
        Some(flags)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationFlags {
    pub keyspace: bool,
    pub keyevent: bool,
    pub classes: Vec<char>,
}

impl NotificationFlags {
    pub fn covers(&self, class: char) -> bool {
        self.classes.contains(&class)
    }
}

/// `100mb` / `1gb` style sizes; bare numbers are bytes.
fn parse_memory(value: &str) -> Option<i64> {
    let lowered = value.to_lowercase();

    let (digits, multiplier) = if let Some(prefix) = lowered.strip_suffix("kb") {
        (prefix, 1024)
    } else if let Some(prefix) = lowered.strip_suffix("mb") {
        (prefix, 1024 * 1024)
    } else if let Some(prefix) = lowered.strip_suffix("gb") {
        (prefix, 1024 * 1024 * 1024)
    } else if let Some(prefix) = lowered.strip_suffix('b') {
        (prefix, 1)
    } else {
        (lowered.as_str(), 1)
    };

    digits
        .trim()
        .parse::<i64>()
        .ok()
        .map(|amount| amount * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_present() {
        let config = Config::new();
        assert_eq!(config.get("maxmemory"), Some("0"));
        assert_eq!(config.get("databases"), Some("16"));
        assert_eq!(config.get_int("tcp-keepalive"), 300);
    }

    #[test]
    fn test_set_validates_by_kind() {
        let mut config = Config::new();

        assert!(config.set("timeout", "30").is_ok());
        assert!(config.set("TIMEOUT", "30").is_ok());
        assert!(config.set("maxmemory", "100mb").is_ok());
        assert!(config.set("appendonly", "yes").is_ok());

        assert_eq!(
            config.set("timeout", "abc"),
            Err(ConfigError::InvalidValue {
                parameter: "timeout".to_string(),
                value: "abc".to_string(),
            })
        );
        assert_eq!(
            config.set("no-such-option", "1"),
            Err(ConfigError::UnknownParameter("no-such-option".to_string()))
        );
        // Startup-only parameters reject runtime changes.
        assert!(config.set("databases", "32").is_err());
    }

    #[test]
    fn test_get_matching_glob() {
        let config = Config::new();

        let all = config.get_matching("*");
        assert_eq!(all.len(), SCHEMA.len());

        let max = config.get_matching("maxmemory*");
        let names: Vec<_> = max.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["maxmemory", "maxmemory-policy"]);
    }

    #[test]
    fn test_notification_flags() {
        let mut config = Config::new();
        assert_eq!(config.notification_flags(), None);

        config.set("notify-keyspace-events", "KEA").unwrap();
        let flags = config.notification_flags().unwrap();
        assert!(flags.keyspace);
        assert!(flags.keyevent);
        assert!(flags.covers('g'));
        assert!(flags.covers('t'));

        // Classes without K or E produce no notifications at all.
        config.set("notify-keyspace-events", "g$").unwrap();
        assert_eq!(config.notification_flags(), None);
    }

    #[test]
    fn test_parse_memory() {
        let test_cases = vec![
            ("0", Some(0)),
            ("1024", Some(1024)),
            ("1kb", Some(1024)),
            ("100mb", Some(100 * 1024 * 1024)),
            ("2gb", Some(2 * 1024 * 1024 * 1024)),
            ("12x", None),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_memory(input), expected, "parsing {:?}", input);
        }
    }
}
