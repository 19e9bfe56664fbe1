use std::fmt;
use std::time::Duration;

/// Value type of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    Bool,
    U64,
    Str,
    /// Unsigned number of milliseconds.
    Milliseconds,
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingType::Bool => "Bool",
            SettingType::U64 => "UInt64",
            SettingType::Str => "String",
            SettingType::Milliseconds => "Milliseconds",
        };
        f.write_str(name)
    }
}

/// Declaration of a single setting.
///
/// Generated by `#[derive(Settings)]`; the engine validates raw values
/// against these before building the typed settings struct.
#[derive(Debug, Clone)]
pub struct SettingDecl {
    pub name: String,
    pub setting_type: SettingType,
    pub required: bool,
    pub default: Option<SettingValue>,
    pub description: String,
}

/// Typed setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    U64(u64),
    Str(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::U64(v) => write!(f, "{v}"),
            SettingValue::Str(v) => write!(f, "'{v}'"),
        }
    }
}

/// Validated setting values, in the order they were set.
#[derive(Debug, Clone, Default)]
pub struct SettingValues {
    entries: Vec<(String, SettingValue)>,
}

impl SettingValues {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: SettingValue) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == &name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(SettingValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(SettingValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_duration(&self, name: &str) -> Option<Duration> {
        self.get_u64(name).map(Duration::from_millis)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(SettingValue::Str(v)) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_in_place() {
        let mut values = SettingValues::new();
        values.set("a", SettingValue::U64(1));
        values.set("b", SettingValue::Bool(true));
        values.set("a", SettingValue::U64(7));

        assert_eq!(values.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(values.get_u64("a"), Some(7));
        assert_eq!(values.get_duration("a"), Some(Duration::from_millis(7)));
        assert_eq!(values.get_bool("b"), Some(true));
    }

    #[test]
    fn typed_getters_do_not_coerce() {
        let mut values = SettingValues::new();
        values.set("s", SettingValue::Str("10".into()));
        assert_eq!(values.get_u64("s"), None);
        assert_eq!(values.get_str("s"), Some("10"));
        assert_eq!(values.get_bool("missing"), None);
    }
}
