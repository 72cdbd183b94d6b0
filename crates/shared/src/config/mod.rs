// Configuration module
// Reads INI-style configuration files with environment variable overrides

use std::collections::HashMap;

use configparser::ini::Ini;

/// Configuration file reader.
/// Keys are looked up regardless of the section they appear in; an
/// environment variable `<prefix><key with '.' replaced by '_'>` wins over
/// the file value.
pub struct Config {
    values: HashMap<String, String>,
    filename: String,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Config {
            values: HashMap::new(),
            filename: String::new(),
            env_prefix: String::new(),
        }
    }

    /// Builds a config from in-memory INI text.
    pub fn from_content(content: &str, env_prefix: &str) -> Self {
        let mut config = Self::new();
        config.env_prefix = env_prefix.to_string();
        let mut ini = Ini::new_cs();
        match ini.read(content.to_string()) {
            Ok(sections) => config.store(sections),
            Err(e) => tracing::error!("Could not parse configuration: {}", e),
        }
        config
    }

    /// Load configuration from a file
    /// env_prefix is used to check environment variables (e.g., "Vmap_")
    pub fn set_source(&mut self, filename: &str, env_prefix: &str) -> bool {
        self.filename = filename.to_string();
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Reload the configuration file
    pub fn reload(&mut self) -> bool {
        self.values.clear();

        let mut ini = Ini::new_cs();
        match ini.load(&self.filename) {
            Ok(sections) => {
                self.store(sections);
                true
            }
            Err(e) => {
                tracing::debug!("Could not load configuration '{}': {}", self.filename, e);
                false
            }
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    fn store(&mut self, sections: HashMap<String, HashMap<String, Option<String>>>) {
        for (_, section) in sections {
            for (key, value) in section {
                let Some(value) = value else {
                    continue;
                };
                self.values.insert(key, strip_quotes(&value).to_string());
            }
        }
    }

    /// Check if a key is set
    pub fn is_set(&self, key: &str) -> bool {
        self.get_env_or_config(key).is_some()
    }

    /// Get a string value with a default
    pub fn get_string_default(&self, key: &str, default: &str) -> String {
        self.get_env_or_config(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a string value (empty string default)
    pub fn get_string(&self, key: &str) -> String {
        self.get_string_default(key, "")
    }

    /// Get a boolean value with a default
    pub fn get_bool_default(&self, key: &str, default: bool) -> bool {
        match self.get_env_or_config(key) {
            Some(val) => {
                let lower = val.to_lowercase();
                matches!(lower.as_str(), "1" | "true" | "yes")
            }
            None => default,
        }
    }

    /// Get an integer value with a default
    pub fn get_int_default(&self, key: &str, default: i32) -> i32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Get a float value with a default
    pub fn get_float_default(&self, key: &str, default: f32) -> f32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        self.values.get(key).cloned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.get_int_default("nonexistent", 42), 42);
        assert_eq!(config.get_string_default("nonexistent", "hello"), "hello");
        assert!(config.get_bool_default("nonexistent", true));
    }

    #[test]
    fn test_sections_and_quotes() {
        let content = "\
# comment
TopLevel = 3

[VmapConf]
DataDir = \"/opt/data\"
vmap.enableLOS = 0
; another comment
vmap.ratio = 1.5
";
        let config = Config::from_content(content, "");
        assert_eq!(config.get_int_default("TopLevel", 0), 3);
        assert_eq!(config.get_string("DataDir"), "/opt/data");
        assert!(!config.get_bool_default("vmap.enableLOS", true));
        assert_eq!(config.get_float_default("vmap.ratio", 0.0), 1.5);
        assert!(config.is_set("vmap.enableLOS"));
        assert!(!config.is_set("vmap.enableHeight"));
        // keys keep their case
        assert!(!config.is_set("datadir"));
    }

    #[test]
    fn test_env_override() {
        let config = Config::from_content("Some.Key = file\n", "SharedConfigTest_");
        // SAFETY: no other test reads this variable
        unsafe { std::env::set_var("SharedConfigTest_Some_Key", "env") };
        assert_eq!(config.get_string("Some.Key"), "env");
        unsafe { std::env::remove_var("SharedConfigTest_Some_Key") };
        assert_eq!(config.get_string("Some.Key"), "file");
    }

    #[test]
    fn test_missing_file() {
        let mut config = Config::new();
        assert!(!config.set_source("/nonexistent/dir/vmap.conf", ""));
        assert!(!config.is_set("DataDir"));
    }
}
