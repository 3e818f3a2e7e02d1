// Language resolution
// Maps user-facing language names onto judge execution environments

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Strongly-typed language enum
/// The fixed set of languages the platform accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    #[serde(alias = "c++")]
    Cpp,
    Java,
    #[serde(alias = "js")]
    JavaScript,
    #[serde(alias = "py", alias = "python3")]
    Python,
    Rust,
    Go,
}

impl Language {
    /// Returns all language variants
    /// Single source of truth for the supported set
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::C,
            Language::Cpp,
            Language::Java,
            Language::JavaScript,
            Language::Python,
            Language::Rust,
            Language::Go,
        ]
    }

    /// Parse a language name (case-insensitive, common aliases accepted)
    pub fn from_name(name: &str) -> Option<Language> {
        match name.trim().to_lowercase().as_str() {
            "c" => Some(Language::C),
            "c++" | "cpp" | "cplusplus" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            "python" | "python3" | "py" => Some(Language::Python),
            "rust" | "rs" => Some(Language::Rust),
            "go" | "golang" => Some(Language::Go),
            _ => None,
        }
    }

    /// Judge0 CE environment id used when no override is configured
    pub fn default_environment_id(self) -> EnvironmentId {
        EnvironmentId(match self {
            Language::C => 50,
            Language::Cpp => 54,
            Language::Java => 62,
            Language::JavaScript => 63,
            Language::Python => 71,
            Language::Rust => 73,
            Language::Go => 60,
        })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
        };
        f.write_str(name)
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_name(s).ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

/// Judge-side identifier of an execution environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(pub u32);

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse languages file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown language '{0}' in languages file")]
    UnknownLanguage(String),

    #[error("no languages enabled in languages file")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LanguageEntry {
    name: String,
    #[serde(default)]
    environment_id: Option<u32>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageEntry>,
}

/// Registry of enabled languages and their judge environments
/// This is the authoritative source for which languages a deployment accepts
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    environments: HashMap<Language, EnvironmentId>,
}

impl LanguageRegistry {
    /// Every supported language with its default environment id
    pub fn builtin() -> Self {
        let environments = Language::all_variants()
            .iter()
            .map(|lang| (*lang, lang.default_environment_id()))
            .collect();
        Self { environments }
    }

    /// Load language configuration from a languages.json file
    ///
    /// Entries may override the environment id or disable a language.
    /// Languages missing from the file are not enabled.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, RegistryError> {
        let file: LanguagesFile = serde_json::from_str(content)?;

        let mut environments = HashMap::new();
        for entry in &file.languages {
            let language = Language::from_name(&entry.name)
                .ok_or_else(|| RegistryError::UnknownLanguage(entry.name.clone()))?;
            if !entry.enabled {
                continue;
            }
            let env = entry
                .environment_id
                .map(EnvironmentId)
                .unwrap_or_else(|| language.default_environment_id());
            environments.insert(language, env);
        }

        if environments.is_empty() {
            return Err(RegistryError::Empty);
        }

        Ok(Self { environments })
    }

    /// Resolve a user-supplied name to its language and environment
    pub fn resolve(&self, name: &str) -> Result<(Language, EnvironmentId), UnsupportedLanguage> {
        let language = Language::from_name(name)
            .ok_or_else(|| UnsupportedLanguage(name.to_string()))?;
        let env = self
            .environment_for(language)
            .ok_or_else(|| UnsupportedLanguage(name.to_string()))?;
        Ok((language, env))
    }

    pub fn environment_for(&self, language: Language) -> Option<EnvironmentId> {
        self.environments.get(&language).copied()
    }

    pub fn is_enabled(&self, language: Language) -> bool {
        self.environments.contains_key(&language)
    }

    /// Enabled languages in declaration order
    pub fn enabled_languages(&self) -> Vec<Language> {
        Language::all_variants()
            .iter()
            .copied()
            .filter(|lang| self.is_enabled(*lang))
            .collect()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = LanguageRegistry::builtin();

        assert_eq!(registry.resolve("C++"), registry.resolve("c++"));
        assert_eq!(registry.resolve("PYTHON"), registry.resolve("python"));
        assert_eq!(
            registry.resolve("Java").unwrap(),
            (Language::Java, EnvironmentId(62))
        );
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Language::from_name("cpp"), Some(Language::Cpp));
        assert_eq!(Language::from_name(" JS "), Some(Language::JavaScript));
        assert_eq!(Language::from_name("python3"), Some(Language::Python));
        assert_eq!(Language::from_name("golang"), Some(Language::Go));
    }

    #[test]
    fn test_unknown_language() {
        let registry = LanguageRegistry::builtin();

        assert_eq!(
            registry.resolve("cobol"),
            Err(UnsupportedLanguage("cobol".to_string()))
        );
        assert!(registry.resolve("").is_err());
        assert!("brainfuck".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_serialization() {
        let json = serde_json::to_string(&Language::Cpp).unwrap();
        assert_eq!(json, "\"cpp\"");

        let parsed: Language = serde_json::from_str("\"c++\"").unwrap();
        assert_eq!(parsed, Language::Cpp);
        assert_eq!(Language::JavaScript.to_string(), "javascript");
    }

    #[test]
    fn test_registry_overrides_and_disables() {
        let registry = LanguageRegistry::from_json(
            r#"{"languages": [
                {"name": "python", "environment_id": 92},
                {"name": "cpp"},
                {"name": "java", "enabled": false}
            ]}"#,
        )
        .unwrap();

        assert_eq!(
            registry.resolve("Python").unwrap(),
            (Language::Python, EnvironmentId(92))
        );
        assert_eq!(registry.environment_for(Language::Cpp), Some(EnvironmentId(54)));
        assert!(registry.resolve("java").is_err());
        assert!(registry.resolve("rust").is_err());
        assert_eq!(
            registry.enabled_languages(),
            vec![Language::Cpp, Language::Python]
        );
    }

    #[test]
    fn test_registry_rejects_unknown_and_empty() {
        let err = LanguageRegistry::from_json(r#"{"languages": [{"name": "cobol"}]}"#).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownLanguage(name) if name == "cobol"));

        let err = LanguageRegistry::from_json(r#"{"languages": []}"#).unwrap_err();
        assert!(matches!(err, RegistryError::Empty));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"languages": [{{"name": "rust", "environment_id": 73}}]}}"#).unwrap();

        let registry = LanguageRegistry::load_from_file(file.path()).unwrap();
        assert_eq!(registry.enabled_languages(), vec![Language::Rust]);

        let missing = LanguageRegistry::load_from_file("/nonexistent/languages.json");
        assert!(matches!(missing, Err(RegistryError::Read { .. })));
    }
}
