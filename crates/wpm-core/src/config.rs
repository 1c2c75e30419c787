use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_INSTALLED_LISTING_TTL: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default)]
    pub requires_auth: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Never try the native catalog API, always parse CLI output.
    pub force_cli_engine: bool,
    pub executable: Option<PathBuf>,
    pub proxy: Option<ProxyConfig>,
    /// Set when the host process runs elevated; enables the temp directory
    /// redirect for spawned CLI processes.
    pub elevated: bool,
    pub locale: Option<String>,
    pub installed_listing_ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            force_cli_engine: false,
            executable: None,
            proxy: None,
            elevated: false,
            locale: None,
            installed_listing_ttl: DEFAULT_INSTALLED_LISTING_TTL,
        }
    }
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Applies `WPM_*` overrides read through `lookup` on top of `self`.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("WPM_FORCE_CLI") {
            self.force_cli_engine = is_truthy(&value);
        }
        if let Some(path) = lookup("WPM_WINGET_PATH").filter(|path| !path.trim().is_empty()) {
            self.executable = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("WPM_PROXY").filter(|url| !url.trim().is_empty()) {
            self.proxy = Some(ProxyConfig {
                url: url.trim().to_string(),
                requires_auth: lookup("WPM_PROXY_AUTH").is_some_and(|value| is_truthy(&value)),
            });
        }
        if let Some(value) = lookup("WPM_ELEVATED") {
            self.elevated = is_truthy(&value);
        }
        if let Some(locale) = lookup("WPM_LOCALE").filter(|locale| !locale.trim().is_empty()) {
            self.locale = Some(locale.trim().to_string());
        }
        if self.locale.is_none() {
            self.locale = lookup("LANG").and_then(|lang| locale_from_lang(&lang));
        }
        self
    }

    pub fn effective_locale(&self) -> &str {
        self.locale.as_deref().unwrap_or(DEFAULT_LOCALE)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `de_DE.UTF-8` -> `de-DE`. The `C`/`POSIX` locales carry no language.
fn locale_from_lang(lang: &str) -> Option<String> {
    let base = lang.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::{DEFAULT_LOCALE, DiscoveryConfig};

    fn overlay(vars: &[(&str, &str)]) -> DiscoveryConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        DiscoveryConfig::default().overlay(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_prefer_native_engine_and_fallback_locale() {
        let config = overlay(&[]);
        assert!(!config.force_cli_engine);
        assert!(config.proxy.is_none());
        assert_eq!(config.effective_locale(), DEFAULT_LOCALE);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = overlay(&[
            ("WPM_FORCE_CLI", "true"),
            ("WPM_WINGET_PATH", "C:\\tools\\winget.exe"),
            ("WPM_PROXY", "http://proxy:3128"),
            ("WPM_PROXY_AUTH", "1"),
            ("WPM_ELEVATED", "yes"),
            ("WPM_LOCALE", "fr-FR"),
        ]);

        assert!(config.force_cli_engine);
        assert_eq!(config.executable, Some(PathBuf::from("C:\\tools\\winget.exe")));
        let proxy = config.proxy.as_ref().expect("proxy should be set");
        assert_eq!(proxy.url, "http://proxy:3128");
        assert!(proxy.requires_auth);
        assert!(config.elevated);
        assert_eq!(config.effective_locale(), "fr-FR");
    }

    #[test]
    fn locale_is_derived_from_lang() {
        assert_eq!(overlay(&[("LANG", "de_DE.UTF-8")]).effective_locale(), "de-DE");
        assert_eq!(overlay(&[("LANG", "C")]).effective_locale(), DEFAULT_LOCALE);
    }
}
