use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::models::{ManagerId, Source};

pub const WINGET_SOURCE_NAME: &str = "winget";
pub const WINGET_SOURCE_URL: &str = "https://cdn.winget.microsoft.com/cache";
pub const MSSTORE_SOURCE_NAME: &str = "msstore";
pub const MSSTORE_SOURCE_URL: &str = "https://storeedgefd.dsx.mp.microsoft.com/v9.0";

/// Pseudo-sources for installed packages no catalog claims.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum LocalSourceKind {
    LocalPc,
    MicrosoftStore,
    AndroidSubsystem,
    Steam,
    UbisoftConnect,
    Gog,
}

impl LocalSourceKind {
    pub const ALL: [Self; 6] = [
        Self::LocalPc,
        Self::MicrosoftStore,
        Self::AndroidSubsystem,
        Self::Steam,
        Self::UbisoftConnect,
        Self::Gog,
    ];

    pub fn source_name(self) -> &'static str {
        match self {
            Self::LocalPc => "Local PC",
            Self::MicrosoftStore => "Microsoft Store",
            Self::AndroidSubsystem => "Android Subsystem",
            Self::Steam => "Steam",
            Self::UbisoftConnect => "Ubisoft Connect",
            Self::Gog => "GOG",
        }
    }
}

/// Guesses where a locally installed package came from by the shape of its
/// id, e.g. `ARP\Machine\X64\Steam App 1145360` or `MSIX\Foo_1.0_x64__8wekyb3d8bbwe`.
pub fn classify_local_id(id: &str) -> LocalSourceKind {
    let mut pieces = id.split('\\');
    if pieces.next() == Some("MSIX") {
        return LocalSourceKind::MicrosoftStore;
    }

    let meaningful = id.rsplit('\\').next().unwrap_or(id);
    if meaningful.is_empty() || meaningful.starts_with('{') {
        return LocalSourceKind::LocalPc;
    }

    if meaningful.matches('.').count() >= 2
        && meaningful
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '…')
    {
        return LocalSourceKind::AndroidSubsystem;
    }

    if meaningful == "Steam" || meaningful.starts_with("Steam App") {
        return LocalSourceKind::Steam;
    }

    if meaningful == "Uplay" || meaningful.starts_with("Uplay Install") {
        return LocalSourceKind::UbisoftConnect;
    }

    if let Some(product) = meaningful.strip_suffix("_is1")
        && !product.is_empty()
        && product.chars().all(|c| c.is_ascii_digit())
    {
        return LocalSourceKind::Gog;
    }

    LocalSourceKind::LocalPc
}

/// Name to [`Source`] lookup for one manager. Known sources can be added at
/// any time (catalog enumeration, `source list`); unknown names resolve to the
/// default source.
#[derive(Debug)]
pub struct SourceResolver {
    manager: ManagerId,
    default: Arc<Source>,
    known: DashMap<String, Arc<Source>>,
    locals: DashMap<LocalSourceKind, Arc<Source>>,
}

impl SourceResolver {
    pub fn new(manager: ManagerId, default: Source, known: impl IntoIterator<Item = Source>) -> Self {
        let default = Arc::new(default);
        let resolver = Self {
            manager,
            default: Arc::clone(&default),
            known: DashMap::new(),
            locals: DashMap::new(),
        };

        resolver.known.insert(default.name.clone(), default);
        for source in known {
            resolver.register(source);
        }
        for kind in LocalSourceKind::ALL {
            resolver
                .locals
                .insert(kind, Arc::new(Source::local(manager, kind.source_name())));
        }

        resolver
    }

    pub fn winget() -> Self {
        let manager = ManagerId::WinGet;
        Self::new(
            manager,
            Source::new(manager, WINGET_SOURCE_NAME, WINGET_SOURCE_URL),
            [Source::new(manager, MSSTORE_SOURCE_NAME, MSSTORE_SOURCE_URL)],
        )
    }

    pub fn manager(&self) -> ManagerId {
        self.manager
    }

    pub fn default_source(&self) -> Arc<Source> {
        Arc::clone(&self.default)
    }

    pub fn resolve_by_name(&self, name: &str) -> Arc<Source> {
        let name = name.trim();
        match self.known.get(name) {
            Some(source) => Arc::clone(source.value()),
            None => {
                tracing::debug!(
                    manager = self.manager.name(),
                    source = name,
                    "unknown source name, using the default source"
                );
                self.default_source()
            }
        }
    }

    /// Adds or refreshes a named source and returns the stored handle.
    pub fn register(&self, source: Source) -> Arc<Source> {
        let source = Arc::new(source);
        self.known.insert(source.name.clone(), Arc::clone(&source));
        source
    }

    pub fn resolve_local(&self, id: &str) -> Arc<Source> {
        self.local_source(classify_local_id(id))
    }

    pub fn local_source(&self, kind: LocalSourceKind) -> Arc<Source> {
        match self.locals.get(&kind) {
            Some(source) => Arc::clone(source.value()),
            None => Arc::new(Source::local(self.manager, kind.source_name())),
        }
    }

    /// Named sources seen so far, sorted by name.
    pub fn known_sources(&self) -> Vec<Arc<Source>> {
        let mut sources: Vec<Arc<Source>> = self
            .known
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sources.sort_by(|left, right| left.name.cmp(&right.name));
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalSourceKind, SourceResolver, classify_local_id};
    use crate::models::{LOCAL_SOURCE_URL, ManagerId, Source};

    #[test]
    fn classifies_game_launcher_installs() {
        assert_eq!(classify_local_id("Steam App 12345"), LocalSourceKind::Steam);
        assert_eq!(
            classify_local_id("ARP\\Machine\\X64\\Steam App 1145360"),
            LocalSourceKind::Steam
        );
        assert_eq!(classify_local_id("ARP\\Machine\\X64\\Steam"), LocalSourceKind::Steam);
        assert_eq!(
            classify_local_id("ARP\\Machine\\X86\\Uplay Install 4553"),
            LocalSourceKind::UbisoftConnect
        );
        assert_eq!(classify_local_id("12345_is1"), LocalSourceKind::Gog);
    }

    #[test]
    fn gog_suffix_requires_numeric_product_id() {
        assert_eq!(classify_local_id("ABCDE_is1"), LocalSourceKind::LocalPc);
        assert_eq!(classify_local_id("_is1"), LocalSourceKind::LocalPc);
    }

    #[test]
    fn classifies_store_and_mobile_ids() {
        assert_eq!(
            classify_local_id("MSIX\\Microsoft.WindowsTerminal_1.19.11213.0_x64__8wekyb3d8bbwe"),
            LocalSourceKind::MicrosoftStore
        );
        assert_eq!(classify_local_id("com.example.app"), LocalSourceKind::AndroidSubsystem);
        assert_eq!(classify_local_id("com.example.very…"), LocalSourceKind::AndroidSubsystem);
        assert_eq!(classify_local_id("Com.Example.App"), LocalSourceKind::LocalPc);
        assert_eq!(classify_local_id("example.app"), LocalSourceKind::LocalPc);
    }

    #[test]
    fn guid_and_empty_ids_fall_back_to_local_pc() {
        assert_eq!(
            classify_local_id("ARP\\Machine\\X64\\{8A69D345-D564-463C-AFF1-A69D9E530F96}"),
            LocalSourceKind::LocalPc
        );
        assert_eq!(classify_local_id(""), LocalSourceKind::LocalPc);
    }

    #[test]
    fn unknown_names_resolve_to_default_source() {
        let resolver = SourceResolver::winget();
        assert_eq!(resolver.resolve_by_name("msstore").url, super::MSSTORE_SOURCE_URL);
        assert_eq!(resolver.resolve_by_name("nonexistent").name, "winget");
    }

    #[test]
    fn registered_sources_become_resolvable() {
        let resolver = SourceResolver::winget();
        resolver.register(Source::new(
            ManagerId::WinGet,
            "contoso",
            "https://mirror.contoso.test",
        ));

        assert_eq!(
            resolver.resolve_by_name("contoso").url,
            "https://mirror.contoso.test"
        );
        let names: Vec<String> = resolver
            .known_sources()
            .iter()
            .map(|source| source.name.clone())
            .collect();
        assert_eq!(names, vec!["contoso", "msstore", "winget"]);
    }

    #[test]
    fn local_sources_are_virtual_with_placeholder_url() {
        let resolver = SourceResolver::winget();
        let steam = resolver.resolve_local("Steam App 12345");
        assert_eq!(steam.name, "Steam");
        assert!(steam.is_virtual);
        assert_eq!(steam.url, LOCAL_SOURCE_URL);
    }
}
