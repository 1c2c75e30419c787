use serde::Serialize;

use crate::models::Package;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PackageDetails {
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub author: Option<String>,
    pub homepage_url: Option<String>,
    pub license: Option<String>,
    pub license_url: Option<String>,
    pub release_notes: Option<String>,
    pub release_notes_url: Option<String>,
    pub manifest_url: Option<String>,
    pub installer_url: Option<String>,
    pub installer_hash: Option<String>,
    pub installer_type: Option<String>,
    pub update_date: Option<String>,
    pub tags: Vec<String>,
}

impl PackageDetails {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Stores `value` in `slot` unless it is blank.
pub(crate) fn set_if_present(slot: &mut Option<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

/// Browsable manifest location for packages coming from the two well-known
/// remote sources.
pub fn manifest_url(package: &Package) -> Option<String> {
    let id = package.id();
    match package.source().name.as_str() {
        "winget" => {
            let first = id.chars().next()?.to_lowercase().to_string();
            let mut segments = id.split('.');
            let publisher = segments.next()?;
            let rest: Vec<&str> = segments.collect();
            let tail = if rest.is_empty() {
                publisher.to_string()
            } else {
                rest.join("/")
            };
            Some(format!(
                "https://github.com/microsoft/winget-pkgs/tree/master/manifests/{first}/{publisher}/{tail}"
            ))
        }
        "msstore" => Some(format!("https://apps.microsoft.com/detail/{id}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{PackageDetails, manifest_url, set_if_present};
    use crate::models::{ManagerId, Package, Source};

    fn package(id: &str, source: &str) -> Package {
        Package::new(
            id,
            id,
            "1.0",
            Arc::new(Source::new(ManagerId::WinGet, source, "https://example.invalid")),
            ManagerId::WinGet,
        )
    }

    #[test]
    fn winget_manifest_url_nests_publisher_and_name() {
        let url = manifest_url(&package("Microsoft.PowerToys", "winget"));
        assert_eq!(
            url.as_deref(),
            Some("https://github.com/microsoft/winget-pkgs/tree/master/manifests/m/Microsoft/PowerToys")
        );
    }

    #[test]
    fn msstore_manifest_url_points_at_store_listing() {
        let url = manifest_url(&package("9NBLGGH4NNS1", "msstore"));
        assert_eq!(url.as_deref(), Some("https://apps.microsoft.com/detail/9NBLGGH4NNS1"));
    }

    #[test]
    fn local_sources_have_no_manifest_url() {
        assert!(manifest_url(&package("ARP\\Machine\\X64\\Foo", "Local PC")).is_none());
    }

    #[test]
    fn blank_values_do_not_overwrite_fields() {
        let mut details = PackageDetails {
            author: Some("kept".to_string()),
            ..PackageDetails::default()
        };
        set_if_present(&mut details.author, "   ");
        assert_eq!(details.author.as_deref(), Some("kept"));
    }
}
