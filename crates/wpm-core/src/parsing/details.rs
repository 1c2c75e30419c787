use crate::models::PackageDetails;
use crate::models::details::set_if_present;

/// Lines `winget show` prints when the requested locale has no manifest data.
pub const LOCALE_FAILURE_MARKERS: &[&str] = &[
    "The value provided for the `locale` argument is invalid",
    "No applicable installer found",
];

pub fn is_locale_failure(line: &str) -> bool {
    LOCALE_FAILURE_MARKERS
        .iter()
        .any(|marker| line.contains(marker))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MultiLineField {
    Description,
    ReleaseNotes,
    Tags,
}

/// Line-oriented `Key: value` scanner for `winget show` output.
#[derive(Debug, Default)]
pub struct DetailsScanner {
    accumulating: Option<MultiLineField>,
    installer_only: bool,
}

impl DetailsScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only picks up the installer section (url, hash, type, release date),
    /// for callers that already filled the rest from another source.
    pub fn installer_only() -> Self {
        Self {
            accumulating: None,
            installer_only: true,
        }
    }

    pub fn push_line(&mut self, raw: &str, details: &mut PackageDetails) {
        let line = raw.trim_end();
        if line.is_empty() {
            return;
        }

        if line.starts_with(' ')
            && let Some(field) = self.accumulating
        {
            let value = line.trim();
            match field {
                MultiLineField::Description => append_line(&mut details.description, value),
                MultiLineField::ReleaseNotes => append_line(&mut details.release_notes, value),
                MultiLineField::Tags => details.tags.push(value.to_string()),
            }
            return;
        }
        self.accumulating = None;

        let trimmed = line.trim_start();
        let Some((key, value)) = trimmed.split_once(':') else {
            return;
        };
        let value = value.trim();

        match key {
            "Installer Url" => set_if_present(&mut details.installer_url, value),
            "Installer SHA256" => set_if_present(&mut details.installer_hash, value),
            "Installer Type" => set_if_present(&mut details.installer_type, value),
            "Release Date" => set_if_present(&mut details.update_date, value),
            _ if self.installer_only => {}
            "Publisher" => set_if_present(&mut details.publisher, value),
            "Author" => set_if_present(&mut details.author, value),
            "Homepage" => set_if_present(&mut details.homepage_url, value),
            "License" => set_if_present(&mut details.license, value),
            "License Url" => set_if_present(&mut details.license_url, value),
            "Release Notes Url" => set_if_present(&mut details.release_notes_url, value),
            "Description" => {
                details.description = None;
                set_if_present(&mut details.description, value);
                self.accumulating = Some(MultiLineField::Description);
            }
            "Release Notes" => {
                details.release_notes = None;
                set_if_present(&mut details.release_notes, value);
                self.accumulating = Some(MultiLineField::ReleaseNotes);
            }
            "Tags" => {
                details.tags.clear();
                self.accumulating = Some(MultiLineField::Tags);
            }
            _ => {}
        }
    }
}

fn append_line(slot: &mut Option<String>, value: &str) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(value);
        }
        None => *slot = Some(value.to_string()),
    }
}

pub fn scan_details(output: &str, details: &mut PackageDetails) {
    let mut scanner = DetailsScanner::new();
    for line in output.lines() {
        scanner.push_line(line, details);
    }
}

#[cfg(test)]
mod tests {
    use super::{DetailsScanner, is_locale_failure, scan_details};
    use crate::models::PackageDetails;

    const SHOW_FIXTURE: &str = include_str!("../../tests/fixtures/winget/show.txt");

    #[test]
    fn parses_show_fixture() {
        let mut details = PackageDetails::default();
        scan_details(SHOW_FIXTURE, &mut details);

        assert_eq!(details.publisher.as_deref(), Some("The Git Development Community"));
        assert_eq!(details.author.as_deref(), Some("Johannes Schindelin"));
        assert_eq!(details.homepage_url.as_deref(), Some("https://gitforwindows.org/"));
        assert_eq!(
            details.license.as_deref(),
            Some("GNU General Public License version 2.0")
        );
        assert_eq!(
            details.license_url.as_deref(),
            Some("https://raw.githubusercontent.com/git-for-windows/git/main/COPYING")
        );
        assert_eq!(
            details.release_notes_url.as_deref(),
            Some("https://github.com/git-for-windows/git/releases/tag/v2.45.1.windows.1")
        );
        assert_eq!(details.installer_type.as_deref(), Some("inno"));
        assert_eq!(
            details.installer_url.as_deref(),
            Some("https://github.com/git-for-windows/git/releases/download/v2.45.1.windows.1/Git-2.45.1-64-bit.exe")
        );
        assert_eq!(
            details.installer_hash.as_deref(),
            Some("1b89d2dd3ad8e9e83f61a1e4b0a7c6a5d0e6bbfc7d7d4c1bf87a1f5b1b5e3e77")
        );
        assert_eq!(details.update_date.as_deref(), Some("2024-05-14"));
    }

    #[test]
    fn multi_line_fields_accumulate_until_dedent() {
        let mut details = PackageDetails::default();
        scan_details(SHOW_FIXTURE, &mut details);

        assert_eq!(
            details.description.as_deref(),
            Some("Git for Windows focuses on offering a lightweight, native set of tools\nthat bring the full feature set of the Git SCM to Windows.")
        );
        assert_eq!(
            details.release_notes.as_deref(),
            Some("Changes since Git for Windows v2.45.0\nBug Fixes")
        );
        assert_eq!(details.tags, vec!["bash", "cli", "vcs"]);
    }

    #[test]
    fn installer_only_scanner_leaves_catalog_fields_alone() {
        let mut details = PackageDetails {
            publisher: Some("from catalog".to_string()),
            ..PackageDetails::default()
        };
        let mut scanner = DetailsScanner::installer_only();
        for line in SHOW_FIXTURE.lines() {
            scanner.push_line(line, &mut details);
        }

        assert_eq!(details.publisher.as_deref(), Some("from catalog"));
        assert!(details.description.is_none());
        assert!(details.tags.is_empty());
        assert_eq!(details.installer_type.as_deref(), Some("inno"));
        assert_eq!(details.update_date.as_deref(), Some("2024-05-14"));
    }

    #[test]
    fn detects_locale_failure_markers() {
        assert!(is_locale_failure(
            "The value provided for the `locale` argument is invalid: xx-XX"
        ));
        assert!(is_locale_failure(
            "No applicable installer found; see logs for more details."
        ));
        assert!(!is_locale_failure("Found Git [Git.Git]"));
    }
}
