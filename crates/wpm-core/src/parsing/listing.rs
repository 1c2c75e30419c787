/// Tracks the dashed separator of simple one-column or two-column listings
/// (`source list`, `show --versions`).
#[derive(Debug, Default)]
pub struct ListingParser {
    past_dashes: bool,
}

impl ListingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the trimmed line once the separator has been seen.
    pub fn push_line<'a>(&mut self, line: &'a str) -> Option<&'a str> {
        let line = line.rsplit('\r').next().unwrap_or(line).trim();
        if line.is_empty() {
            return None;
        }
        if !self.past_dashes {
            self.past_dashes = line.contains("---");
            return None;
        }
        Some(line)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceRow {
    pub name: String,
    pub url: String,
}

/// `winget source list` rows: name and argument separated by padding.
pub fn parse_source_row(line: &str) -> Option<SourceRow> {
    let mut columns = split_padded(line);
    if columns.len() < 2 {
        columns = line.split_whitespace().collect();
    }
    match columns.as_slice() {
        [name, url, ..] => Some(SourceRow {
            name: name.to_string(),
            url: url.to_string(),
        }),
        _ => None,
    }
}

fn split_padded(line: &str) -> Vec<&str> {
    line.split("  ")
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .collect()
}

pub fn parse_source_list(output: &str) -> Vec<SourceRow> {
    let mut parser = ListingParser::new();
    output
        .lines()
        .filter_map(|line| parser.push_line(line))
        .filter_map(parse_source_row)
        .collect()
}

pub fn parse_version_list(output: &str) -> Vec<String> {
    let mut parser = ListingParser::new();
    output
        .lines()
        .filter_map(|line| parser.push_line(line))
        .map(str::to_string)
        .collect()
}
