use thiserror::Error;

/// Tokens that land in a field when a banner or summary line happens to be
/// long enough to pass the column checks.
const BANNER_TOKENS: &[&str] = &[
    "", "e(s)", "have", "the", "Id", "an", "'winget", "pin'", "Version",
];

/// Upper bound on how far a row may sit left of the header's `Id` column is
/// `id - MIN_NAME_COLUMN`, so the name column can never be eaten entirely.
const MIN_NAME_COLUMN: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableKind {
    /// `winget search`: name, id, version, optional match, source.
    Search,
    /// `winget list`: name, id, version, optional available, source.
    Installed,
    /// `winget update`: name, id, version, available, source.
    Updates,
}

/// Column start offsets measured on the header line, in characters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TableLayout {
    pub id: Option<usize>,
    pub version: Option<usize>,
    pub available: Option<usize>,
    pub source: Option<usize>,
}

impl TableLayout {
    pub fn from_header(header: &str) -> Self {
        let (prefix, suffix) = if header.contains("SearchId") {
            ("Search", "Header")
        } else {
            ("", "")
        };

        Self {
            id: char_index_of(header, &format!("{prefix}Id")),
            version: char_index_of(header, &format!("{prefix}Version")),
            available: char_index_of(header, &format!("Available{suffix}")),
            source: char_index_of(header, &format!("{prefix}Source")),
        }
    }

    fn accepts(&self, kind: TableKind, line_len: usize) -> bool {
        let (Some(id), Some(version)) = (self.id, self.version) else {
            return false;
        };
        if id == 0 || id >= version || version >= line_len {
            return false;
        }

        match kind {
            TableKind::Updates => self
                .available
                .is_some_and(|available| version < available && available < line_len),
            TableKind::Search | TableKind::Installed => true,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableRow {
    pub name: String,
    pub id: String,
    pub version: String,
    pub new_version: Option<String>,
    pub source: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TableRowError {
    #[error("row has no `{0}` value")]
    MissingField(&'static str),
    #[error("row `{0}` is a banner line, not a package")]
    Banner(String),
    #[error("row is shorter than the `{0}` column")]
    Truncated(&'static str),
}

/// Incremental parser for one `winget` table stream. Feed it stdout lines in
/// the order they are produced.
#[derive(Debug)]
pub struct TableParser {
    kind: TableKind,
    previous: String,
    past_dashes: bool,
    layout: TableLayout,
}

impl TableParser {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            previous: String::new(),
            past_dashes: false,
            layout: TableLayout::default(),
        }
    }

    /// Returns `Ok(None)` for header, separator and non-row lines. An `Err`
    /// only describes the rejected line; the parser stays usable.
    pub fn push_line(&mut self, line: &str) -> Result<Option<TableRow>, TableRowError> {
        // Progress spinners are redrawn with bare carriage returns; only the
        // text after the last one is what a terminal would show.
        let line = line.rsplit('\r').next().unwrap_or(line);

        if self.kind == TableKind::Updates && line.contains("have pins") {
            return Ok(None);
        }

        let mut result = Ok(None);
        if !self.past_dashes && line.contains("---") {
            self.layout = TableLayout::from_header(&self.previous);
            self.past_dashes = true;
        } else if line.trim().is_empty() {
            // A blank line ends the table; a pinned sub-table may follow.
            self.past_dashes = false;
        } else if self.past_dashes {
            let chars: Vec<char> = line.chars().collect();
            if self.layout.accepts(self.kind, chars.len()) {
                result = self.extract(&chars).map(Some);
            }
        }

        self.previous = line.to_string();
        result
    }

    fn extract(&self, chars: &[char]) -> Result<TableRow, TableRowError> {
        let id_column = self.layout.id.ok_or(TableRowError::MissingField("id"))?;
        let version_column = self
            .layout
            .version
            .ok_or(TableRowError::MissingField("version"))?;

        let offset = realign_offset(chars, id_column);
        let column = |index: usize| index.saturating_sub(offset);

        let name = span(chars, 0, column(id_column));
        let id = first_token(chars, column(id_column));

        let version = match self.kind {
            TableKind::Search => first_token(chars, column(version_column)),
            TableKind::Installed => {
                let end = self
                    .layout
                    .available
                    .or(self.layout.source)
                    .filter(|next| *next > version_column)
                    .map(column)
                    .unwrap_or(chars.len());
                span(chars, column(version_column), end)
            }
            TableKind::Updates => {
                let available = self
                    .layout
                    .available
                    .ok_or(TableRowError::MissingField("available"))?;
                span(chars, column(version_column), column(available))
            }
        };

        let new_version = match (self.kind, self.layout.available) {
            (TableKind::Updates, Some(available)) => {
                let start = column(available);
                if start >= chars.len() {
                    return Err(TableRowError::Truncated("available"));
                }
                let value = match self.layout.source.filter(|source| *source > available) {
                    Some(source) => span(chars, start, column(source)),
                    None => first_token(chars, start),
                };
                Some(value)
            }
            _ => None,
        };

        let source = self
            .layout
            .source
            .map(column)
            .filter(|start| *start < chars.len())
            .map(|start| first_token(chars, start))
            .filter(|source| !source.is_empty());

        if [name.as_str(), id.as_str(), version.as_str()]
            .iter()
            .any(|field| BANNER_TOKENS.contains(field))
        {
            return Err(TableRowError::Banner(chars.iter().collect::<String>().trim().to_string()));
        }

        Ok(TableRow {
            name,
            id,
            version,
            new_version,
            source,
        })
    }
}

/// Rows holding characters the CLI counts as double width (the `…` used to
/// truncate long names, some CJK glyphs) start their columns further left
/// than the header says. Walks left from the header's `Id` position until
/// the character before it is a space.
fn realign_offset(chars: &[char], id_column: usize) -> usize {
    let limit = id_column.saturating_sub(MIN_NAME_COLUMN);
    let mut offset = 0;
    while offset < limit
        && chars
            .get(id_column - offset - 1)
            .is_some_and(|ch| *ch != ' ')
    {
        offset += 1;
    }
    offset
}

fn span(chars: &[char], start: usize, end: usize) -> String {
    let end = end.min(chars.len());
    let start = start.min(end);
    chars[start..end].iter().collect::<String>().trim().to_string()
}

fn first_token(chars: &[char], start: usize) -> String {
    let start = start.min(chars.len());
    chars[start..]
        .iter()
        .skip_while(|ch| ch.is_whitespace())
        .take_while(|ch| !ch.is_whitespace())
        .collect()
}

fn char_index_of(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .find(needle)
        .map(|byte_index| haystack[..byte_index].chars().count())
}

/// Runs a whole captured table through a fresh parser, returning the rows and
/// the number of rejected lines.
pub fn parse_table(kind: TableKind, output: &str) -> (Vec<TableRow>, usize) {
    let mut parser = TableParser::new(kind);
    let mut rows = Vec::new();
    let mut rejected = 0usize;

    for line in output.lines() {
        match parser.push_line(line) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => {}
            Err(_) => rejected += 1,
        }
    }

    (rows, rejected)
}
