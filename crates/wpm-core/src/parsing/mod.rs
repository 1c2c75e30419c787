pub mod details;
pub mod listing;
pub mod table;

pub use details::{DetailsScanner, LOCALE_FAILURE_MARKERS, is_locale_failure, scan_details};
pub use listing::{ListingParser, SourceRow, parse_source_list, parse_source_row, parse_version_list};
pub use table::{TableKind, TableLayout, TableParser, TableRow, TableRowError, parse_table};
