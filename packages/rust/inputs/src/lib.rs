//! Input loaders: the YAML criteria catalog and the CSV organization roster.
//!
//! Both loaders are lenient per entry and strict per file. A bad criterion or
//! roster row becomes a [`ValidationIssue`](openness_shared::ValidationIssue)
//! and is skipped. A catalog that cannot be used at all is a run-fatal
//! [`OpennessError::Catalog`](openness_shared::OpennessError::Catalog).

mod catalog_loader;
mod roster;

pub use catalog_loader::{LoadedCatalog, catalog_fingerprint, load_catalog, parse_catalog};
pub use roster::{LoadedRoster, load_roster, parse_roster};
