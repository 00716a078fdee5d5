//! Pure rule sets for the land-information ETL engine.
//!
//! Validation rules turn typed subject records into [`issue::Issue`] values;
//! derivation rules compute published attributes from maintained ones.
//! Nothing here touches a store: callers load the records, run the rules and
//! write the results.

pub mod address;
pub mod derive;
pub mod issue;
pub mod road;

pub use issue::{Issue, PublicationSets};

use rlid_core::{record::Record, values::clean_whitespace};

/// Cleaned text of `name`, with blank strings read as absent.
pub(crate) fn text_of(record: &Record, name: &str) -> Option<String> {
  record.text(name).and_then(|s| clean_whitespace(s, true))
}
