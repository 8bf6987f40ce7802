// # Import Module
//
// Raw upload -> validated rows -> per-key entities:
//
// - **ImportParser**: collaborator trait; `CsvImportParser` is the default
//   (encoding detection, header aliases, row validation)
// - **partition**: merges rows sharing a natural key, keeps one detail row per input row
//
// Public API:
// - `ImportRecord`: One validated row
// - `UniqueEntity` / `DetailRow`: Partition output
// - `ImportContext`: Category and reference date applied to a whole import

mod parser;
mod partition;
mod types;

pub use parser::{decode_text, CoreColumn, CsvImportParser};
pub use partition::{partition, Partition};
pub use types::{
    DetailRow, ImportContext, ImportParser, ImportRecord, InvalidRow, ParseError, ParsedImport,
    UniqueEntity, DEFAULT_CATEGORY,
};
