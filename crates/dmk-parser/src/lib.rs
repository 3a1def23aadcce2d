pub mod flatten;
mod lexer;
pub mod macros;
pub mod unit;

use dmk_core::SmError;

pub use flatten::{ParenGroup, ParsedUnit};
pub use lexer::{PROP2_KW, PROP2_MARKER, PROP_KW, PROP_MARKER};
pub use unit::{LocatedParseUnit, ParseUnit};

/// Parses and macro-expands a script into its macro-aware tree.
pub fn parse_tree(text: &str) -> Result<LocatedParseUnit, SmError> {
    lexer::Lexer::new(text).parse_script()
}

/// Parses a script into the flat token stream consumed by the constructor.
pub fn export_parsed_units(text: &str) -> Result<Vec<ParsedUnit>, SmError> {
    flatten::flatten_to_units(&parse_tree(text)?)
}

/// Parses a script and rejoins the expanded tokens with single spaces.
pub fn remake_as_string(text: &str) -> Result<String, SmError> {
    flatten::flatten_to_string(&parse_tree(text)?)
}
