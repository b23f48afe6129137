//! Spreadsheet export readers and header/value normalization

pub mod delimited;
pub mod excel;
pub mod json;
pub mod normalize;
pub mod reader;

pub use normalize::normalize_sheet;
pub use reader::{DelimitedConfig, Format, ReaderFactory, Sheet, SheetReader};
