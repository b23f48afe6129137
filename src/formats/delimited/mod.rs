pub mod reader;

pub use reader::DelimitedReader;
