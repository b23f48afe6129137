//! I/O abstraction layer for reading spreadsheet exports

pub mod byte_reader;
pub mod local_reader;

pub use byte_reader::{ByteReader, read_bounded};
pub use local_reader::LocalFileByteReader;
