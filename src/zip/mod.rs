pub mod extractor;
pub mod parser;
pub mod structures;
pub mod writer;

pub use extractor::{EntryExtractor, ExtractionResult};
pub use parser::{Directory, DirectoryParser};
pub use structures::{CompressionMethod, DosDateTime, ZipEntry};
pub use writer::ZipWriter;
