//! NZB index files: writing them after an upload and reading them back

mod output;
mod reader;
mod writer;

pub use output::{FileRecord, NzbOutput};
pub use reader::{filename_from_subject, NzbFileSummary, NzbListing};
pub use writer::{NzbSink, NzbWriter};
