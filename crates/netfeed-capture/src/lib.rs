//! netfeed capture sources
//!
//! - [`TsharkCapture`]: live interface or pcap file through a tshark subprocess
//! - [`ReaderSource`]: saved field-extraction text from a file or stdin

pub mod lines;
pub mod process;
pub mod reader;
pub mod tshark;

pub use lines::LineReader;
pub use process::ProcessLines;
pub use reader::ReaderSource;
pub use tshark::{find_binary, source_label, tshark_args, TsharkCapture, TsharkConfig};
