//! External sort: run files, streaming readers, k-way merge and the sorter.

pub mod merge;
pub mod run_file;
pub mod sorter;
pub mod streaming_reader;

pub use merge::{DescOrder, KWayMerge, KeyOrder, MemoryRun, MergeSource, RunSource};
pub use run_file::{RunFileHeader, RunFileInfo, RunFileWriter};
pub use sorter::{SortedTuples, TupleSorter};
pub use streaming_reader::StreamingRunReader;
