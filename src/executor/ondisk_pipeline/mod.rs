pub mod comparator;
pub mod page;
pub mod run;
pub mod sort;

pub use comparator::{SortKey, TupleComparator};
pub use page::{Page, PageCodec};
pub use run::{CancelFlag, RunKey, RunNamer, SortedRun};
pub use sort::{verify_sorted, verify_sorted_scan, OnDiskSort, SortStats};
