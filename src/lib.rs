pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod expression;
pub mod field;
pub mod sql;
pub mod tuple;

pub type ColumnId = usize;

pub mod prelude {
    pub use crate::catalog::{ColumnDef, Schema, SchemaRef};
    pub use crate::config::{MergeStrategy, SortConfig};
    pub use crate::error::ExecError;
    pub use crate::executor::ondisk_pipeline::{
        verify_sorted, verify_sorted_scan, CancelFlag, OnDiskSort, Page, PageCodec, SortKey,
        SortStats, SortedRun, TupleComparator,
    };
    pub use crate::executor::{CsvSource, MemorySource, TupleSource};
    pub use crate::expression::{BinaryOp, Evaluator, ExprEvaluator, Expression};
    pub use crate::field::{DataType, Field};
    pub use crate::sql::parse_order_by;
    pub use crate::tuple::Tuple;
    pub use crate::ColumnId;
}
