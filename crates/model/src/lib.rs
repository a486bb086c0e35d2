pub mod kind;
pub mod name_table;
pub mod node;

pub use kind::{ElementKind, NodeKind, ProcedureInfo};
pub use name_table::NameTable;
pub use node::{CCNode, MetricStat, Traverse};
