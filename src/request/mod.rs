pub mod model;
pub mod validate;

pub use model::{
    AggregateFunc, ConditionNode, ConditionType, GroupLogic, OrderBy, Page, QueryRequest,
    ReqParam, ResultColumn, ResultShape, ResultSpec, SortDirection,
};
pub use validate::{validate, TouchedTables, ValidatedRequest};
