pub mod condition;
pub mod join;
pub mod render;
pub mod sql;

pub use condition::{compile_conditions, compile_leaf, CompiledConditions, ConditionContext};
pub use join::{plan_joins, render_from, JoinStep};
pub use sql::{SqlBuilder, Statement};
