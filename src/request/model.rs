//! The structured query request model.
//!
//! Every node is an explicit discriminated union; shapes the deserializer
//! does not recognize fail at the parsing boundary, long before any SQL is
//! built.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete query request: root entity, filter/group/order/page
/// parameters, and the result projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub root_schema: String,
    pub param: ReqParam,
    pub result: ResultSpec,
    /// Object vs list shape; only meaningful without paging.
    #[serde(default)]
    pub shape: ResultShape,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    Object,
    #[default]
    List,
}

/// Filter, grouping, ordering and paging parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReqParam {
    #[serde(default)]
    pub conditions: Option<ConditionNode>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub page: Option<Page>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Paging: 1-based page number and page size. Counting is on by default and
/// can be suppressed when the caller only needs the window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page: u64,
    pub limit: u64,
    #[serde(default = "default_true")]
    pub count: bool,
}

fn default_true() -> bool {
    true
}

impl Page {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

/// A recursive AND/OR condition tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConditionNode {
    /// A single column/operator/value comparison. The schema defaults to
    /// the enclosing group's schema, and ultimately to the request root.
    Leaf {
        #[serde(default)]
        schema: Option<String>,
        column: String,
        op: ConditionType,
        #[serde(default)]
        value: Value,
    },
    /// A nested AND/OR composition.
    Group {
        #[serde(default)]
        schema: Option<String>,
        #[serde(default)]
        logic: GroupLogic,
        children: Vec<ConditionNode>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupLogic {
    #[default]
    And,
    Or,
}

impl GroupLogic {
    pub fn sql(&self) -> &'static str {
        match self {
            GroupLogic::And => "AND",
            GroupLogic::Or => "OR",
        }
    }
}

/// Closed set of condition operators. Each tag owns one pure compilation
/// rule in `compile::condition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    /// LIKE with wildcards on both ends.
    Like,
    /// LIKE matching a leading fragment.
    LikePrefix,
    /// LIKE matching a trailing fragment.
    LikeSuffix,
    NotLike,
    Between,
    IsNull,
    NotNull,
}

impl ConditionType {
    pub const ALL: [ConditionType; 15] = [
        ConditionType::Eq,
        ConditionType::Ne,
        ConditionType::Gt,
        ConditionType::Gte,
        ConditionType::Lt,
        ConditionType::Lte,
        ConditionType::In,
        ConditionType::NotIn,
        ConditionType::Like,
        ConditionType::LikePrefix,
        ConditionType::LikeSuffix,
        ConditionType::NotLike,
        ConditionType::Between,
        ConditionType::IsNull,
        ConditionType::NotNull,
    ];

    /// Wire tag, as accepted by the deserializer.
    pub fn tag(&self) -> &'static str {
        match self {
            ConditionType::Eq => "eq",
            ConditionType::Ne => "ne",
            ConditionType::Gt => "gt",
            ConditionType::Gte => "gte",
            ConditionType::Lt => "lt",
            ConditionType::Lte => "lte",
            ConditionType::In => "in",
            ConditionType::NotIn => "notIn",
            ConditionType::Like => "like",
            ConditionType::LikePrefix => "likePrefix",
            ConditionType::LikeSuffix => "likeSuffix",
            ConditionType::NotLike => "notLike",
            ConditionType::Between => "between",
            ConditionType::IsNull => "isNull",
            ConditionType::NotNull => "notNull",
        }
    }
}

/// The result projection for one schema level; recursive through
/// [`ResultColumn::Relation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSpec {
    /// Defaults to the request root at the top level; nested blocks name
    /// the related schema.
    #[serde(default)]
    pub schema: Option<String>,
    pub columns: Vec<ResultColumn>,
}

/// One projected output entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResultColumn {
    /// A plain column; output key is the column alias.
    Column { column: String },
    /// An aggregate function with optional post-aggregation filters.
    #[serde(rename_all = "camelCase")]
    Aggregate {
        alias: String,
        func: AggregateFunc,
        /// Absent only for count-of-all.
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        having: Vec<HavingCond>,
    },
    /// A date-time column rewritten with a chrono pattern and optional
    /// IANA timezone.
    #[serde(rename_all = "camelCase")]
    DateFormat {
        column: String,
        format: String,
        #[serde(default)]
        timezone: Option<String>,
    },
    /// A nested related-entity sub-projection fetched in one batched
    /// follow-up query and merged under `key`.
    Relation { key: String, result: ResultSpec },
}

impl ResultColumn {
    /// Output key this entry occupies in the result object.
    pub fn output_key(&self) -> &str {
        match self {
            ResultColumn::Column { column } => column.rsplit('.').next().unwrap_or(column),
            ResultColumn::Aggregate { alias, .. } => alias,
            ResultColumn::DateFormat { column, .. } => column.rsplit('.').next().unwrap_or(column),
            ResultColumn::Relation { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFunc {
    pub fn sql(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Min => "MIN",
        }
    }
}

/// A post-aggregation comparison applied to an aggregate output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HavingCond {
    pub op: ConditionType,
    #[serde(default)]
    pub value: Value,
}

/// A possibly schema-qualified column reference (`"schema.column"` or
/// `"column"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef<'a> {
    pub schema: Option<&'a str>,
    pub column: &'a str,
}

impl<'a> ColumnRef<'a> {
    pub fn parse(input: &'a str) -> Self {
        match input.split_once('.') {
            Some((schema, column)) => Self {
                schema: Some(schema),
                column,
            },
            None => Self {
                schema: None,
                column: input,
            },
        }
    }
}
