//! Filter DSL compiler
//!
//! Translates the caller-facing structured filter into a parameterised SQL
//! fragment. Field names resolve through a closed allow-list; caller values
//! only ever travel through positional parameters, never into the SQL text.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Validation failures raised while parsing or compiling a filter
///
/// All variants surface as HTTP 400 at the API boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unknown filter field: {field}")]
    UnknownField { field: String },

    #[error("Operator '{op}' is not allowed on field '{field}'")]
    DisallowedOperator { field: String, op: String },

    #[error("Unknown filter operator: {op}")]
    UnknownOperator { op: String },

    #[error("Field '{field}' expects alias '{expected}', got '{got}'")]
    WrongAlias {
        field: String,
        expected: String,
        got: String,
    },

    #[error("Operator '{op}' on field '{field}' requires a non-empty 'values' list")]
    EmptyList { field: String, op: String },

    #[error("Operator '{op}' on field '{field}' requires a two-element 'range'")]
    MissingBounds { field: String, op: String },

    #[error("Invalid combine mode: {got} (expected 'and' or 'or')")]
    InvalidCombine { got: String },

    #[error("Legacy filter keys and the conditions DSL cannot be mixed")]
    MixedShapes,

    #[error("Invalid filter condition: {message}")]
    InvalidCondition { message: String },
}

/// One operator with its typed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(JsonValue),
    Ne(JsonValue),
    Gt(JsonValue),
    Gte(JsonValue),
    Lt(JsonValue),
    Lte(JsonValue),
    In(Vec<JsonValue>),
    NotIn(Vec<JsonValue>),
    Between(JsonValue, JsonValue),
    NotBetween(JsonValue, JsonValue),
    IsNull,
    IsNotNull,
}

impl FilterOp {
    const fn name(&self) -> &'static str {
        match self {
            Self::Eq(_) => "eq",
            Self::Ne(_) => "ne",
            Self::Gt(_) => "gt",
            Self::Gte(_) => "gte",
            Self::Lt(_) => "lt",
            Self::Lte(_) => "lte",
            Self::In(_) => "in",
            Self::NotIn(_) => "notIn",
            Self::Between(..) => "between",
            Self::NotBetween(..) => "notBetween",
            Self::IsNull => "isNull",
            Self::IsNotNull => "isNotNull",
        }
    }
}

/// A validated condition bound to an allow-listed field
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    field: &'static FieldSpec,
    op: FilterOp,
}

/// How the conditions are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
    #[default]
    And,
    Or,
}

/// A parsed, validated filter ready to compile
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    conditions: Vec<FilterCondition>,
    combine: Combine,
}

/// The compiled SQL fragment plus its ordered parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FilterFragment {
    /// `" AND (…)"` or empty when the filter has no conditions
    pub sql: String,
    /// Values to bind, in placeholder order
    pub params: Vec<JsonValue>,
    /// The next free placeholder index after this fragment
    pub next_index: usize,
}

/// Coarse column type, used only to decide parameter casts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Text,
    Int,
    Timestamp,
}

/// Operator families granted per field class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpClass {
    /// eq, ne, in, notIn, isNull, isNotNull
    Equality,
    /// Equality plus gt/gte/lt/lte/between/notBetween
    Ordered,
}

/// One allow-list entry: a logical field bound to exactly one alias + column
#[derive(Debug, PartialEq, Eq)]
struct FieldSpec {
    logical: &'static str,
    alias: &'static str,
    column: &'static str,
    field_type: FieldType,
    ops: OpClass,
    /// eq/ne rewrite to prefix match (the `path` field)
    prefix_match: bool,
}

/// The closed allow-list. A logical name binds to exactly one alias; `c` is
/// the chunks table, `d` the documents table.
static FIELDS: &[FieldSpec] = &[
    FieldSpec {
        logical: "docType",
        alias: "c",
        column: "doc_type",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "lang",
        alias: "c",
        column: "lang",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "path",
        alias: "c",
        column: "path",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: true,
    },
    FieldSpec {
        logical: "source",
        alias: "c",
        column: "source",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "repoId",
        alias: "c",
        column: "repo_id",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "repoUrl",
        alias: "c",
        column: "repo_url",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "itemUrl",
        alias: "c",
        column: "item_url",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "enrichmentStatus",
        alias: "c",
        column: "enrichment_status",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "chunkIndex",
        alias: "c",
        column: "chunk_index",
        field_type: FieldType::Int,
        ops: OpClass::Ordered,
        prefix_match: false,
    },
    FieldSpec {
        logical: "createdAt",
        alias: "c",
        column: "created_at",
        field_type: FieldType::Timestamp,
        ops: OpClass::Ordered,
        prefix_match: false,
    },
    FieldSpec {
        logical: "baseId",
        alias: "d",
        column: "base_id",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "mimeType",
        alias: "d",
        column: "mime_type",
        field_type: FieldType::Text,
        ops: OpClass::Equality,
        prefix_match: false,
    },
    FieldSpec {
        logical: "ingestedAt",
        alias: "d",
        column: "ingested_at",
        field_type: FieldType::Timestamp,
        ops: OpClass::Ordered,
        prefix_match: false,
    },
    FieldSpec {
        logical: "updatedAt",
        alias: "d",
        column: "updated_at",
        field_type: FieldType::Timestamp,
        ops: OpClass::Ordered,
        prefix_match: false,
    },
    FieldSpec {
        logical: "lastSeen",
        alias: "d",
        column: "last_seen",
        field_type: FieldType::Timestamp,
        ops: OpClass::Ordered,
        prefix_match: false,
    },
];

fn lookup_field(logical: &str) -> Result<&'static FieldSpec, FilterError> {
    FIELDS
        .iter()
        .find(|f| f.logical == logical)
        .ok_or_else(|| FilterError::UnknownField {
            field: logical.to_string(),
        })
}

/// Raw condition shape as received on the wire
#[derive(Debug, Deserialize)]
struct RawCondition {
    field: String,
    op: String,
    #[serde(default)]
    value: Option<JsonValue>,
    #[serde(default)]
    values: Option<Vec<JsonValue>>,
    #[serde(default)]
    range: Option<Vec<JsonValue>>,
    #[serde(default)]
    alias: Option<String>,
}

fn require_value(
    value: Option<JsonValue>,
    field: &str,
    op: &str,
) -> Result<JsonValue, FilterError> {
    value.ok_or_else(|| FilterError::InvalidCondition {
        message: format!("operator '{op}' on '{field}' requires 'value'"),
    })
}

impl RawCondition {
    fn into_condition(self) -> Result<FilterCondition, FilterError> {
        let spec = lookup_field(&self.field)?;

        if let Some(alias) = &self.alias {
            if alias != spec.alias {
                return Err(FilterError::WrongAlias {
                    field: self.field,
                    expected: spec.alias.to_string(),
                    got: alias.clone(),
                });
            }
        }

        let op_name = self.op;
        let op = match op_name.as_str() {
            "eq" => FilterOp::Eq(require_value(self.value, spec.logical, "eq")?),
            "ne" => FilterOp::Ne(require_value(self.value, spec.logical, "ne")?),
            "gt" => FilterOp::Gt(require_value(self.value, spec.logical, "gt")?),
            "gte" => FilterOp::Gte(require_value(self.value, spec.logical, "gte")?),
            "lt" => FilterOp::Lt(require_value(self.value, spec.logical, "lt")?),
            "lte" => FilterOp::Lte(require_value(self.value, spec.logical, "lte")?),
            "in" | "notIn" => {
                let values = self.values.unwrap_or_default();
                if values.is_empty() {
                    return Err(FilterError::EmptyList {
                        field: spec.logical.to_string(),
                        op: op_name,
                    });
                }
                if op_name == "in" {
                    FilterOp::In(values)
                } else {
                    FilterOp::NotIn(values)
                }
            }
            "between" | "notBetween" => {
                let mut range = self.range.unwrap_or_default();
                if range.len() != 2 {
                    return Err(FilterError::MissingBounds {
                        field: spec.logical.to_string(),
                        op: op_name,
                    });
                }
                let high = range.pop().unwrap_or(JsonValue::Null);
                let low = range.pop().unwrap_or(JsonValue::Null);
                if op_name == "between" {
                    FilterOp::Between(low, high)
                } else {
                    FilterOp::NotBetween(low, high)
                }
            }
            "isNull" => FilterOp::IsNull,
            "isNotNull" => FilterOp::IsNotNull,
            _ => {
                return Err(FilterError::UnknownOperator { op: op_name });
            }
        };

        let allowed = match spec.ops {
            OpClass::Ordered => true,
            OpClass::Equality => matches!(
                op,
                FilterOp::Eq(_)
                    | FilterOp::Ne(_)
                    | FilterOp::In(_)
                    | FilterOp::NotIn(_)
                    | FilterOp::IsNull
                    | FilterOp::IsNotNull
            ),
        };
        if !allowed {
            return Err(FilterError::DisallowedOperator {
                field: spec.logical.to_string(),
                op: op.name().to_string(),
            });
        }

        Ok(FilterCondition { field: spec, op })
    }
}

impl Filter {
    /// Parse a filter object
    ///
    /// Accepts the conditions DSL as well as the legacy shapes
    /// (`{key: value}`, `{must: […]}`, `{must_not: […]}`). Mixing the DSL
    /// and a legacy shape in one object is rejected.
    ///
    /// # Errors
    ///
    /// Returns a [`FilterError`] for any allow-list or shape violation.
    pub fn parse(raw: &JsonValue) -> Result<Self, FilterError> {
        let Some(object) = raw.as_object() else {
            return Err(FilterError::InvalidCondition {
                message: "filter must be a JSON object".to_string(),
            });
        };
        if object.is_empty() {
            return Ok(Self::default());
        }

        let has_dsl = object.contains_key("conditions") || object.contains_key("combine");
        let has_legacy_lists = object.contains_key("must") || object.contains_key("must_not");
        let plain_keys: Vec<&String> = object
            .keys()
            .filter(|k| !matches!(k.as_str(), "conditions" | "combine" | "must" | "must_not"))
            .collect();

        if has_dsl && (has_legacy_lists || !plain_keys.is_empty()) {
            return Err(FilterError::MixedShapes);
        }
        if has_legacy_lists && !plain_keys.is_empty() {
            return Err(FilterError::MixedShapes);
        }

        if has_dsl {
            return Self::parse_dsl(object);
        }
        if has_legacy_lists {
            return Self::parse_legacy_lists(object);
        }
        Self::parse_legacy_map(object)
    }

    fn parse_dsl(object: &serde_json::Map<String, JsonValue>) -> Result<Self, FilterError> {
        let combine = match object.get("combine").and_then(JsonValue::as_str) {
            None | Some("and") => Combine::And,
            Some("or") => Combine::Or,
            Some(other) => {
                return Err(FilterError::InvalidCombine {
                    got: other.to_string(),
                });
            }
        };

        let raw_conditions = object
            .get("conditions")
            .cloned()
            .unwrap_or_else(|| JsonValue::Array(vec![]));
        let raw_conditions: Vec<RawCondition> =
            serde_json::from_value(raw_conditions).map_err(|e| FilterError::InvalidCondition {
                message: e.to_string(),
            })?;

        let conditions = raw_conditions
            .into_iter()
            .map(RawCondition::into_condition)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { conditions, combine })
    }

    /// Legacy `{must: […], must_not: […]}`: each entry is a
    /// `{field, value}` pair, AND-joined; `must_not` entries negate to `ne`.
    fn parse_legacy_lists(
        object: &serde_json::Map<String, JsonValue>,
    ) -> Result<Self, FilterError> {
        let mut conditions = Vec::new();
        for (key, negate) in [("must", false), ("must_not", true)] {
            let Some(entries) = object.get(key) else {
                continue;
            };
            let Some(entries) = entries.as_array() else {
                return Err(FilterError::InvalidCondition {
                    message: format!("'{key}' must be an array"),
                });
            };
            for entry in entries {
                let (field, value) = legacy_entry_pair(entry)?;
                let spec = lookup_field(&field)?;
                let op = if negate {
                    FilterOp::Ne(value)
                } else {
                    FilterOp::Eq(value)
                };
                conditions.push(FilterCondition { field: spec, op });
            }
        }
        Ok(Self {
            conditions,
            combine: Combine::And,
        })
    }

    /// Legacy plain map `{key: value}`: every pair becomes an eq condition
    fn parse_legacy_map(object: &serde_json::Map<String, JsonValue>) -> Result<Self, FilterError> {
        // BTreeMap gives a deterministic placeholder order for map input
        let sorted: BTreeMap<&String, &JsonValue> = object.iter().collect();
        let mut conditions = Vec::new();
        for (field, value) in sorted {
            let spec = lookup_field(field)?;
            conditions.push(FilterCondition {
                field: spec,
                op: FilterOp::Eq((*value).clone()),
            });
        }
        Ok(Self {
            conditions,
            combine: Combine::And,
        })
    }

    /// Whether the filter has no conditions
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Compile into a SQL fragment with placeholders starting at `offset`
    ///
    /// The fragment is `" AND (<joined>)"`, with the outer parentheses only
    /// present when there are two or more conditions. `offset` is the index
    /// of the first placeholder this fragment may use (1-based).
    pub fn compile(&self, offset: usize) -> FilterFragment {
        if self.conditions.is_empty() {
            return FilterFragment {
                sql: String::new(),
                params: Vec::new(),
                next_index: offset,
            };
        }

        let mut params = Vec::new();
        let mut next = offset;
        let mut pieces = Vec::with_capacity(self.conditions.len());

        for cond in &self.conditions {
            pieces.push(compile_condition(cond, &mut params, &mut next));
        }

        let joiner = match self.combine {
            Combine::And => " AND ",
            Combine::Or => " OR ",
        };
        let joined = pieces.join(joiner);

        let sql = if self.conditions.len() >= 2 {
            format!(" AND ({joined})")
        } else {
            format!(" AND {joined}")
        };

        FilterFragment {
            sql,
            params,
            next_index: next,
        }
    }
}

/// Extract the `(field, value)` pair from a legacy must/must_not entry
///
/// Accepts either `{"field": "...", "value": ...}` or a single-key map
/// `{"docType": "code"}`.
fn legacy_entry_pair(entry: &JsonValue) -> Result<(String, JsonValue), FilterError> {
    let Some(object) = entry.as_object() else {
        return Err(FilterError::InvalidCondition {
            message: "legacy filter entries must be objects".to_string(),
        });
    };
    if let (Some(field), Some(value)) = (object.get("field"), object.get("value")) {
        let Some(field) = field.as_str() else {
            return Err(FilterError::InvalidCondition {
                message: "legacy entry 'field' must be a string".to_string(),
            });
        };
        return Ok((field.to_string(), value.clone()));
    }
    if object.len() == 1 {
        if let Some((field, value)) = object.iter().next() {
            return Ok((field.clone(), value.clone()));
        }
    }
    Err(FilterError::InvalidCondition {
        message: "legacy entry must be {field, value} or a single-key map".to_string(),
    })
}

/// Emit one placeholder, with a cast for parameter types Postgres cannot
/// infer against the column.
fn placeholder(spec: &FieldSpec, params: &mut Vec<JsonValue>, next: &mut usize, value: JsonValue) -> String {
    let index = *next;
    *next += 1;
    params.push(value);
    match spec.field_type {
        FieldType::Timestamp => format!("${index}::timestamptz"),
        FieldType::Text | FieldType::Int => format!("${index}"),
    }
}

fn compile_condition(
    cond: &FilterCondition,
    params: &mut Vec<JsonValue>,
    next: &mut usize,
) -> String {
    let spec = cond.field;
    let col = format!("{}.{}", spec.alias, spec.column);

    match &cond.op {
        FilterOp::Eq(v) if spec.prefix_match => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} LIKE {p} || '%'")
        }
        FilterOp::Ne(v) if spec.prefix_match => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} NOT LIKE {p} || '%'")
        }
        FilterOp::Eq(v) => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} = {p}")
        }
        FilterOp::Ne(v) => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} <> {p}")
        }
        FilterOp::Gt(v) => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} > {p}")
        }
        FilterOp::Gte(v) => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} >= {p}")
        }
        FilterOp::Lt(v) => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} < {p}")
        }
        FilterOp::Lte(v) => {
            let p = placeholder(spec, params, next, v.clone());
            format!("{col} <= {p}")
        }
        FilterOp::In(values) => {
            let ps: Vec<String> = values
                .iter()
                .map(|v| placeholder(spec, params, next, v.clone()))
                .collect();
            format!("{col} IN ({})", ps.join(", "))
        }
        FilterOp::NotIn(values) => {
            let ps: Vec<String> = values
                .iter()
                .map(|v| placeholder(spec, params, next, v.clone()))
                .collect();
            format!("{col} NOT IN ({})", ps.join(", "))
        }
        FilterOp::Between(low, high) => {
            let lo = placeholder(spec, params, next, low.clone());
            let hi = placeholder(spec, params, next, high.clone());
            format!("{col} BETWEEN {lo} AND {hi}")
        }
        FilterOp::NotBetween(low, high) => {
            let lo = placeholder(spec, params, next, low.clone());
            let hi = placeholder(spec, params, next, high.clone());
            format!("{col} NOT BETWEEN {lo} AND {hi}")
        }
        FilterOp::IsNull => format!("{col} IS NULL"),
        FilterOp::IsNotNull => format!("{col} IS NOT NULL"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(raw: JsonValue, offset: usize) -> FilterFragment {
        Filter::parse(&raw).unwrap().compile(offset)
    }

    #[test]
    fn two_conditions_or_combined() {
        let fragment = compile(
            json!({
                "conditions": [
                    {"field": "docType", "op": "eq", "value": "code"},
                    {"field": "lang", "op": "eq", "value": "ts"}
                ],
                "combine": "or"
            }),
            1,
        );
        assert_eq!(fragment.sql, " AND (c.doc_type = $1 OR c.lang = $2)");
        assert_eq!(fragment.params, vec![json!("code"), json!("ts")]);
        assert_eq!(fragment.next_index, 3);
    }

    #[test]
    fn single_condition_has_no_outer_parens() {
        let fragment = compile(
            json!({"conditions": [{"field": "lang", "op": "eq", "value": "rs"}]}),
            4,
        );
        assert_eq!(fragment.sql, " AND c.lang = $4");
        assert_eq!(fragment.next_index, 5);
    }

    #[test]
    fn path_eq_rewrites_to_prefix_match() {
        let fragment = compile(
            json!({"conditions": [{"field": "path", "op": "eq", "value": "src/"}]}),
            1,
        );
        assert_eq!(fragment.sql, " AND c.path LIKE $1 || '%'");
        assert_eq!(fragment.params, vec![json!("src/")]);
    }

    #[test]
    fn path_ne_rewrites_to_negated_prefix_match() {
        let fragment = compile(
            json!({"conditions": [{"field": "path", "op": "ne", "value": "vendor/"}]}),
            1,
        );
        assert_eq!(fragment.sql, " AND c.path NOT LIKE $1 || '%'");
    }

    #[test]
    fn in_list_uses_one_placeholder_per_value() {
        let fragment = compile(
            json!({"conditions": [
                {"field": "docType", "op": "in", "values": ["code", "markdown", "html"]}
            ]}),
            1,
        );
        assert_eq!(fragment.sql, " AND c.doc_type IN ($1, $2, $3)");
        assert_eq!(fragment.params.len(), 3);
        assert_eq!(fragment.next_index, 4);
    }

    #[test]
    fn between_emits_two_placeholders_with_cast() {
        let fragment = compile(
            json!({"conditions": [
                {"field": "createdAt", "op": "between",
                 "range": ["2026-01-01T00:00:00Z", "2026-02-01T00:00:00Z"]}
            ]}),
            1,
        );
        assert_eq!(
            fragment.sql,
            " AND c.created_at BETWEEN $1::timestamptz AND $2::timestamptz"
        );
    }

    #[test]
    fn is_null_takes_no_parameters() {
        let fragment = compile(
            json!({"conditions": [{"field": "lang", "op": "isNull"}]}),
            9,
        );
        assert_eq!(fragment.sql, " AND c.lang IS NULL");
        assert!(fragment.params.is_empty());
        assert_eq!(fragment.next_index, 9);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "secretColumn", "op": "eq", "value": 1}]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            FilterError::UnknownField {
                field: "secretColumn".to_string()
            }
        );
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "lang", "op": "regex", "value": ".*"}]
        }))
        .unwrap_err();
        assert_eq!(err, FilterError::UnknownOperator { op: "regex".to_string() });
    }

    #[test]
    fn range_operator_on_text_field_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "lang", "op": "gt", "value": "a"}]
        }))
        .unwrap_err();
        assert!(matches!(err, FilterError::DisallowedOperator { .. }));
    }

    #[test]
    fn wrong_alias_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "docType", "op": "eq", "value": "code", "alias": "d"}]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            FilterError::WrongAlias {
                field: "docType".to_string(),
                expected: "c".to_string(),
                got: "d".to_string()
            }
        );
    }

    #[test]
    fn matching_alias_is_accepted() {
        let fragment = compile(
            json!({"conditions": [
                {"field": "mimeType", "op": "eq", "value": "text/html", "alias": "d"}
            ]}),
            1,
        );
        assert_eq!(fragment.sql, " AND d.mime_type = $1");
    }

    #[test]
    fn empty_in_list_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "lang", "op": "in", "values": []}]
        }))
        .unwrap_err();
        assert!(matches!(err, FilterError::EmptyList { .. }));
    }

    #[test]
    fn between_with_one_bound_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "chunkIndex", "op": "between", "range": [1]}]
        }))
        .unwrap_err();
        assert!(matches!(err, FilterError::MissingBounds { .. }));
    }

    #[test]
    fn invalid_combine_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "lang", "op": "eq", "value": "rs"}],
            "combine": "xor"
        }))
        .unwrap_err();
        assert_eq!(err, FilterError::InvalidCombine { got: "xor".to_string() });
    }

    #[test]
    fn legacy_map_becomes_and_joined_eq() {
        let fragment = compile(json!({"docType": "code", "lang": "rs"}), 1);
        assert_eq!(fragment.sql, " AND (c.doc_type = $1 AND c.lang = $2)");
        assert_eq!(fragment.params, vec![json!("code"), json!("rs")]);
    }

    #[test]
    fn legacy_must_and_must_not() {
        let fragment = compile(
            json!({
                "must": [{"field": "docType", "value": "code"}],
                "must_not": [{"field": "lang", "value": "go"}]
            }),
            1,
        );
        assert_eq!(fragment.sql, " AND (c.doc_type = $1 AND c.lang <> $2)");
    }

    #[test]
    fn mixing_dsl_and_legacy_is_rejected() {
        let err = Filter::parse(&json!({
            "conditions": [{"field": "lang", "op": "eq", "value": "rs"}],
            "docType": "code"
        }))
        .unwrap_err();
        assert_eq!(err, FilterError::MixedShapes);

        let err = Filter::parse(&json!({
            "conditions": [],
            "must": []
        }))
        .unwrap_err();
        assert_eq!(err, FilterError::MixedShapes);
    }

    #[test]
    fn empty_filter_compiles_to_nothing() {
        let fragment = compile(json!({}), 5);
        assert_eq!(fragment.sql, "");
        assert!(fragment.params.is_empty());
        assert_eq!(fragment.next_index, 5);
    }

    #[test]
    fn injection_attempts_never_reach_the_sql_text() {
        // Caller-supplied values must only travel through parameters.
        let hostile = [
            "'; DROP TABLE chunks; --",
            "1 OR 1=1",
            "$$; DELETE FROM documents",
            "\"; SELECT pg_sleep(10); --",
        ];
        for payload in hostile {
            let fragment = compile(
                json!({"conditions": [
                    {"field": "docType", "op": "eq", "value": payload},
                    {"field": "lang", "op": "in", "values": [payload, "x"]},
                    {"field": "path", "op": "eq", "value": payload}
                ]}),
                1,
            );
            assert!(
                !fragment.sql.contains(payload),
                "hostile value leaked into SQL: {}",
                fragment.sql
            );
            assert!(fragment.params.iter().any(|p| p == &json!(payload)));
        }
    }

    #[test]
    fn placeholder_offsets_chain_across_fragments() {
        let first = compile(
            json!({"conditions": [{"field": "docType", "op": "eq", "value": "code"}]}),
            3,
        );
        let second = compile(
            json!({"conditions": [{"field": "lang", "op": "eq", "value": "rs"}]}),
            first.next_index,
        );
        assert_eq!(first.sql, " AND c.doc_type = $3");
        assert_eq!(second.sql, " AND c.lang = $4");
    }
}
