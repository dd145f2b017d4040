//! Lowers `$apply` transformation chains: `filter(...)`, and
//! `groupby((Col1,Col2),aggregate(X with sum as Total))`. Transformations
//! compose left-to-right; a `filter` step becomes a WHERE that applies
//! before any `groupby` later in the chain.

use crate::expr::parse_expression;
use crate::metadata::EntityDescription;
use crate::plan::SqlValue;
use crate::plan::expr_lower::lower_expr;
use crate::plan::planner::{AliasContext, CompiledQuery, PlanError, SelectColumn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggMethod {
    Sum,
    Average,
    Min,
    Max,
    Count,
    CountDistinct,
}

impl AggMethod {
    fn parse(s: &str) -> Result<Self, PlanError> {
        match s {
            "sum" => Ok(Self::Sum),
            "average" => Ok(Self::Average),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            "countdistinct" => Ok(Self::CountDistinct),
            other => Err(PlanError::InvalidApply(format!("unsupported aggregate method '{other}'"))),
        }
    }

    fn sql_fn(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Average => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Count => "COUNT",
            Self::CountDistinct => "COUNT",
        }
    }
}

pub fn lower_apply(
    ctx: &mut AliasContext,
    raw: &str,
    entity: &EntityDescription,
    alias: &str,
    table_name: &str,
    mut where_sql: Vec<String>,
    mut params: Vec<SqlValue>,
) -> Result<CompiledQuery, PlanError> {
    let steps = split_top_level_slash(raw);
    let mut group_cols: Vec<(String, String)> = Vec::new();
    let mut agg_cols: Vec<(String, String, AggMethod, bool)> = Vec::new(); // (source_sql, alias, method, distinct)
    let mut has_groupby = false;

    for step in steps {
        let step = step.trim();
        if let Some(body) = step.strip_prefix("filter(").and_then(|b| b.strip_suffix(')')) {
            let expr = parse_expression(body)
                .map_err(|e| PlanError::InvalidApply(format!("$apply filter: {e}")))?;
            let (sql, p) = lower_expr(ctx, &expr, entity, alias)?;
            where_sql.push(sql);
            params.extend(p);
        } else if let Some(body) = step.strip_prefix("groupby(").and_then(|b| b.strip_suffix(')')) {
            has_groupby = true;
            let (cols_part, agg_part) = split_groupby_args(body)
                .ok_or_else(|| PlanError::InvalidApply("malformed groupby(...)".to_string()))?;

            for col in cols_part.trim_start_matches('(').trim_end_matches(')').split(',') {
                let col = col.trim();
                if col.is_empty() {
                    continue;
                }
                let (sql, prop) = ctx.resolve_property(entity, alias, &[col.to_string()])?;
                group_cols.push((sql, prop.logical_name.clone()));
            }

            if let Some(agg_body) = agg_part {
                let agg_body = agg_body
                    .trim()
                    .strip_prefix("aggregate(")
                    .and_then(|b| b.strip_suffix(')'))
                    .ok_or_else(|| PlanError::InvalidApply("malformed aggregate(...)".to_string()))?;
                for clause in split_top_level_comma(agg_body) {
                    agg_cols.push(parse_aggregate_clause(ctx, entity, alias, clause.trim())?);
                }
            }
        } else if step.starts_with("aggregate(") {
            let body = step
                .strip_prefix("aggregate(")
                .and_then(|b| b.strip_suffix(')'))
                .ok_or_else(|| PlanError::InvalidApply("malformed aggregate(...)".to_string()))?;
            for clause in split_top_level_comma(body) {
                agg_cols.push(parse_aggregate_clause(ctx, entity, alias, clause.trim())?);
            }
        } else if !step.is_empty() {
            return Err(PlanError::InvalidApply(format!(
                "unsupported $apply transformation '{step}'"
            )));
        }
    }

    let mut select = Vec::new();
    for (sql, name) in &group_cols {
        select.push(SelectColumn {
            sql: sql.clone(),
            output_name: name.clone(),
        });
    }
    for (source_sql, out_name, method, distinct) in &agg_cols {
        let distinct_kw = if *distinct { "DISTINCT " } else { "" };
        let expr = if *method == AggMethod::Count && source_sql == "*" {
            "COUNT(*)".to_string()
        } else {
            format!("{}({distinct_kw}{source_sql})", method.sql_fn())
        };
        select.push(SelectColumn {
            sql: expr,
            output_name: out_name.clone(),
        });
    }

    if select.is_empty() {
        return Err(PlanError::InvalidApply(
            "$apply chain produced no projected columns".to_string(),
        ));
    }

    let group_sql = if has_groupby {
        group_cols.into_iter().map(|(sql, _)| sql).collect()
    } else {
        Vec::new()
    };

    Ok(CompiledQuery {
        from_table: table_name.to_string(),
        from_alias: alias.to_string(),
        joins: std::mem::take(&mut ctx.joins),
        where_sql,
        params,
        order_sql: Vec::new(),
        group_sql,
        select,
        limit: None,
        offset: None,
        is_aggregate: true,
    })
}

fn parse_aggregate_clause(
    ctx: &mut AliasContext,
    entity: &EntityDescription,
    alias: &str,
    clause: &str,
) -> Result<(String, String, AggMethod, bool), PlanError> {
    // `X with sum as Total` or `$count as Total`
    let as_pos = clause
        .rfind(" as ")
        .ok_or_else(|| PlanError::InvalidApply(format!("malformed aggregate clause '{clause}'")))?;
    let out_name = clause[as_pos + 4..].trim().to_string();
    let head = clause[..as_pos].trim();

    if head == "$count" {
        return Ok(("*".to_string(), out_name, AggMethod::Count, false));
    }

    let with_pos = head
        .find(" with ")
        .ok_or_else(|| PlanError::InvalidApply(format!("malformed aggregate clause '{clause}'")))?;
    let field = head[..with_pos].trim();
    let mut method_text = head[with_pos + 6..].trim();
    let distinct = if let Some(rest) = method_text.strip_prefix("countdistinct") {
        method_text = "countdistinct";
        let _ = rest;
        true
    } else {
        false
    };
    let method = AggMethod::parse(method_text)?;
    let (sql, _prop) = ctx.resolve_property(entity, alias, &[field.to_string()])?;
    Ok((sql, out_name, method, distinct))
}

fn split_top_level_slash(s: &str) -> Vec<&str> {
    split_top_level_by(s, '/')
}

fn split_top_level_comma(s: &str) -> Vec<&str> {
    split_top_level_by(s, ',')
}

fn split_top_level_by(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Splits `groupby(...)`'s body into the `(cols)` tuple and an optional
/// trailing `,aggregate(...)` clause.
fn split_groupby_args(body: &str) -> Option<(&str, Option<&str>)> {
    if !body.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let cols = &body[..=i];
                    let rest = body[i + 1..].trim_start_matches(',').trim();
                    return Some((cols, if rest.is_empty() { None } else { Some(rest) }));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EdmType, EntityTypeBuilder, MetadataRegistry, PropertyBuilder, EntitySetDescriptor};

    fn registry() -> MetadataRegistry {
        let mut reg = MetadataRegistry {
            namespace: "Ns".into(),
            container_name: "Container".into(),
            ..Default::default()
        };
        let entity = EntityTypeBuilder::new("Ns.Sale")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .property(PropertyBuilder::new("Region", EdmType::String))
            .property(PropertyBuilder::new("Amount", EdmType::Decimal))
            .build()
            .unwrap();
        reg.entity_types.insert(entity.qualified_name.clone(), entity);
        reg.entity_sets.insert(
            "Sales".into(),
            EntitySetDescriptor {
                name: "Sales".into(),
                entity_type: "Ns.Sale".into(),
                table_name: "sales".into(),
            },
        );
        reg
    }

    #[test]
    fn groupby_with_sum_aggregate_lowers() {
        let reg = registry();
        let entity = reg.entity_types.get("Ns.Sale").unwrap().clone();
        let mut ctx = AliasContext::new_for_test(&reg);
        let result = lower_apply(
            &mut ctx,
            "groupby((Region),aggregate(Amount with sum as Total))",
            &entity,
            "t0",
            "sales",
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        assert!(result.is_aggregate);
        assert_eq!(result.select.len(), 2);
        assert_eq!(result.group_sql.len(), 1);
    }
}
