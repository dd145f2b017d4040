//! Lowers a single `$filter`/`$orderby`/`$apply`-filter AST node into a
//! parameterized SQL fragment plus its bound values. Every literal becomes
//! a `?` placeholder bound through `rusqlite::params_from_iter`; only
//! column/alias identifiers are ever built with string formatting, per
//! the no-interpolated-literals rule this planner follows.

use crate::expr::{ArithOp, CompareOp, Expr, LambdaKind, LogicalOp, Value};
use crate::metadata::{Cardinality, EntityDescription, EdmType};
use crate::plan::SqlValue;
use crate::plan::planner::{AliasContext, PlanError};

type Lowered = (String, Vec<SqlValue>);

pub fn lower_expr(
    ctx: &mut AliasContext,
    expr: &Expr,
    entity: &EntityDescription,
    alias: &str,
) -> Result<Lowered, PlanError> {
    match expr {
        Expr::Literal(v) => Ok((String::from("?"), vec![lower_value(v)])),

        Expr::Property(path) => {
            let (sql, _prop) = ctx.resolve_property(entity, alias, path)?;
            Ok((sql, Vec::new()))
        }

        Expr::Variable(name) => {
            let (var_alias, var_entity) = ctx
                .range_vars
                .get(name)
                .cloned()
                .ok_or_else(|| PlanError::UnknownProperty(name.clone()))?;
            let key = var_entity
                .key_properties()
                .next()
                .map(|p| p.physical_name.clone())
                .unwrap_or_default();
            Ok((format!("{var_alias}.{key}"), Vec::new()))
        }

        Expr::Not(inner) => {
            let (sql, params) = lower_expr(ctx, inner, entity, alias)?;
            Ok((format!("NOT ({sql})"), params))
        }

        Expr::Negate(inner) => {
            let (sql, params) = lower_expr(ctx, inner, entity, alias)?;
            Ok((format!("(-{sql})"), params))
        }

        Expr::Logical(l, op, r) => {
            let (lsql, mut lp) = lower_expr(ctx, l, entity, alias)?;
            let (rsql, rp) = lower_expr(ctx, r, entity, alias)?;
            lp.extend(rp);
            let kw = match op {
                LogicalOp::And => "AND",
                LogicalOp::Or => "OR",
            };
            Ok((format!("({lsql} {kw} {rsql})"), lp))
        }

        Expr::Compare(l, op, r) => {
            if let (Expr::Property(lp), Expr::Literal(Value::Null)) = (l.as_ref(), r.as_ref()) {
                let (sql, _) = ctx.resolve_property(entity, alias, lp)?;
                let frag = if *op == CompareOp::Eq {
                    format!("{sql} IS NULL")
                } else {
                    format!("{sql} IS NOT NULL")
                };
                return Ok((frag, Vec::new()));
            }
            let (lsql, mut lparams) = lower_expr(ctx, l, entity, alias)?;
            let (rsql, rparams) = lower_expr(ctx, r, entity, alias)?;
            lparams.extend(rparams);
            let op_sql = match op {
                CompareOp::Eq => "=",
                CompareOp::Ne => "!=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
            };
            Ok((format!("({lsql} {op_sql} {rsql})"), lparams))
        }

        Expr::Arith(l, op, r) => {
            let (lsql, mut lparams) = lower_expr(ctx, l, entity, alias)?;
            let (rsql, rparams) = lower_expr(ctx, r, entity, alias)?;
            lparams.extend(rparams);
            let op_sql = match op {
                ArithOp::Add => "+",
                ArithOp::Sub => "-",
                ArithOp::Mul => "*",
                ArithOp::Div => "/",
                ArithOp::Mod => "%",
            };
            Ok((format!("({lsql} {op_sql} {rsql})"), lparams))
        }

        Expr::In(lhs, items) => {
            let (lsql, mut params) = lower_expr(ctx, lhs, entity, alias)?;
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                let (isql, iparams) = lower_expr(ctx, item, entity, alias)?;
                placeholders.push(isql);
                params.extend(iparams);
            }
            Ok((format!("{lsql} IN ({})", placeholders.join(", ")), params))
        }

        Expr::Call(name, args) => lower_call(ctx, name, args, entity, alias),

        Expr::Lambda {
            collection,
            kind,
            range_var,
            predicate,
        } => lower_lambda(ctx, collection, *kind, range_var.as_deref(), predicate, entity, alias),
    }
}

fn lower_value(v: &Value) -> SqlValue {
    match v {
        Value::Int(n) => SqlValue::Int(*n),
        Value::Decimal(d) => SqlValue::Real(*d),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::DateTime(dt) => SqlValue::Text(dt.to_rfc3339()),
        Value::Guid(g) => SqlValue::Text(g.clone()),
        Value::Null => SqlValue::Null,
    }
}

fn lower_call(
    ctx: &mut AliasContext,
    name: &str,
    args: &[Expr],
    entity: &EntityDescription,
    alias: &str,
) -> Result<Lowered, PlanError> {
    let mut lowered_args = Vec::with_capacity(args.len());
    for a in args {
        lowered_args.push(lower_expr(ctx, a, entity, alias)?);
    }
    let sqls: Vec<&str> = lowered_args.iter().map(|(s, _)| s.as_str()).collect();
    let mut params = Vec::new();
    for (_, p) in &lowered_args {
        params.extend(p.clone());
    }

    let frag = match name {
        "contains" => format!("instr({}, {}) > 0", sqls[0], sqls[1]),
        "startswith" => format!("substr({}, 1, length({})) = {}", sqls[0], sqls[1], sqls[1]),
        "endswith" => format!("substr({}, -length({})) = {}", sqls[0], sqls[1], sqls[1]),
        "tolower" => format!("lower({})", sqls[0]),
        "toupper" => format!("upper({})", sqls[0]),
        "trim" => format!("trim({})", sqls[0]),
        "length" => format!("length({})", sqls[0]),
        "indexof" => format!("(instr({}, {}) - 1)", sqls[0], sqls[1]),
        "substring" => {
            if sqls.len() == 2 {
                format!("substr({}, {} + 1)", sqls[0], sqls[1])
            } else {
                format!("substr({}, {} + 1, {})", sqls[0], sqls[1], sqls[2])
            }
        }
        "concat" => format!("({})", sqls.join(" || ")),
        "year" => format!("CAST(strftime('%Y', {}) AS INTEGER)", sqls[0]),
        "month" => format!("CAST(strftime('%m', {}) AS INTEGER)", sqls[0]),
        "day" => format!("CAST(strftime('%d', {}) AS INTEGER)", sqls[0]),
        "hour" => format!("CAST(strftime('%H', {}) AS INTEGER)", sqls[0]),
        "minute" => format!("CAST(strftime('%M', {}) AS INTEGER)", sqls[0]),
        "second" => format!("CAST(strftime('%S', {}) AS INTEGER)", sqls[0]),
        "round" => format!("round({})", sqls[0]),
        "floor" => format!("floor({})", sqls[0]),
        "ceiling" => format!("ceil({})", sqls[0]),
        other => return Err(PlanError::UnknownProperty(other.to_string())),
    };
    Ok((frag, params))
}

fn lower_lambda(
    ctx: &mut AliasContext,
    collection: &[String],
    kind: LambdaKind,
    range_var: Option<&str>,
    predicate: &Expr,
    entity: &EntityDescription,
    alias: &str,
) -> Result<Lowered, PlanError> {
    let nav_name = collection
        .last()
        .ok_or_else(|| PlanError::UnknownNavigation(String::new()))?;
    let (host_alias, host_entity) = if collection.len() > 1 {
        ctx.resolve_navigation_prefix(entity, alias, &collection[..collection.len() - 1], false)?
    } else {
        (alias.to_string(), entity.clone())
    };
    let nav = host_entity
        .navigation(nav_name)
        .ok_or_else(|| PlanError::UnknownNavigation(nav_name.clone()))?
        .clone();
    if nav.cardinality != Cardinality::Collection {
        return Err(PlanError::LambdaRequiredOnCollectionNavigation);
    }
    let target_entity = ctx
        .registry
        .entity_types
        .get(&nav.target_type)
        .ok_or_else(|| PlanError::UnknownNavigation(nav_name.clone()))?
        .clone();
    let target_table = ctx
        .registry
        .table_name_for_set(&nav.target_set)
        .ok_or_else(|| PlanError::UnknownEntitySet(nav.target_set.clone()))?
        .to_string();

    let sub_alias = format!("lx{}", ctx.joins.len());
    let fk = nav.foreign_key.clone().unwrap_or_default();
    let fk_col = target_entity
        .property(&fk)
        .map(|p| p.physical_name.clone())
        .unwrap_or(fk);
    let own_key = host_entity
        .key_properties()
        .next()
        .map(|p| p.physical_name.clone())
        .unwrap_or_default();

    let mut params = Vec::new();
    let (pred_sql, pred_params) = if let Some(var) = range_var {
        ctx.range_vars
            .insert(var.to_string(), (sub_alias.clone(), target_entity.clone()));
        let r = lower_expr(ctx, predicate, &target_entity, &sub_alias)?;
        ctx.range_vars.remove(var);
        r
    } else {
        (String::from("1"), Vec::new())
    };
    params.extend(pred_params);

    let exists_sql = format!(
        "EXISTS (SELECT 1 FROM {target_table} AS {sub_alias} WHERE {sub_alias}.{fk_col} = {host_alias}.{own_key} AND {pred_sql})"
    );

    match kind {
        LambdaKind::Any => Ok((exists_sql, params)),
        LambdaKind::All => {
            // all(p) == not exists(not p)
            let negated = format!(
                "NOT EXISTS (SELECT 1 FROM {target_table} AS {sub_alias} WHERE {sub_alias}.{fk_col} = {host_alias}.{own_key} AND NOT ({pred_sql}))"
            );
            Ok((negated, params))
        }
    }
}

pub fn edm_type_of(entity: &EntityDescription, path: &[String]) -> Option<EdmType> {
    entity.property(path.last()?).map(|p| p.edm_type)
}
