//! The query planner: turns an AST + the active query options into a
//! `CompiledQuery` ready for SQL text assembly. See module doc on
//! `expr_lower` for how individual expression nodes become SQL fragments.

use std::collections::HashMap;

use crate::metadata::{Cardinality, EntityDescription, MetadataRegistry, PropertyDescriptor};
use crate::plan::SqlValue;
use crate::plan::apply;
use crate::plan::expr_lower;
use crate::plan::options::{OrderItem, QueryOptions, SortDir};
use crate::plan::search;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("unknown property '{0}'")]
    UnknownProperty(String),
    #[error("unknown navigation '{0}'")]
    UnknownNavigation(String),
    #[error("invalid operand type for operator")]
    InvalidTypeForOperator,
    #[error("property '{0}' is excluded and may not be referenced")]
    ExcludedPropertyReferenced(String),
    #[error("'any'/'all' requires a collection-valued navigation path")]
    LambdaRequiredOnCollectionNavigation,
    #[error("comparison between complex-typed properties is not supported")]
    ComplexTypeComparisonNotSupported,
    #[error("unknown entity set '{0}'")]
    UnknownEntitySet(String),
    #[error("invalid $apply transformation: {0}")]
    InvalidApply(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub alias: String,
    pub table: String,
    pub on_sql: String,
    pub kind: JoinKind,
}

#[derive(Debug, Clone)]
pub struct SelectColumn {
    pub sql: String,
    pub output_name: String,
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub from_table: String,
    pub from_alias: String,
    pub joins: Vec<JoinClause>,
    pub where_sql: Vec<String>,
    pub params: Vec<SqlValue>,
    pub order_sql: Vec<String>,
    pub group_sql: Vec<String>,
    pub select: Vec<SelectColumn>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub is_aggregate: bool,
}

impl CompiledQuery {
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        let cols: Vec<String> = self
            .select
            .iter()
            .map(|c| format!("{} AS {}", c.sql, quote_ident(&c.output_name)))
            .collect();
        sql.push_str(&cols.join(", "));
        sql.push_str(&format!(" FROM {} AS {}", self.from_table, self.from_alias));
        for j in &self.joins {
            let kw = match j.kind {
                JoinKind::Left => "LEFT JOIN",
                JoinKind::Inner => "INNER JOIN",
            };
            sql.push_str(&format!(" {kw} {} AS {} ON {}", j.table, j.alias, j.on_sql));
        }
        if !self.where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_sql.join(" AND "));
        }
        if !self.group_sql.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_sql.join(", "));
        }
        if !self.order_sql.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_sql.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    pub fn count_sql(&self) -> String {
        let mut sql = format!("SELECT COUNT(*) FROM {} AS {}", self.from_table, self.from_alias);
        for j in &self.joins {
            let kw = match j.kind {
                JoinKind::Left => "LEFT JOIN",
                JoinKind::Inner => "INNER JOIN",
            };
            sql.push_str(&format!(" {kw} {} AS {} ON {}", j.table, j.alias, j.on_sql));
        }
        if !self.where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_sql.join(" AND "));
        }
        sql
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Per-compile scratch state: alias counter, join list, and the mapping
/// from navigation path -> alias so identical paths share a join
/// (invariant #1/#2 in the planner's contract).
pub struct AliasContext<'a> {
    pub registry: &'a MetadataRegistry,
    pub joins: Vec<JoinClause>,
    alias_counter: usize,
    path_aliases: HashMap<String, String>,
    pub range_vars: HashMap<String, (String, EntityDescription)>,
}

impl<'a> AliasContext<'a> {
    #[cfg(test)]
    pub fn new_for_test(registry: &'a MetadataRegistry) -> Self {
        Self::new(registry)
    }

    fn new(registry: &'a MetadataRegistry) -> Self {
        Self {
            registry,
            joins: Vec::new(),
            alias_counter: 0,
            path_aliases: HashMap::new(),
            range_vars: HashMap::new(),
        }
    }

    fn next_alias(&mut self) -> String {
        let a = format!("t{}", self.alias_counter);
        self.alias_counter += 1;
        a
    }

    /// Resolves a navigation path prefix (everything but the final
    /// structural property), returning the alias of the entity the final
    /// property lives on plus that entity's description.
    pub fn resolve_navigation_prefix(
        &mut self,
        start_entity: &EntityDescription,
        start_alias: &str,
        path_prefix: &[String],
        prefer_inner: bool,
    ) -> Result<(String, EntityDescription), PlanError> {
        let mut current_entity = start_entity.clone();
        let mut current_alias = start_alias.to_string();
        let mut path_key = String::new();

        for step in path_prefix {
            let nav = current_entity
                .navigation(step)
                .ok_or_else(|| PlanError::UnknownNavigation(step.clone()))?
                .clone();
            if nav.cardinality == Cardinality::Collection {
                return Err(PlanError::LambdaRequiredOnCollectionNavigation);
            }
            path_key.push('/');
            path_key.push_str(step);

            if let Some(existing) = self.path_aliases.get(&path_key) {
                current_alias = existing.clone();
            } else {
                let target_entity = self
                    .registry
                    .entity_types
                    .get(&nav.target_type)
                    .ok_or_else(|| PlanError::UnknownNavigation(step.clone()))?
                    .clone();
                let target_table = self
                    .registry
                    .table_name_for_set(&nav.target_set)
                    .ok_or_else(|| PlanError::UnknownEntitySet(nav.target_set.clone()))?
                    .to_string();
                let alias = self.next_alias();

                let on_sql = if nav.owns_foreign_key {
                    let fk = nav.foreign_key.clone().unwrap_or_default();
                    let fk_col = current_entity
                        .property(&fk)
                        .map(|p| p.physical_name.clone())
                        .unwrap_or(fk);
                    let ref_key = nav
                        .referenced_key
                        .clone()
                        .or_else(|| target_entity.key_properties().next().map(|p| p.logical_name.clone()))
                        .unwrap_or_default();
                    let ref_col = target_entity
                        .property(&ref_key)
                        .map(|p| p.physical_name.clone())
                        .unwrap_or(ref_key);
                    format!("{current_alias}.{fk_col} = {alias}.{ref_col}")
                } else {
                    let fk = nav.foreign_key.clone().unwrap_or_default();
                    let fk_col = target_entity
                        .property(&fk)
                        .map(|p| p.physical_name.clone())
                        .unwrap_or(fk);
                    let own_key = current_entity
                        .key_properties()
                        .next()
                        .map(|p| p.physical_name.clone())
                        .unwrap_or_default();
                    format!("{current_alias}.{own_key} = {alias}.{fk_col}")
                };

                self.joins.push(JoinClause {
                    alias: alias.clone(),
                    table: target_table,
                    on_sql,
                    kind: if prefer_inner { JoinKind::Inner } else { JoinKind::Left },
                });
                self.path_aliases.insert(path_key.clone(), alias.clone());
                current_alias = alias;
                current_entity = target_entity;
            }
        }
        Ok((current_alias, current_entity))
    }

    pub fn resolve_property(
        &mut self,
        entity: &EntityDescription,
        alias: &str,
        path: &[String],
    ) -> Result<(String, PropertyDescriptor), PlanError> {
        if path.is_empty() {
            return Err(PlanError::UnknownProperty(String::new()));
        }

        // A lambda range variable shadows the root entity for the rest of
        // the path: `i/Price` inside `Items/any(i:...)` resolves `Price`
        // against the collection's element type, not the outer entity.
        if let Some((var_alias, var_entity)) = self.range_vars.get(&path[0]).cloned() {
            if path.len() == 1 {
                let key = var_entity
                    .key_properties()
                    .next()
                    .cloned()
                    .ok_or_else(|| PlanError::UnknownProperty(path[0].clone()))?;
                return Ok((format!("{var_alias}.{}", key.physical_name), key));
            }
            return self.resolve_property(&var_entity, &var_alias, &path[1..]);
        }

        if path.len() == 1 {
            let prop = entity
                .property(&path[0])
                .ok_or_else(|| PlanError::UnknownProperty(path[0].clone()))?;
            if prop.is_excluded {
                return Err(PlanError::ExcludedPropertyReferenced(path[0].clone()));
            }
            return Ok((format!("{alias}.{}", prop.physical_name), prop.clone()));
        }
        let (final_alias, final_entity) =
            self.resolve_navigation_prefix(entity, alias, &path[..path.len() - 1], false)?;
        let last = &path[path.len() - 1];
        let prop = final_entity
            .property(last)
            .ok_or_else(|| PlanError::UnknownProperty(last.clone()))?;
        if prop.is_excluded {
            return Err(PlanError::ExcludedPropertyReferenced(last.clone()));
        }
        Ok((format!("{final_alias}.{}", prop.physical_name), prop.clone()))
    }
}

pub fn compile_query(
    registry: &MetadataRegistry,
    set_name: &str,
    options: &QueryOptions,
) -> Result<CompiledQuery, PlanError> {
    let set = registry
        .entity_set(set_name)
        .ok_or_else(|| PlanError::UnknownEntitySet(set_name.to_string()))?;
    let entity = registry
        .entity_types
        .get(&set.entity_type)
        .ok_or_else(|| PlanError::UnknownEntitySet(set_name.to_string()))?
        .clone();

    let mut ctx = AliasContext::new(registry);
    let root_alias = ctx.next_alias();

    let mut where_sql = Vec::new();
    let mut params = Vec::new();

    if let Some(filter) = &options.filter {
        let (sql, p) = expr_lower::lower_expr(&mut ctx, filter, &entity, &root_alias)?;
        where_sql.push(sql);
        params.extend(p);
    }

    if let Some(search_text) = &options.search {
        let (sql, p) = search::lower_search(&entity, &root_alias, search_text);
        if let Some(sql) = sql {
            where_sql.push(sql);
            params.extend(p);
        }
    }

    // Apply transformations (groupby/aggregate/filter) take priority over
    // plain projection when present; they replace select/group entirely.
    if let Some(apply_text) = &options.apply {
        return apply::lower_apply(
            &mut ctx,
            apply_text,
            &entity,
            &root_alias,
            &set.table_name,
            where_sql,
            params,
        );
    }

    let select = build_select_columns(&mut ctx, &entity, &root_alias, options)?;

    let mut order_sql = Vec::new();
    for item in &options.orderby {
        let (sql, _prop) = ctx.resolve_property(&entity, &root_alias, &item.path)?;
        order_sql.push(format!(
            "{sql} {}",
            if item.dir == SortDir::Asc { "ASC" } else { "DESC" }
        ));
    }
    if order_sql.is_empty() {
        if let Some(key) = entity.key_properties().next() {
            order_sql.push(format!("{root_alias}.{} ASC", key.physical_name));
        }
    }

    Ok(CompiledQuery {
        from_table: set.table_name.clone(),
        from_alias: root_alias,
        joins: ctx.joins,
        where_sql,
        params,
        order_sql,
        group_sql: Vec::new(),
        select,
        limit: options.top,
        offset: options.skip,
        is_aggregate: false,
    })
}

fn build_select_columns(
    ctx: &mut AliasContext,
    entity: &EntityDescription,
    alias: &str,
    options: &QueryOptions,
) -> Result<Vec<SelectColumn>, PlanError> {
    let mut names: Vec<String> = match &options.select {
        Some(sel) => sel.clone(),
        None => entity
            .properties
            .iter()
            .filter(|p| !p.is_excluded)
            .map(|p| p.logical_name.clone())
            .collect(),
    };

    // Invariant #4: key properties, and foreign keys needed by $expand,
    // are always included even when $select omits them.
    for key in entity.key_properties() {
        if !names.contains(&key.logical_name) {
            names.push(key.logical_name.clone());
        }
    }
    for expand in &options.expand {
        if let Some(nav) = entity.navigation(&expand.nav) {
            if nav.owns_foreign_key {
                if let Some(fk) = &nav.foreign_key {
                    if !names.contains(fk) {
                        names.push(fk.clone());
                    }
                }
            }
        }
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let prop = entity
            .property(&name)
            .ok_or_else(|| PlanError::UnknownProperty(name.clone()))?;
        columns.push(SelectColumn {
            sql: format!("{alias}.{}", prop.physical_name),
            output_name: prop.logical_name.clone(),
        });
    }
    Ok(columns)
}
