//! Compositional SELECT builder.
//!
//! Localised reads are assembled from joins and conditional expressions
//! rather than by rewriting generated SQL text. Parameters are collected in
//! the order their placeholders appear in the rendered statement.

use crate::record::FieldValue;

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"alias"."column"`.
pub fn column_ref(alias: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(alias), quote_ident(column))
}

/// Expression selecting the first non-empty localised value, falling back
/// to the canonical column.
///
/// With a single shadow alias this renders
/// `CASE WHEN s.F IS NOT NULL AND s.F != '' THEN s.F ELSE c.F END`; each
/// further alias adds one `WHEN` branch, tested in order.
pub fn localised_expr(shadow_aliases: &[String], canonical_alias: &str, field: &str) -> String {
    let canonical = column_ref(canonical_alias, field);
    if shadow_aliases.is_empty() {
        return canonical;
    }

    let branches: String = shadow_aliases
        .iter()
        .map(|alias| {
            let shadow = column_ref(alias, field);
            format!(
                "WHEN {shadow} IS NOT NULL AND {shadow} != '' THEN {shadow} ",
                shadow = shadow
            )
        })
        .collect();
    format!("CASE {}ELSE {} END", branches, canonical)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: String,
    on: String,
}

/// A SELECT statement under construction.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    table: String,
    alias: String,
    columns: Vec<String>,
    joins: Vec<Join>,
    conditions: Vec<String>,
    order_by: Vec<String>,
    join_params: Vec<FieldValue>,
    where_params: Vec<FieldValue>,
}

impl SelectQuery {
    pub fn from(table: &str, alias: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            join_params: Vec::new(),
            where_params: Vec::new(),
        }
    }

    /// Select an expression under an output name.
    pub fn column(&mut self, expr: String, output: &str) -> &mut Self {
        self.columns.push(format!("{} AS {}", expr, quote_ident(output)));
        self
    }

    /// Add a join; `params` bind the placeholders in `on`.
    pub fn join(
        &mut self,
        kind: JoinKind,
        table: &str,
        alias: &str,
        on: String,
        params: Vec<FieldValue>,
    ) -> &mut Self {
        self.joins.push(Join {
            kind,
            table: table.to_string(),
            alias: alias.to_string(),
            on,
        });
        self.join_params.extend(params);
        self
    }

    /// Add a condition, AND-ed with the others.
    pub fn filter(&mut self, condition: String, params: Vec<FieldValue>) -> &mut Self {
        self.conditions.push(condition);
        self.where_params.extend(params);
        self
    }

    pub fn order_by(&mut self, expr: String) -> &mut Self {
        self.order_by.push(expr);
        self
    }

    pub fn has_join(&self, alias: &str) -> bool {
        self.joins.iter().any(|j| j.alias == alias)
    }

    /// Render the statement.
    pub fn to_sql(&self) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!(
            "SELECT {} FROM {} AS {}",
            columns,
            quote_ident(&self.table),
            quote_ident(&self.alias)
        );
        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} AS {} ON {}",
                join.kind.keyword(),
                quote_ident(&join.table),
                quote_ident(&join.alias),
                join.on
            ));
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql
    }

    /// Parameters in placeholder order.
    pub fn params(&self) -> Vec<&FieldValue> {
        self.join_params.iter().chain(self.where_params.iter()).collect()
    }
}
