//! Dynamic query language
//!
//! SQL over mapped tables with `:name` placeholders, plus the short form
//! `from <table> [as] <alias> ...` which selects every column of the alias.
//! Collection parameters expand to one placeholder per element. All
//! validation happens here, before the engine sees the query.

use super::params::{distinct_names, is_identifier, rewrite, scan_placeholders};
use super::{DynamicQuery, ListParams, Params};
use crate::engine::PreparedQuery;
use crate::errors::QueryError;
use crate::model::{EntityMapping, Properties, Value};
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Alias a query must give its primary table to be locked
pub const LOCK_ALIAS: &str = "foo";

const CLAUSE_WORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "natural", "outer", "on",
    "order", "group", "having", "limit", "union", "except", "intersect",
];

fn short_form_regex() -> &'static Regex {
    static SHORT_FORM: OnceLock<Regex> = OnceLock::new();
    SHORT_FORM.get_or_init(|| {
        Regex::new(r"(?is)^\s*from\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s+(?:as\s+)?([A-Za-z_][A-Za-z0-9_]*))?")
            .expect("short form regex compiles")
    })
}

fn lock_alias_regex() -> &'static Regex {
    static LOCK_ALIAS_RE: OnceLock<Regex> = OnceLock::new();
    LOCK_ALIAS_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)\s+(?:as\s+)?foo\b")
            .expect("lock alias regex compiles")
    })
}

/// Expand the `from <table> [as] <alias>` short form into a SELECT
fn expand_short_form(text: &str) -> Cow<'_, str> {
    let Some(caps) = short_form_regex().captures(text) else {
        return Cow::Borrowed(text);
    };
    let target = match caps.get(2) {
        Some(alias) if !CLAUSE_WORDS.contains(&alias.as_str().to_ascii_lowercase().as_str()) => {
            alias.as_str()
        }
        _ => &caps[1],
    };
    Cow::Owned(format!("SELECT {}.* {}", target, text.trim_start()))
}

/// Table aliased as [`LOCK_ALIAS`] in `text`
///
/// # Errors
///
/// Returns `QueryError::MissingLockAlias` if no table carries the alias.
pub fn lock_target(text: &str) -> Result<String, QueryError> {
    lock_alias_regex()
        .captures(text)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| QueryError::MissingLockAlias {
            alias: LOCK_ALIAS.to_string(),
        })
}

/// Validate bindings against placeholders and expand collections
fn bind(sql: &str, scalars: &Params, lists: &ListParams) -> Result<PreparedQuery, QueryError> {
    let placeholders = scan_placeholders(sql);
    let names = distinct_names(&placeholders);

    for name in &names {
        match (scalars.get(*name), lists.get(*name)) {
            (Some(_), Some(_)) => {
                return Err(QueryError::InvalidParameterType {
                    name: name.to_string(),
                    reason: "bound both as a value and as a collection".to_string(),
                })
            }
            (None, None) => {
                return Err(QueryError::MissingParameter {
                    name: name.to_string(),
                })
            }
            (None, Some(list)) if list.is_empty() => {
                return Err(QueryError::InvalidParameterType {
                    name: name.to_string(),
                    reason: "empty collection".to_string(),
                })
            }
            _ => {}
        }
    }
    if let Some(extra) = scalars
        .keys()
        .chain(lists.keys())
        .find(|k| !names.contains(&k.as_str()))
    {
        return Err(QueryError::UnknownParameter {
            name: extra.clone(),
        });
    }

    let expanded = rewrite(sql, &placeholders, |p| {
        lists.get(&p.name).map(|list| {
            (0..list.len())
                .map(|i| format!(":{}__{}", p.name, i))
                .collect::<Vec<_>>()
                .join(", ")
        })
    });

    let mut params = Vec::new();
    for name in names {
        if let Some(value) = scalars.get(name) {
            params.push((name.to_string(), value.clone()));
        } else if let Some(list) = lists.get(name) {
            for (i, value) in list.iter().enumerate() {
                params.push((format!("{}__{}", name, i), value.clone()));
            }
        }
    }

    Ok(PreparedQuery {
        sql: expanded,
        params,
        page: None,
    })
}

/// Translate a dynamic query into engine form
///
/// # Errors
///
/// Returns a `QueryError` for missing, unknown or mistyped parameters.
pub fn prepare_dynamic(query: &DynamicQuery) -> Result<PreparedQuery, QueryError> {
    let text = expand_short_form(query.text());
    let mut prepared = bind(&text, query.scalar_params(), query.list_param_map())?;
    prepared.page = query.page_bounds();
    Ok(prepared)
}

/// Validate a statement's parameters without rewriting its text
///
/// # Errors
///
/// Returns a `QueryError` for missing or unknown parameters.
pub fn prepare_native(sql: &str, params: &Params) -> Result<PreparedQuery, QueryError> {
    bind(sql, params, &ListParams::new())
}

/// Conjunctive equality filter over `properties`
///
/// An empty map selects every instance of the entity.
///
/// # Errors
///
/// Returns `QueryError::InvalidProperty` for a name that is not a mapped
/// column of the entity.
pub fn property_query(
    mapping: &'static EntityMapping,
    properties: &Properties,
) -> Result<DynamicQuery, QueryError> {
    let mut text = format!("from {} as {}", mapping.table, LOCK_ALIAS);
    let mut clauses = Vec::with_capacity(properties.len());
    let mut params = Params::new();
    for (name, value) in properties {
        if !is_identifier(name) || !mapping.has_column(name) {
            return Err(QueryError::InvalidProperty {
                entity: mapping.entity.to_string(),
                property: name.clone(),
            });
        }
        if let Value::Null = value {
            clauses.push(format!("{}.{} IS NULL", LOCK_ALIAS, name));
        } else {
            clauses.push(format!("{}.{} = :{}", LOCK_ALIAS, name, name));
            params.insert(name.clone(), value.clone());
        }
    }
    if !clauses.is_empty() {
        text.push_str(" where ");
        text.push_str(&clauses.join(" and "));
    }
    Ok(DynamicQuery::new(text).params(params))
}
