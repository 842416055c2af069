//! Backend query templates and their rendering.
//!
//! Each backend configures SQL strings under well-known names. Templates use
//! `{tag}`, `{date}`, `{from}`, `{to}` (values) and `{group}` (structural)
//! placeholders. Structural placeholders are always substituted literally.
//! Value placeholders are bound as statement parameters when the backend's
//! placeholder style allows it; in literal mode they are substituted with
//! single quotes doubled. Tag and date inputs are expected to be validated
//! by the caller either way.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, StoreError};

/// Names of the query templates the store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryName {
    GetTagDate,
    GetTagFromTo,
    GetTagFromToGroup,
    GetTagFromToGroupDif,
    GetTagFromToGroupCount,
    GetTagList,
    GetDownDates,
    GetUpDates,
    Status,
}

impl QueryName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryName::GetTagDate => "get_tag_date",
            QueryName::GetTagFromTo => "get_tag_from_to",
            QueryName::GetTagFromToGroup => "get_tag_from_to_group",
            QueryName::GetTagFromToGroupDif => "get_tag_from_to_group_dif",
            QueryName::GetTagFromToGroupCount => "get_tag_from_to_group_count",
            QueryName::GetTagList => "get_tag_list",
            QueryName::GetDownDates => "get_down_dates",
            QueryName::GetUpDates => "get_up_dates",
            QueryName::Status => "status",
        }
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How value placeholders reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placeholder {
    /// Substituted into the SQL text
    #[default]
    Literal,
    /// Bound as `?` parameters
    Question,
    /// Bound as `$1`, `$2`, ... parameters
    Dollar,
}

/// Placeholder values for one rendering.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    values: Vec<(&'static str, String)>,
    structural: Vec<(&'static str, String)>,
}

impl QueryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value placeholder (`tag`, `date`, `from`, `to`).
    pub fn value(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.push((name, value.into()));
        self
    }

    /// Adds a structural placeholder (`group`), never bound.
    pub fn structural(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.structural.push((name, value.into()));
        self
    }

    fn lookup_value(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    fn lookup_structural(&self, name: &str) -> Option<&str> {
        self.structural
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// SQL text plus ordered bind parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<String>,
}

impl RenderedQuery {
    /// A statement with no bind parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Looks up and renders the templates of one backend.
#[derive(Debug, Clone)]
pub struct QueryRegistry {
    templates: HashMap<String, String>,
    placeholder: Placeholder,
}

impl QueryRegistry {
    pub fn new(templates: HashMap<String, String>, placeholder: Placeholder) -> Self {
        Self {
            templates,
            placeholder,
        }
    }

    pub fn placeholder(&self) -> Placeholder {
        self.placeholder
    }

    pub fn template(&self, name: QueryName) -> Result<&str> {
        self.templates
            .get(name.as_str())
            .map(String::as_str)
            .filter(|sql| !sql.trim().is_empty())
            .ok_or_else(|| StoreError::QueryNotConfigured(name.to_string()))
    }

    pub fn render(&self, name: QueryName, args: &QueryArgs) -> Result<RenderedQuery> {
        Ok(render(self.template(name)?, args, self.placeholder))
    }
}

/// Renders `template` by scanning placeholders left to right.
pub fn render(template: &str, args: &QueryArgs, style: Placeholder) -> RenderedQuery {
    let mut sql = String::with_capacity(template.len());
    let mut params = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|i| open + i) else {
            break;
        };
        let name = &rest[open + 1..close];
        sql.push_str(&rest[..open]);
        rest = &rest[close + 1..];

        if let Some(value) = args.lookup_structural(name) {
            sql.push_str(value);
        } else if let Some(value) = args.lookup_value(name) {
            match style {
                Placeholder::Literal => sql.push_str(&value.replace('\'', "''")),
                Placeholder::Question | Placeholder::Dollar => {
                    // A quoted placeholder binds as one parameter without its quotes.
                    if sql.ends_with('\'') && rest.starts_with('\'') {
                        sql.pop();
                        rest = &rest[1..];
                    }
                    params.push(value.to_string());
                    if style == Placeholder::Question {
                        sql.push('?');
                    } else {
                        sql.push_str(&format!("${}", params.len()));
                    }
                }
            }
        } else {
            sql.push('{');
            sql.push_str(name);
            sql.push('}');
        }
    }
    sql.push_str(rest);

    RenderedQuery { sql, params }
}

/// Substitutes `{key}` with `params[key]` verbatim, for operator templates.
pub fn fill_params(body: &str, params: &HashMap<String, String>) -> String {
    params.iter().fold(body.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// Translates a user search mask into a SQL LIKE pattern.
pub fn like_pattern(mask: &str) -> String {
    if mask.is_empty() {
        return "%".to_string();
    }
    mask.replace('*', "%").replace('?', "_").replace(' ', "%")
}
