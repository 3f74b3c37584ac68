//! Parameterized SELECT composition over the collection schema.
//!
//! A query is built as a typed value first and lowered to SQL at the
//! execution boundary. Field and table names come from the schema constants
//! in [`super::schema`]; filter values are always bound parameters and are
//! never formatted into the query text.

use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    fn as_sql(&self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

/// A flat list of `field = value` terms combined by one conjunction.
#[derive(Debug, Clone)]
pub struct Filter {
    conjunction: Conjunction,
    terms: Vec<(String, Value)>,
}

impl Filter {
    pub fn all_of() -> Self {
        Filter {
            conjunction: Conjunction::And,
            terms: Vec::new(),
        }
    }

    pub fn any_of() -> Self {
        Filter {
            conjunction: Conjunction::Or,
            terms: Vec::new(),
        }
    }

    /// Add an equality term. `field` must be a schema constant, optionally
    /// table-qualified.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// An inner join against `table`, on column-equality conditions.
#[derive(Debug, Clone)]
pub struct Join {
    table: &'static str,
    on: Vec<(String, String)>,
}

impl Join {
    pub fn inner(table: &'static str) -> Self {
        Join {
            table,
            on: Vec::new(),
        }
    }

    pub fn on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.on.push((left.into(), right.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderTerm {
    pub field: String,
    pub direction: Direction,
}

impl OrderTerm {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderTerm {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderTerm {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Projection {
    All,
    Fields(Vec<String>),
}

/// A single parameterized SELECT over one table, with optional filter,
/// inner joins and ordering.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    table: &'static str,
    projection: Projection,
    filter: Option<Filter>,
    joins: Vec<Join>,
    order_by: Vec<OrderTerm>,
    limit: Option<usize>,
}

impl SelectQuery {
    pub fn from(table: &'static str) -> Self {
        SelectQuery {
            table,
            projection: Projection::All,
            filter: None,
            joins: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Projection::Fields(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        if !filter.is_empty() {
            self.filter = Some(filter);
        }
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn order_by(mut self, term: OrderTerm) -> Self {
        self.order_by.push(term);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Lower to an SQL string plus its bound parameter values.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let fields = match &self.projection {
            Projection::All => "*".to_string(),
            Projection::Fields(fields) => fields.join(", "),
        };

        let mut sql = format!("SELECT {} FROM {}", fields, self.table);

        for join in &self.joins {
            sql.push_str(&format!(" INNER JOIN {} ON ", join.table));
            for (index, (left, right)) in join.on.iter().enumerate() {
                if index > 0 {
                    sql.push_str(" AND ");
                }
                sql.push_str(&format!("{} = {}", left, right));
            }
        }

        let mut params = Vec::new();
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            for (index, (field, value)) in filter.terms.iter().enumerate() {
                if index > 0 {
                    sql.push(' ');
                    sql.push_str(filter.conjunction.as_sql());
                    sql.push(' ');
                }
                sql.push_str(&format!("{} = ?", field));
                params.push(value.clone());
            }
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            for (index, term) in self.order_by.iter().enumerate() {
                if index > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&term.field);
                if term.direction == Direction::Desc {
                    sql.push_str(" DESC");
                }
            }
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection_db::schema::*;

    #[test]
    fn plain_select_all() {
        let (sql, params) = SelectQuery::from(TABLE_ARTISTS).to_sql();
        assert_eq!(sql, "SELECT * FROM artists");
        assert!(params.is_empty());
    }

    #[test]
    fn projection_filter_and_order() {
        let (sql, params) = SelectQuery::from(TABLE_ARTISTS)
            .fields([ARTISTS_NAME, ARTISTS_LAST_MODIFIED])
            .filter(
                Filter::all_of()
                    .eq("artists.name", "Queen".to_string())
                    .eq("artists.disambiguation", String::new()),
            )
            .order_by(OrderTerm::desc("artists.last_modified"))
            .to_sql();

        assert_eq!(
            sql,
            "SELECT name, last_modified FROM artists \
             WHERE artists.name = ? AND artists.disambiguation = ? \
             ORDER BY last_modified DESC"
        );
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Value::Text("Queen".into()));
    }

    #[test]
    fn or_filter_binds_every_value() {
        let (sql, params) = SelectQuery::from(TABLE_TRACKS)
            .filter(
                Filter::any_of()
                    .eq("tracks.id", 3i64)
                    .eq("tracks.id", 7i64)
                    .eq("tracks.id", 11i64),
            )
            .to_sql();

        assert_eq!(
            sql,
            "SELECT * FROM tracks WHERE tracks.id = ? OR tracks.id = ? OR tracks.id = ?"
        );
        assert_eq!(
            params,
            vec![Value::Integer(3), Value::Integer(7), Value::Integer(11)]
        );
    }

    #[test]
    fn inner_joins_compose_in_order() {
        let (sql, _) = SelectQuery::from(TABLE_TRACKS)
            .fields(["artists.name", "tracks.title"])
            .join(Join::inner(TABLE_ARTISTS).on("tracks.artist_id", "artists.id"))
            .join(Join::inner(TABLE_ALBUMS).on("tracks.album_id", "albums.id"))
            .to_sql();

        assert_eq!(
            sql,
            "SELECT artists.name, tracks.title FROM tracks \
             INNER JOIN artists ON tracks.artist_id = artists.id \
             INNER JOIN albums ON tracks.album_id = albums.id"
        );
    }

    #[test]
    fn empty_filter_emits_no_where_clause() {
        let (sql, params) = SelectQuery::from(TABLE_ALBUMS)
            .filter(Filter::all_of())
            .to_sql();
        assert_eq!(sql, "SELECT * FROM albums");
        assert!(params.is_empty());
    }

    #[test]
    fn limit_is_appended_last() {
        let (sql, _) = SelectQuery::from(TABLE_TRACKS)
            .fields([TRACKS_LAST_MODIFIED])
            .order_by(OrderTerm::desc(TRACKS_LAST_MODIFIED))
            .limit(1)
            .to_sql();
        assert_eq!(
            sql,
            "SELECT last_modified FROM tracks ORDER BY last_modified DESC LIMIT 1"
        );
    }
}
