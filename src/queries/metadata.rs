use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};

use crate::schema::Metadata;

/// SELECT value FROM metadata WHERE key = ?
pub fn select_by_key(key: &str) -> String {
    Query::select()
        .column(Metadata::Value)
        .from(Metadata::Table)
        .and_where(Expr::col(Metadata::Key).eq(key))
        .to_string(SqliteQueryBuilder)
}

/// INSERT INTO metadata (key, value) VALUES (?, ?) ON CONFLICT (key) DO NOTHING
/// First writer wins, so re-running schema init keeps the original values
pub fn insert_if_absent(key: &str, value: &str) -> String {
    Query::insert()
        .into_table(Metadata::Table)
        .columns([Metadata::Key, Metadata::Value])
        .values_panic([key.into(), value.into()])
        .on_conflict(OnConflict::column(Metadata::Key).do_nothing().to_owned())
        .to_string(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_escaped() {
        let sql = insert_if_absent("name", "it's");
        assert!(sql.contains("'it''s'"));
    }
}
