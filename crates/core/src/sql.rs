#![forbid(unsafe_code)]

use crate::ident::Ident;

/// One source-table column, in catalog order. Catalog order is load-bearing:
/// bit `i` of the change mask belongs to column `i`, and every generated
/// statement lists values in this order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub decl_type: String,
}

/// The three trigger definitions for one tracked table.
#[derive(Clone, Debug)]
pub struct TriggerSet {
    pub insert: String,
    pub update: String,
    pub delete: String,
}

/// Current wall clock in milliseconds since the Unix epoch, evaluated by
/// SQLite at trigger-fire time.
const NOW_MS_EXPR: &str = "cast((julianday('now') - 2440587.5) * 86400 * 1000 as integer)";

pub fn history_table_name(table: &str) -> String {
    format!("_{table}_history")
}

pub fn history_index_name(table: &str) -> String {
    format!("idx_{table}_history_rowid")
}

pub fn insert_trigger_name(table: &str) -> String {
    format!("{table}_insert_history")
}

pub fn update_trigger_name(table: &str) -> String {
    format!("{table}_update_history")
}

pub fn delete_trigger_name(table: &str) -> String {
    format!("{table}_delete_history")
}

/// True for names shaped like this tool's own history tables. Such tables
/// are never tracked themselves.
pub fn is_history_table_name(name: &str) -> bool {
    name.starts_with('_') && name.ends_with("_history")
}

/// Masks are stored in a signed 64-bit SQLite integer; bit 63 is the sign
/// bit and `-1` is the delete sentinel, so at most 62 columns can carry mask
/// bits. Callers must reject wider tables before generating any statements.
pub const MAX_TRACKED_COLUMNS: usize = 62;

/// Bitmask with one bit set per column. `-1` is reserved for deletions, so
/// every legitimate mask lives in `[0, 2^n - 1]`.
fn full_mask(column_count: usize) -> i64 {
    (1i64 << column_count) - 1
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|column| Ident(&column.name).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn prefixed_column_list(prefix: &str, columns: &[Column]) -> String {
    columns
        .iter()
        .map(|column| format!("{prefix}.{}", Ident(&column.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// DDL for the history table and its `_rowid` index. Declared types carry
/// over verbatim; constraints do not, since history rows must accept any
/// value shape the triggers produce, nulls and duplicates included.
pub fn history_table_sql(table: &str, columns: &[Column]) -> String {
    let column_defs = columns
        .iter()
        .map(|column| {
            format!("    {} {}", Ident(&column.name), column.decl_type)
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(",\n");
    let history = history_table_name(table);
    format!(
        "CREATE TABLE {history} (\n    \
             _rowid INTEGER,\n\
         {column_defs},\n    \
             _version INTEGER,\n    \
             _updated INTEGER,\n    \
             _mask INTEGER\n\
         );\n\
         CREATE INDEX {index} ON {history} (_rowid);\n",
        history = Ident(&history),
        index = Ident(&history_index_name(table)),
        column_defs = column_defs,
    )
}

/// The insert/update/delete trigger bodies implementing versioning and
/// column-change masking.
///
/// Versions are assigned by subqueries over the history table at fire time;
/// serialization of concurrent writers is left to SQLite's own transactional
/// trigger semantics. An insert always writes version 1, which assumes a
/// rowid is not reused after delete (a reused rowid would collide with the
/// delete trigger's max+1 numbering).
pub fn triggers_sql(table: &str, columns: &[Column]) -> TriggerSet {
    let source = Ident(table).to_string();
    let history_name = history_table_name(table);
    let history = Ident(&history_name).to_string();
    let names = column_list(columns);
    let mask = full_mask(columns.len());

    let insert = format!(
        "CREATE TRIGGER {trigger}\n\
         AFTER INSERT ON {source}\n\
         BEGIN\n    \
             INSERT INTO {history} (_rowid, {names}, _version, _updated, _mask)\n    \
             VALUES (new.rowid, {new_values}, 1, {NOW_MS_EXPR}, {mask});\n\
         END;\n",
        trigger = Ident(&insert_trigger_name(table)),
        new_values = prefixed_column_list("new", columns),
    );

    // Unchanged columns store null; the mask says which columns are real.
    let changed_values = columns
        .iter()
        .map(|column| {
            let name = Ident(&column.name);
            format!(
                "\n        CASE WHEN old.{name} IS NOT new.{name} THEN new.{name} ELSE NULL END"
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    let mask_expr = columns
        .iter()
        .enumerate()
        .map(|(bit, column)| {
            let name = Ident(&column.name);
            format!(
                "(CASE WHEN old.{name} IS NOT new.{name} THEN {} ELSE 0 END)",
                1i64 << bit
            )
        })
        .collect::<Vec<_>>()
        .join(" + ");
    // IS NOT treats null-to-null as unchanged and null-to-value as changed;
    // the guard keeps no-op updates from burning a version number.
    let guard = columns
        .iter()
        .map(|column| {
            let name = Ident(&column.name);
            format!("old.{name} IS NOT new.{name}")
        })
        .collect::<Vec<_>>()
        .join(" OR ");

    let update = format!(
        "CREATE TRIGGER {trigger}\n\
         AFTER UPDATE ON {source}\n\
         FOR EACH ROW\n\
         BEGIN\n    \
             INSERT INTO {history} (_rowid, {names}, _version, _updated, _mask)\n    \
             SELECT old.rowid,{changed_values},\n        \
                 (SELECT MAX(_version) FROM {history} WHERE _rowid = old.rowid) + 1,\n        \
                 {NOW_MS_EXPR},\n        \
                 {mask_expr}\n    \
             WHERE {guard};\n\
         END;\n",
        trigger = Ident(&update_trigger_name(table)),
    );

    let delete = format!(
        "CREATE TRIGGER {trigger}\n\
         AFTER DELETE ON {source}\n\
         BEGIN\n    \
             INSERT INTO {history} (_rowid, {names}, _version, _updated, _mask)\n    \
             VALUES (\n        \
                 old.rowid,\n        \
                 {old_values},\n        \
                 (SELECT COALESCE(MAX(_version), 0) FROM {history} \
                 WHERE _rowid = old.rowid) + 1,\n        \
                 {NOW_MS_EXPR},\n        \
                 -1\n    \
             );\n\
         END;\n",
        trigger = Ident(&delete_trigger_name(table)),
        old_values = prefixed_column_list("old", columns),
    );

    TriggerSet {
        insert,
        update,
        delete,
    }
}

/// One-time INSERT-SELECT seeding version-1 history for rows that existed
/// before tracking began. Shape-identical to the insert trigger's output, so
/// readers need no special case for pre-tracking rows.
pub fn backfill_sql(table: &str, columns: &[Column]) -> String {
    let names = column_list(columns);
    format!(
        "INSERT INTO {history} (_rowid, {names}, _version, _updated, _mask)\n\
         SELECT rowid, {names}, 1, {NOW_MS_EXPR}, {mask}\n\
         FROM {source};\n",
        history = Ident(&history_table_name(table)),
        source = Ident(table),
        mask = full_mask(columns.len()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, decl_type: &str) -> Column {
        Column {
            name: name.to_string(),
            decl_type: decl_type.to_string(),
        }
    }

    fn id_name() -> Vec<Column> {
        vec![column("id", "INTEGER"), column("name", "TEXT")]
    }

    #[test]
    fn derived_names() {
        assert_eq!(history_table_name("orders"), "_orders_history");
        assert_eq!(history_index_name("orders"), "idx_orders_history_rowid");
        assert_eq!(insert_trigger_name("orders"), "orders_insert_history");
        assert!(is_history_table_name("_orders_history"));
        assert!(!is_history_table_name("orders"));
        assert!(!is_history_table_name("_orders"));
    }

    #[test]
    fn history_table_mirrors_columns_and_adds_bookkeeping() {
        let sql = history_table_sql("test", &id_name());
        assert_eq!(
            sql,
            "CREATE TABLE _test_history (\n\
             \x20   _rowid INTEGER,\n\
             \x20   id INTEGER,\n\
             \x20   name TEXT,\n\
             \x20   _version INTEGER,\n\
             \x20   _updated INTEGER,\n\
             \x20   _mask INTEGER\n\
             );\n\
             CREATE INDEX idx_test_history_rowid ON _test_history (_rowid);\n"
        );
    }

    #[test]
    fn untyped_columns_do_not_leave_trailing_space() {
        let sql = history_table_sql("t", &[column("c", "")]);
        assert!(sql.contains("    c,\n"), "{sql}");
    }

    #[test]
    fn insert_trigger_writes_version_one_with_full_mask() {
        let triggers = triggers_sql("test", &id_name());
        assert_eq!(
            triggers.insert,
            "CREATE TRIGGER test_insert_history\n\
             AFTER INSERT ON test\n\
             BEGIN\n\
             \x20   INSERT INTO _test_history (_rowid, id, name, _version, _updated, _mask)\n\
             \x20   VALUES (new.rowid, new.id, new.name, 1, \
             cast((julianday('now') - 2440587.5) * 86400 * 1000 as integer), 3);\n\
             END;\n"
        );
    }

    #[test]
    fn update_trigger_masks_and_guards_per_column() {
        let triggers = triggers_sql("test", &id_name());
        let update = &triggers.update;
        assert!(update.contains("CASE WHEN old.id IS NOT new.id THEN new.id ELSE NULL END"));
        assert!(update.contains("(CASE WHEN old.id IS NOT new.id THEN 1 ELSE 0 END)"));
        assert!(update.contains("(CASE WHEN old.name IS NOT new.name THEN 2 ELSE 0 END)"));
        assert!(update.contains("WHERE old.id IS NOT new.id OR old.name IS NOT new.name;"));
        assert!(
            update
                .contains("(SELECT MAX(_version) FROM _test_history WHERE _rowid = old.rowid) + 1")
        );
    }

    #[test]
    fn delete_trigger_uses_sentinel_mask_and_coalesced_version() {
        let triggers = triggers_sql("test", &id_name());
        let delete = &triggers.delete;
        assert!(delete.contains("AFTER DELETE ON test"));
        assert!(delete.contains(
            "(SELECT COALESCE(MAX(_version), 0) FROM _test_history WHERE _rowid = old.rowid) + 1"
        ));
        assert!(delete.contains("\n        -1\n"));
    }

    #[test]
    fn backfill_matches_insert_shape() {
        let sql = backfill_sql("test", &id_name());
        assert_eq!(
            sql,
            "INSERT INTO _test_history (_rowid, id, name, _version, _updated, _mask)\n\
             SELECT rowid, id, name, 1, \
             cast((julianday('now') - 2440587.5) * 86400 * 1000 as integer), 3\n\
             FROM test;\n"
        );
    }

    #[test]
    fn reserved_and_spaced_names_are_quoted_everywhere() {
        let columns = vec![column("select", "TEXT"), column("has space", "TEXT")];
        let triggers = triggers_sql("order", &columns);
        assert!(triggers.insert.contains("AFTER INSERT ON \"order\""));
        assert!(
            triggers
                .insert
                .contains("INSERT INTO _order_history (_rowid, \"select\", \"has space\",")
        );
        assert!(triggers.insert.contains("new.\"select\", new.\"has space\""));
        assert!(
            triggers
                .update
                .contains("old.\"has space\" IS NOT new.\"has space\"")
        );
        assert!(triggers.delete.contains("old.\"select\""));
        let ddl = history_table_sql("order", &columns);
        assert!(ddl.contains("    \"select\" TEXT,\n"));
    }

    #[test]
    fn mask_grows_with_column_count() {
        let columns = (0..4)
            .map(|i| column(&format!("c{i}"), "TEXT"))
            .collect::<Vec<_>>();
        let sql = backfill_sql("t", &columns);
        assert!(sql.contains(", 15\nFROM t;"));
    }

    #[test]
    fn mask_fills_at_the_column_limit() {
        let columns = (0..MAX_TRACKED_COLUMNS)
            .map(|i| column(&format!("c{i}"), "TEXT"))
            .collect::<Vec<_>>();
        let sql = backfill_sql("t", &columns);
        let full = (1i64 << MAX_TRACKED_COLUMNS) - 1;
        assert!(sql.contains(&format!(", {full}\nFROM t;")), "{sql}");
    }
}
