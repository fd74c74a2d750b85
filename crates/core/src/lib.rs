#![forbid(unsafe_code)]

mod ident;
mod sql;

pub use ident::{Ident, escape, is_bare_identifier, is_reserved_word};
pub use sql::{
    Column, MAX_TRACKED_COLUMNS, TriggerSet, backfill_sql, delete_trigger_name,
    history_index_name, history_table_name, history_table_sql, insert_trigger_name,
    is_history_table_name, triggers_sql, update_trigger_name,
};
