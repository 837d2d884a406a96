//! File formats around the core: event logs in, feature tables in and out.

mod event_log;
mod table_file;

pub use event_log::{read_events, EventLog};
pub use table_file::{read_table, write_table, TableHeader, TABLE_FORMAT};
