mod connection;
mod record;
mod table;

pub use connection::{Connection, DocumentLocator, StoreLocator, Subscription};
pub use record::{Record, ID_FIELD};
pub use table::{cell_text, empty_cell, is_empty_cell, Cell, Table};
