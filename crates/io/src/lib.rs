// Dataset files, schema scripts and the SQLite connection

pub mod schema;
pub mod sqlite;
pub mod xml;

pub use schema::{populate, read_script, reset_schema, split_schema, ObjectLabel, SchemaStatement};
pub use sqlite::{SqliteConnection, SqliteConnector};
pub use xml::DatasetParser;
