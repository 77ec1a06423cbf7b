//! CLI Exit Code Registry
//!
//! Single source of truth for `dbfixture` exit codes. Test harnesses and
//! CI scripts branch on these, so treat them as a stable contract.
//!
//! | Code | Meaning                                         |
//! |------|-------------------------------------------------|
//! | 0    | Success (verify: live tables match the dataset) |
//! | 1    | verify found a difference                       |
//! | 2    | Usage error (bad arguments)                     |
//! | 3    | A dataset, script, config or LOB file unreadable|
//! | 4    | Malformed dataset document or schema script     |
//! | 5    | SQL execution or schema introspection failed    |
//! | 6    | Configuration error (settings, connection name) |

use dbfixture_engine::FixtureError;

/// Success - command completed, and verify found no difference.
pub const EXIT_SUCCESS: u8 = 0;

/// verify found a difference between the dataset and the live tables.
/// Like `diff(1)`, exit 1 means "they differ."
pub const EXIT_DIFFERENCE: u8 = 1;

/// Usage error - bad arguments, missing required options.
/// `main` maps every clap parse failure to this code.
pub const EXIT_USAGE: u8 = 2;

pub const EXIT_IO: u8 = 3;

pub const EXIT_DATASET: u8 = 4;

/// Includes schema introspection failures (unknown table, bad pragma).
pub const EXIT_SQL: u8 = 5;

pub const EXIT_CONFIG: u8 = 6;

/// Map an engine/IO error to its exit code.
pub fn fixture_exit_code(err: &FixtureError) -> u8 {
    match err {
        FixtureError::Configuration(_) => EXIT_CONFIG,
        FixtureError::Io { .. } => EXIT_IO,
        FixtureError::Dataset(_) => EXIT_DATASET,
        FixtureError::Sql(_) | FixtureError::SchemaIntrospection(_) => EXIT_SQL,
    }
}
