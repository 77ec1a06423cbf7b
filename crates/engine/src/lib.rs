//! `dbfixture-engine`: dataset reconciliation engine.
//!
//! Pure engine crate: loads declarative datasets into live tables and
//! compares live tables against expected datasets. All database access goes
//! through the injected [`Connection`] capability; no driver dependencies.

pub mod apply;
pub mod codec;
pub mod compare;
pub mod connection;
pub mod difference;
pub mod engine;
pub mod error;
pub mod keys;
pub mod model;
pub mod planner;
pub mod snapshot;
pub mod sql;

pub use connection::{Connection, ConnectionFactory, ScopedConnection};
pub use difference::Difference;
pub use engine::ReconciliationEngine;
pub use error::{FixtureError, FixtureResult};
pub use model::{
    Dataset, DatasetProperties, DatasetSource, LoadStrategy, LobRef, LobSource, Predicate, Row,
    RowSpec, SqlValue, Value,
};
