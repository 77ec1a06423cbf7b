use std::path::{Path, PathBuf};

use dbfixture_engine::apply::{merge, MergeOutcome};
use dbfixture_engine::compare::count_rows;
use dbfixture_engine::keys::PrimaryKeyCache;
use dbfixture_engine::{
    Connection, Dataset, DatasetSource, Difference, LoadStrategy, LobRef, ReconciliationEngine,
    RowSpec, SqlValue, Value,
};
use dbfixture_io::{populate, read_script, reset_schema, DatasetParser, SqliteConnector};
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn dataset(name: &str) -> DatasetSource {
    DatasetParser::new()
        .parse_file(&fixtures_dir().join(name))
        .unwrap_or_else(|e| panic!("cannot parse {name}: {e}"))
}

/// Fresh database with the fixture schema applied.
fn setup() -> (TempDir, ReconciliationEngine<SqliteConnector>) {
    let dir = tempfile::tempdir().unwrap();
    let connector = SqliteConnector::new(dir.path().join("fixture.db"));
    let engine = ReconciliationEngine::new(connector, "test").unwrap();

    let script = read_script(&fixtures_dir().join("schema.sql")).unwrap();
    engine
        .with_connection(|conn| reset_schema(conn, &script))
        .unwrap();
    (dir, engine)
}

fn exec(engine: &ReconciliationEngine<SqliteConnector>, sql: &str, params: &[SqlValue]) {
    engine.with_connection(|conn| conn.execute(sql, params)).unwrap();
}

fn count(engine: &ReconciliationEngine<SqliteConnector>, table: &str) -> u64 {
    engine.with_connection(|conn| count_rows(conn, table)).unwrap()
}

fn loaded() -> (TempDir, ReconciliationEngine<SqliteConnector>) {
    let (dir, mut engine) = setup();
    engine.load_source(&dataset("staff.xml")).unwrap();
    (dir, engine)
}

// -------------------------------------------------------------------------
// INSERT strategy
// -------------------------------------------------------------------------

#[test]
fn loaded_dataset_verifies_clean() {
    let (_dir, mut engine) = loaded();
    assert_eq!(count(&engine, "emp"), 2);
    assert_eq!(count(&engine, "bonus"), 2);
    // schema trigger fired once per inserted employee
    assert_eq!(count(&engine, "audit"), 2);

    let diff = engine.verify_source(&dataset("staff.xml")).unwrap();
    assert!(diff.is_none(), "unexpected difference: {}", diff.unwrap());
}

#[test]
fn loading_twice_replaces_rows() {
    let (_dir, mut engine) = loaded();
    engine.load_source(&dataset("staff.xml")).unwrap();
    assert_eq!(count(&engine, "emp"), 2);
    assert!(engine.verify_source(&dataset("staff.xml")).unwrap().is_none());
}

#[test]
fn extra_live_row_reports_row_count() {
    let (_dir, mut engine) = loaded();
    exec(&engine, "INSERT INTO emp (id, name, salary) VALUES (3, 'Carol', 90)", &[]);

    let diff = engine.verify_source(&dataset("staff.xml")).unwrap().unwrap();
    assert_eq!(
        diff.to_string(),
        "found difference in number of the emp rows - has 3 rows, should have 2"
    );
}

#[test]
fn deleted_row_reports_missing_entry() {
    let (_dir, mut engine) = loaded();
    exec(&engine, "DELETE FROM emp WHERE id = 2", &[]);

    let diff = engine.verify_source(&dataset("staff.xml")).unwrap().unwrap();
    match &diff {
        Difference::MissingEntry { table, expected_row } => {
            assert_eq!(table, "emp");
            assert!(expected_row.contains("Bob & Co"), "{expected_row}");
        }
        other => panic!("expected missing entry, got {other:?}"),
    }
    assert!(diff.to_string().starts_with("found difference in emp - missing entry: \n"));
}

#[test]
fn changed_field_is_reported_with_both_rows() {
    let (_dir, mut engine) = loaded();
    exec(&engine, "UPDATE emp SET salary = 101 WHERE id = 1", &[]);

    let diff = engine.verify_source(&dataset("staff.xml")).unwrap().unwrap();
    assert_eq!(diff.table(), "emp");
    assert_eq!(diff.column(), Some("salary"));
    let text = diff.to_string();
    assert!(text.starts_with("found difference in emp salary:\n"), "{text}");
    assert!(text.contains("salary: '100'"), "{text}");
    assert!(text.contains("salary: 101"), "{text}");
}

#[test]
fn rows_without_key_match_in_any_order() {
    let (_dir, mut engine) = loaded();
    assert!(engine.verify_source(&dataset("bonus_reordered.xml")).unwrap().is_none());

    exec(&engine, "UPDATE bonus SET amount = 25 WHERE amount = 20", &[]);
    let diff = engine.verify_source(&dataset("bonus_reordered.xml")).unwrap().unwrap();
    assert!(matches!(diff, Difference::MissingEntry { ref table, .. } if table == "bonus"));
}

#[test]
fn predicates_check_live_values() {
    let (_dir, mut engine) = loaded();
    let expected = Dataset::new()
        .with_row(
            "emp",
            RowSpec::new()
                .with("id", 1)
                .with("salary", Value::predicate(|v| matches!(v, SqlValue::Integer(n) if *n > 50))),
        )
        .with_row(
            "emp",
            RowSpec::new()
                .with("id", 2)
                .with("salary", Value::predicate(|v| matches!(v, SqlValue::Integer(n) if *n > 50))),
        );
    assert!(engine.verify(&expected).unwrap().is_none());

    let strict = Dataset::new().with_row(
        "emp",
        RowSpec::new()
            .with("id", 2)
            .with("salary", Value::predicate(|v| matches!(v, SqlValue::Integer(n) if *n > 90))),
    );
    let diff = engine.verify(&strict).unwrap().unwrap();
    assert!(matches!(diff, Difference::Predicate { ref column, .. } if column == "salary"));
}

#[test]
fn delete_marker_expects_empty_table() {
    let (_dir, mut engine) = loaded();
    let expected = Dataset::new().with_delete_marker("ticket");
    assert!(engine.verify(&expected).unwrap().is_none());

    exec(&engine, "INSERT INTO ticket (title) VALUES ('late')", &[]);
    let diff = engine.verify(&expected).unwrap().unwrap();
    assert_eq!(
        diff.to_string(),
        "found difference in number of the ticket rows - has 1 rows, should have 0"
    );
}

// -------------------------------------------------------------------------
// Large objects
// -------------------------------------------------------------------------

#[test]
fn lob_content_is_written_and_verified() {
    let (_dir, engine) = loaded();
    let expected = std::fs::read(fixtures_dir().join("body.txt")).unwrap();

    let live = engine
        .with_connection(|conn| {
            conn.fetch_lob("doc", "body", &[("id".to_string(), SqlValue::Integer(7))], None)
        })
        .unwrap();
    assert_eq!(live, Some(expected.clone()));

    let size = engine
        .with_connection(|conn| conn.query_one("SELECT body_size FROM doc WHERE id = 7", &[]))
        .unwrap()
        .unwrap();
    assert_eq!(size.get("body_size"), Some(&SqlValue::Integer(expected.len() as i64)));
}

#[test]
fn one_changed_byte_is_a_lob_difference() {
    let (_dir, mut engine) = loaded();
    let mut content = std::fs::read(fixtures_dir().join("body.txt")).unwrap();
    content[0] ^= 0x20;
    exec(&engine, "UPDATE doc SET body = ? WHERE id = 7", &[SqlValue::Blob(content)]);

    let diff = engine.verify_source(&dataset("staff.xml")).unwrap().unwrap();
    assert_eq!(diff.to_string(), "found difference at LOB value doc.body: {id: '7'}");
}

#[test]
fn unreadable_lob_file_leaves_tables_untouched() {
    let (_dir, mut engine) = loaded();
    let broken = Dataset::new()
        .with_row("emp", RowSpec::new().with("id", 9).with("name", "Zed"))
        .with_row(
            "doc",
            RowSpec::new()
                .with("id", 1)
                .with("body", LobRef::file("/no/such/file.bin")),
        );

    let err = engine.load(&broken).unwrap_err();
    assert!(err.to_string().starts_with("cannot read /no/such/file.bin"), "{err}");

    assert_eq!(count(&engine, "emp"), 2);
    assert_eq!(count(&engine, "doc"), 1);
    assert!(engine.verify_source(&dataset("staff.xml")).unwrap().is_none());
}

// -------------------------------------------------------------------------
// REFRESH strategy
// -------------------------------------------------------------------------

#[test]
fn refresh_merges_without_clearing_tables() {
    let (_dir, mut engine) = loaded();
    let refresh = dataset("staff_refresh.xml");
    engine.load_source(&refresh).unwrap();
    assert_eq!(engine.load_strategy(), LoadStrategy::Refresh);

    // Bob kept, Alice updated, Carol added
    assert_eq!(count(&engine, "emp"), 3);
    let alice = engine
        .with_connection(|conn| conn.query_one("SELECT name, salary FROM emp WHERE id = 1", &[]))
        .unwrap()
        .unwrap();
    assert_eq!(alice.get("name"), Some(&SqlValue::from("Alicia")));
    assert_eq!(alice.get("salary"), Some(&SqlValue::Integer(120)));

    assert!(engine.verify_source(&refresh).unwrap().is_none());
}

#[test]
fn refresh_verify_reports_field_and_missing_rows() {
    let (_dir, mut engine) = loaded();
    let refresh = dataset("staff_refresh.xml");
    engine.set_load_strategy(LoadStrategy::Refresh);

    let diff = engine.verify_source(&refresh).unwrap().unwrap();
    assert_eq!(diff.column(), Some("name"));

    engine.load_source(&refresh).unwrap();
    exec(&engine, "DELETE FROM emp WHERE id = 3", &[]);
    let diff = engine.verify_source(&refresh).unwrap().unwrap();
    assert!(matches!(diff, Difference::MissingEntry { .. }));
}

#[test]
fn refresh_on_keyless_table_matches_by_value() {
    let (_dir, mut engine) = loaded();
    engine.set_load_strategy(LoadStrategy::Refresh);

    let bonuses = Dataset::new()
        .with_row("bonus", RowSpec::new().with("emp_id", 1).with("amount", 20))
        .with_row("bonus", RowSpec::new().with("emp_id", 2).with("amount", 5));
    engine.load(&bonuses).unwrap();

    // the existing (1, 20) row is left alone, (2, 5) is added
    assert_eq!(count(&engine, "bonus"), 3);
    let dupes = engine
        .with_connection(|conn| {
            conn.query_one(
                "SELECT COUNT(*) AS n FROM bonus WHERE emp_id = 1 AND amount = 20",
                &[],
            )
        })
        .unwrap()
        .unwrap();
    assert_eq!(dupes.get("n"), Some(&SqlValue::Integer(1)));
    assert!(engine.verify(&bonuses).unwrap().is_none());

    let outcome = engine
        .with_connection(|conn| {
            let fields = [
                ("emp_id".to_string(), SqlValue::Integer(1)),
                ("amount".to_string(), SqlValue::Integer(10)),
            ];
            merge(conn, &mut PrimaryKeyCache::new(), "bonus", &fields)
        })
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Unchanged);
    assert_eq!(count(&engine, "bonus"), 3);

    exec(&engine, "UPDATE bonus SET amount = 6 WHERE emp_id = 2", &[]);
    let diff = engine.verify(&bonuses).unwrap().unwrap();
    assert!(matches!(diff, Difference::MissingEntry { ref table, .. } if table == "bonus"));
}

// -------------------------------------------------------------------------
// Schema scripts and sequences
// -------------------------------------------------------------------------

#[test]
fn reset_schema_drops_and_recreates() {
    let (_dir, engine) = loaded();
    let script = read_script(&fixtures_dir().join("schema.sql")).unwrap();
    engine
        .with_connection(|conn| reset_schema(conn, &script))
        .unwrap();
    assert_eq!(count(&engine, "emp"), 0);
    assert_eq!(count(&engine, "doc"), 0);
}

#[test]
fn populate_replays_only_data_statements() {
    let (_dir, engine) = setup();
    let script = read_script(&fixtures_dir().join("seed.sql")).unwrap();
    engine.with_connection(|conn| populate(conn, &script)).unwrap();

    assert_eq!(count(&engine, "ticket"), 2);
    let created = engine.with_connection(|conn| conn.table_exists("scratch")).unwrap();
    assert!(!created);
}

#[test]
fn reset_sequence_restarts_autoincrement() {
    let (_dir, engine) = setup();
    let script = read_script(&fixtures_dir().join("seed.sql")).unwrap();
    engine.with_connection(|conn| populate(conn, &script)).unwrap();
    exec(&engine, "DELETE FROM ticket", &[]);

    engine.reset_sequence("ticket").unwrap();
    exec(&engine, "INSERT INTO ticket (title) VALUES ('again')", &[]);
    let row = engine
        .with_connection(|conn| conn.query_one("SELECT id FROM ticket", &[]))
        .unwrap()
        .unwrap();
    assert_eq!(row.get("id"), Some(&SqlValue::Integer(1)));

    // unknown sequences are ignored
    engine.reset_sequence("no_such_sequence").unwrap();
}

#[test]
fn missing_dataset_file_is_io_error() {
    let err = DatasetParser::new()
        .parse_file(Path::new("/nonexistent/staff.xml"))
        .unwrap_err();
    assert!(err.to_string().starts_with("cannot read /nonexistent/staff.xml"));
}
