mod common;

use rusqlite::Connection;
use scratch_ledger::{
    catalog::ColumnCatalog,
    reconcile::{ReconcileAction, ReconcileError, inspect, natural_key_index_name, reconcile},
};

use common::{TABLE, TestWorkspace};

fn legacy_table(conn: &Connection) {
    // Older deployments predate the sale-site column and the unique key.
    conn.execute_batch(&format!(
        "CREATE TABLE \"{TABLE}\" (
            \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,
            \"兑奖单位\" TEXT, \"方案名称\" TEXT, \"兑奖金额\" NUMERIC,
            \"兑奖站点\" TEXT, \"售出时间\" DATETIME, \"兑奖时间\" DATETIME,
            \"票号\" TEXT, \"方案编号\" TEXT
        )"
    ))
    .unwrap();
}

fn stored_regions(conn: &Connection) -> Vec<(i64, String)> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT \"id\", \"兑奖单位\" FROM \"{TABLE}\" ORDER BY \"id\""
        ))
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    rows
}

fn key_index_count(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        [natural_key_index_name(TABLE)],
        |row| row.get(0),
    )
    .unwrap()
}

fn insert_legacy(conn: &Connection, region: &str, serial: &str) {
    conn.execute(
        &format!(
            "INSERT INTO \"{TABLE}\" (\"兑奖单位\", \"方案名称\", \"兑奖金额\", \"兑奖时间\", \"票号\", \"方案编号\")
             VALUES (?1, '即开A', 50, '2025-01-05 10:00:00', ?2, 'P1')"
        ),
        [region, serial],
    )
    .unwrap();
}

#[test]
fn fresh_database_gets_full_table_once() {
    let workspace = TestWorkspace::new();
    let mut conn = Connection::open(workspace.db_path()).unwrap();
    let catalog = ColumnCatalog::default();

    let first = reconcile(&mut conn, TABLE, &catalog).unwrap();
    assert_eq!(
        first.actions,
        vec![
            ReconcileAction::CreatedTable,
            ReconcileAction::AddedNaturalKey {
                removed_duplicates: 0
            },
        ]
    );

    let inspection = inspect(&conn, TABLE).unwrap();
    assert!(inspection.exists);
    assert_eq!(inspection.columns.len(), 10);
    assert!(inspection.has_natural_key(TABLE, &catalog));

    let second = reconcile(&mut conn, TABLE, &catalog).unwrap();
    assert!(second.is_unchanged());
}

#[test]
fn drifted_table_gains_columns_and_constraint() {
    let workspace = TestWorkspace::new();
    let mut conn = Connection::open(workspace.db_path()).unwrap();
    legacy_table(&conn);
    insert_legacy(&conn, "北京", "T1");
    let catalog = ColumnCatalog::default();

    let report = reconcile(&mut conn, TABLE, &catalog).unwrap();
    assert_eq!(
        report.actions,
        vec![
            ReconcileAction::AddedColumn {
                column: "售出站点".to_string(),
                sql_type: "TEXT"
            },
            ReconcileAction::AddedNaturalKey {
                removed_duplicates: 0
            },
        ]
    );

    assert_eq!(key_index_count(&conn), 1);
    assert!(reconcile(&mut conn, TABLE, &catalog).unwrap().is_unchanged());
}

#[test]
fn duplicates_are_removed_keeping_the_earliest_row() {
    let workspace = TestWorkspace::new();
    let mut conn = Connection::open(workspace.db_path()).unwrap();
    legacy_table(&conn);
    insert_legacy(&conn, "first", "T1");
    insert_legacy(&conn, "second", "T1");
    insert_legacy(&conn, "third", "T1");
    insert_legacy(&conn, "other", "T2");
    let catalog = ColumnCatalog::default();

    let report = reconcile(&mut conn, TABLE, &catalog).unwrap();
    assert!(report.actions.contains(&ReconcileAction::AddedNaturalKey {
        removed_duplicates: 2
    }));
    assert_eq!(
        stored_regions(&conn),
        vec![(1, "first".to_string()), (4, "other".to_string())]
    );
}

#[test]
fn renamed_columns_follow_catalog_overrides() {
    let workspace = TestWorkspace::new();
    let mut conn = Connection::open(workspace.db_path()).unwrap();
    let overrides = [("region".to_string(), "unit".to_string())]
        .into_iter()
        .collect();
    let catalog = ColumnCatalog::with_overrides(&overrides).unwrap();

    reconcile(&mut conn, "custom", &catalog).unwrap();
    let inspection = inspect(&conn, "custom").unwrap();
    assert!(inspection.columns.iter().any(|c| c == "unit"));
    assert!(!inspection.columns.iter().any(|c| c == "兑奖单位"));
}

#[test]
fn cleanup_treats_missing_key_parts_as_equal() {
    let workspace = TestWorkspace::new();
    let mut conn = Connection::open(workspace.db_path()).unwrap();
    legacy_table(&conn);
    for region in ["first", "second"] {
        conn.execute(
            &format!(
                "INSERT INTO \"{TABLE}\" (\"兑奖单位\", \"兑奖金额\", \"票号\") VALUES (?1, 50, 'T1')"
            ),
            [region],
        )
        .unwrap();
    }
    let catalog = ColumnCatalog::default();

    let report = reconcile(&mut conn, TABLE, &catalog).unwrap();
    assert!(report.actions.contains(&ReconcileAction::AddedNaturalKey {
        removed_duplicates: 1
    }));
    assert_eq!(stored_regions(&conn), vec![(1, "first".to_string())]);

    let again = conn.execute(
        &format!("INSERT INTO \"{TABLE}\" (\"兑奖金额\", \"票号\") VALUES (50, 'T1')"),
        [],
    );
    assert!(again.is_err(), "missing key parts must collide under the index");
}

#[test]
fn stale_index_with_the_key_name_is_replaced() {
    let workspace = TestWorkspace::new();
    let mut conn = Connection::open(workspace.db_path()).unwrap();
    legacy_table(&conn);
    conn.execute_batch(&format!(
        "CREATE INDEX \"{}\" ON \"{TABLE}\" (\"票号\")",
        natural_key_index_name(TABLE)
    ))
    .unwrap();
    insert_legacy(&conn, "北京", "T1");
    let catalog = ColumnCatalog::default();

    let report = reconcile(&mut conn, TABLE, &catalog).unwrap();
    assert!(report.actions.contains(&ReconcileAction::AddedNaturalKey {
        removed_duplicates: 0
    }));
    assert_eq!(key_index_count(&conn), 1);
    assert!(inspect(&conn, TABLE).unwrap().has_natural_key(TABLE, &catalog));
    assert!(reconcile(&mut conn, TABLE, &catalog).unwrap().is_unchanged());
}

#[test]
fn failed_key_retry_rolls_back_removed_duplicates() {
    let workspace = TestWorkspace::new();
    let mut conn = Connection::open(workspace.db_path()).unwrap();
    legacy_table(&conn);
    insert_legacy(&conn, "first", "T1");
    insert_legacy(&conn, "second", "T1");
    // Every deleted row comes straight back, so the retried index still fails.
    conn.execute_batch(&format!(
        "CREATE TRIGGER keep_twins AFTER DELETE ON \"{TABLE}\" BEGIN
            INSERT INTO \"{TABLE}\" (\"兑奖单位\", \"方案名称\", \"兑奖金额\", \"兑奖时间\", \"票号\", \"方案编号\")
            VALUES (old.\"兑奖单位\", old.\"方案名称\", old.\"兑奖金额\", old.\"兑奖时间\", old.\"票号\", old.\"方案编号\");
        END"
    ))
    .unwrap();
    let catalog = ColumnCatalog::default();

    let err = reconcile(&mut conn, TABLE, &catalog).unwrap_err();
    assert!(matches!(err, ReconcileError::AddNaturalKey { .. }), "{err}");
    assert_eq!(
        stored_regions(&conn),
        vec![(1, "first".to_string()), (2, "second".to_string())]
    );
    assert_eq!(key_index_count(&conn), 0);
}
