//! Optional embedded PostgreSQL tests for the view store, gated by
//! `RUN_PG_EMBEDDED`. Use `cargo test -- --ignored` with `RUN_PG_EMBEDDED=1`
//! to run them.
#![expect(clippy::expect_used, reason = "integration tests fail fast on setup errors")]

mod support;

use std::path::PathBuf;

use pg_embedded_setup_unpriv::TestCluster;
use postgres::{Client, NoTls};
use viewed_models::domain::{ExecutionOptions, Scope, ViewError, ViewOrchestrator, ViewRegistry};
use viewed_models::inbound::manifest::load_registry;
use viewed_models::outbound::persistence::PostgresViewStore;

use support::{
    SEED_TABLES, embedded_postgres_enabled, format_postgres_error, fresh_database, test_cluster,
};

/// A started cluster with a seeded database. The cluster stops on drop.
struct SeededDatabase {
    _cluster: TestCluster,
    url: String,
}

impl SeededDatabase {
    fn client(&self) -> Client {
        Client::connect(&self.url, NoTls)
            .unwrap_or_else(|err| panic!("connect: {}", format_postgres_error(&err)))
    }

    fn store(&self) -> PostgresViewStore {
        PostgresViewStore::connect(&self.url).expect("view store should connect")
    }
}

#[expect(clippy::print_stderr, reason = "skip marker for opt-in cluster tests")]
fn seeded_database() -> Option<SeededDatabase> {
    if !embedded_postgres_enabled() {
        eprintln!("SKIP-TEST-CLUSTER: set RUN_PG_EMBEDDED=1 to run");
        return None;
    }
    let cluster = test_cluster().expect("embedded Postgres should start");
    let url = fresh_database(&cluster).expect("test database should be created");
    let database = SeededDatabase {
        _cluster: cluster,
        url,
    };
    database
        .client()
        .batch_execute(SEED_TABLES)
        .unwrap_or_else(|err| panic!("seed: {}", format_postgres_error(&err)));
    Some(database)
}

fn registry() -> ViewRegistry {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("views.json");
    load_registry(&path).expect("sample manifest should load")
}

fn relation_exists(client: &mut Client, name: &str) -> bool {
    let row = client
        .query_one("SELECT to_regclass($1::text) IS NOT NULL AS present", &[&name])
        .expect("to_regclass query");
    row.get("present")
}

fn serial_refresh() -> ExecutionOptions {
    ExecutionOptions {
        concurrently: Some(false),
        ..ExecutionOptions::default()
    }
}

#[test]
#[ignore = "requires embedded Postgres binaries; opt-in via RUN_PG_EMBEDDED=1"]
fn recreate_builds_the_whole_dependency_chain() {
    let Some(database) = seeded_database() else {
        return;
    };
    let registry = registry();
    let mut orchestrator = ViewOrchestrator::new(&registry, database.store());

    orchestrator.recreate(&Scope::All).expect("recreate");
    // A second run drops and recreates over existing views.
    orchestrator.recreate(&Scope::All).expect("recreate again");

    let mut client = database.client();
    let rows = client
        .query(
            "SELECT activity_id FROM dashboards_top_activities ORDER BY activity_id",
            &[],
        )
        .expect("query top activities");
    let ids: Vec<i32> = rows.iter().map(|row| row.get("activity_id")).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
#[ignore = "requires embedded Postgres binaries; opt-in via RUN_PG_EMBEDDED=1"]
fn refresh_records_metadata_and_honours_minimum_age() {
    let Some(database) = seeded_database() else {
        return;
    };
    let registry = registry();
    let mut orchestrator = ViewOrchestrator::new(&registry, database.store());
    orchestrator.recreate(&Scope::All).expect("recreate");

    let first = orchestrator
        .refresh_all(&Scope::All, &serial_refresh())
        .expect("first refresh");
    assert_eq!(first.len(), 2);

    let mut client = database.client();
    let row = client
        .query_one(
            "SELECT obj_description('reports_activity_summary'::regclass, 'pg_class') AS comment",
            &[],
        )
        .expect("read comment");
    let comment: String = row.get("comment");
    let metadata: serde_json::Value = serde_json::from_str(&comment).expect("comment is JSON");
    assert!(metadata.get("last_updated").is_some_and(serde_json::Value::is_string));

    let second = orchestrator
        .refresh_all(&Scope::All, &serial_refresh())
        .expect("second refresh");
    assert_eq!(
        second.iter().map(|statement| statement.sql()).collect::<Vec<_>>(),
        vec!["REFRESH MATERIALIZED VIEW \"dashboards_top_activities\""]
    );
}

#[test]
#[ignore = "requires embedded Postgres binaries; opt-in via RUN_PG_EMBEDDED=1"]
fn vacuum_and_statistics_run_against_materialized_views() {
    let Some(database) = seeded_database() else {
        return;
    };
    let registry = registry();
    let mut orchestrator = ViewOrchestrator::new(&registry, database.store());
    orchestrator.recreate(&Scope::All).expect("recreate");

    let vacuumed = orchestrator
        .vacuum_all(&Scope::All, &ExecutionOptions::default())
        .expect("vacuum outside a transaction");
    assert_eq!(vacuumed.len(), 2);

    let altered = orchestrator
        .set_statistics(&Scope::All, 500, &ExecutionOptions::default())
        .expect("set statistics");
    // activity_id and dollars on the summary, activity_id on the dashboard.
    assert_eq!(altered.len(), 3);
}

#[test]
#[ignore = "requires embedded Postgres binaries; opt-in via RUN_PG_EMBEDDED=1"]
fn failed_recreate_rolls_back_the_drops() {
    let Some(database) = seeded_database() else {
        return;
    };
    let registry = registry();
    let mut orchestrator = ViewOrchestrator::new(&registry, database.store());
    orchestrator.recreate(&Scope::All).expect("recreate");

    let mut client = database.client();
    // Existing views follow the rename; re-rendering the template does not.
    client
        .batch_execute("ALTER TABLE aims_transactions RENAME COLUMN dollars TO amount")
        .expect("rename column");

    let result = orchestrator.recreate(&Scope::All);
    assert!(matches!(result, Err(ViewError::Store(_))));

    for name in [
        "reports_activity_totals",
        "reports_activity_summary",
        "dashboards_top_activities",
    ] {
        assert!(relation_exists(&mut client, name), "{name} should survive rollback");
    }
}

#[test]
#[ignore = "requires embedded Postgres binaries; opt-in via RUN_PG_EMBEDDED=1"]
fn unreadable_refresh_timestamps_do_not_abort_the_batch() {
    let Some(database) = seeded_database() else {
        return;
    };
    let registry = registry();
    let mut orchestrator = ViewOrchestrator::new(&registry, database.store());
    orchestrator.recreate(&Scope::All).expect("recreate");

    database
        .client()
        .batch_execute(
            "COMMENT ON MATERIALIZED VIEW reports_activity_summary IS \
             '{\"last_updated\": \"never\"}'",
        )
        .expect("seed comment");

    let refreshed = orchestrator
        .refresh_all(&Scope::All, &serial_refresh())
        .expect("refresh despite the unreadable timestamp");
    assert_eq!(refreshed.len(), 2);
}
