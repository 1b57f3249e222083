mod common;

use chrono::NaiveDate;
use proptest::prelude::*;
use scratch_ledger::{
    catalog::ColumnCatalog,
    conditions::ConditionSet,
    query::{QueryCompiler, ValueListing},
    store::{ResultSet, Store},
};

use common::{TABLE, TestWorkspace, seeded_store};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn serials(result: &ResultSet) -> Vec<String> {
    let column = result
        .headers
        .iter()
        .position(|h| h == "票号")
        .expect("serial column");
    let mut serials = result
        .display_rows()
        .into_iter()
        .map(|row| row[column].clone())
        .collect::<Vec<_>>();
    serials.sort();
    serials
}

fn run(store: &Store, catalog: &ColumnCatalog, conditions: &ConditionSet) -> Vec<String> {
    let query = QueryCompiler::new(catalog, TABLE).compile(conditions);
    serials(&store.fetch(&query).expect("query runs"))
}

#[test]
fn empty_conditions_return_everything() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let all = run(&store, &catalog, &ConditionSet::default());
    assert_eq!(all, vec!["T1", "T2", "T3", "T4", "T5"]);
}

#[test]
fn region_and_site_filter_by_equality() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let conditions = ConditionSet::builder().region("北京").build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T1", "T2", "T3"]);

    let conditions = ConditionSet::builder()
        .region("北京")
        .redeem_site("R-2")
        .build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T3"]);
}

#[test]
fn play_methods_match_any_listed() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let conditions = ConditionSet::builder()
        .play_methods(["即开A", "即开C"])
        .build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T1", "T2", "T5"]);
}

#[test]
fn prize_pair_excludes_other_amounts_of_the_same_method() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let conditions = ConditionSet::builder().prize_condition("即开A", "50").build();
    // T2 is 即开A at 100 and must not match.
    assert_eq!(run(&store, &catalog, &conditions), vec!["T1"]);

    let conditions = ConditionSet::builder()
        .prize_condition("即开A", "50")
        .prize_condition("即开B", "20")
        .build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T1", "T4"]);
}

#[test]
fn date_ranges_are_inclusive_whole_days() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let conditions = ConditionSet::builder()
        .redeem_time(Some(ymd(2025, 1, 5)), Some(ymd(2025, 1, 6)))
        .build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T1", "T2"]);

    let conditions = ConditionSet::builder()
        .redeem_time(Some(ymd(2025, 2, 10)), Some(ymd(2025, 2, 10)))
        .build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T5"]);

    let conditions = ConditionSet::builder()
        .sale_time(Some(ymd(2025, 2, 1)), Some(ymd(2025, 2, 28)))
        .build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T4", "T5"]);
}

#[test]
fn inverted_range_is_no_constraint() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let conditions = ConditionSet::builder()
        .redeem_time(Some(ymd(2025, 3, 1)), Some(ymd(2025, 1, 1)))
        .build();
    assert!(conditions.is_empty());
    assert_eq!(run(&store, &catalog, &conditions).len(), 5);
}

#[test]
fn all_conditions_combine_with_and() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let conditions = ConditionSet::builder()
        .region("北京")
        .play_methods(["即开A", "即开B"])
        .prize_condition("即开B", "50")
        .redeem_time(Some(ymd(2025, 1, 1)), Some(ymd(2025, 1, 31)))
        .build();
    assert_eq!(run(&store, &catalog, &conditions), vec!["T3"]);
}

#[test]
fn limit_caps_returned_rows() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let query = QueryCompiler::new(&catalog, TABLE)
        .compile(&ConditionSet::default())
        .with_limit(Some(2));
    assert_eq!(store.fetch(&query).unwrap().len(), 2);
}

#[test]
fn breakdown_counts_per_method() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    let query = QueryCompiler::new(&catalog, TABLE).compile_breakdown(&ConditionSet::default());
    let result = store.fetch(&query).unwrap();
    assert_eq!(
        result.display_rows(),
        vec![
            vec!["即开A".to_string(), "2".to_string()],
            vec!["即开B".to_string(), "2".to_string()],
            vec!["即开C".to_string(), "1".to_string()],
        ]
    );
}

#[test]
fn distinct_values_are_sorted_and_unique() {
    let workspace = TestWorkspace::new();
    let (store, catalog) = seeded_store(&workspace);
    assert_eq!(
        store.distinct_values(&catalog, ValueListing::Regions).unwrap(),
        vec!["上海", "北京"]
    );
    assert_eq!(
        store
            .distinct_values(&catalog, ValueListing::PlayMethods)
            .unwrap(),
        vec!["即开A", "即开B", "即开C"]
    );
}

#[test]
fn missing_database_table_is_an_error() {
    let workspace = TestWorkspace::new();
    rusqlite::Connection::open(workspace.db_path()).unwrap();
    let store = workspace.store();
    let catalog = ColumnCatalog::default();
    let query = QueryCompiler::new(&catalog, TABLE).compile(&ConditionSet::default());
    assert!(store.fetch(&query).is_err());
}

#[test]
fn reads_leave_a_missing_database_file_absent() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    let catalog = ColumnCatalog::default();
    let query = QueryCompiler::new(&catalog, TABLE).compile(&ConditionSet::default());

    assert!(store.fetch(&query).is_err());
    assert!(store.distinct_values(&catalog, ValueListing::Regions).is_err());
    assert!(store.status(&catalog).is_err());
    assert!(!workspace.db_path().exists());

    store.connect().unwrap();
    assert!(workspace.db_path().exists());
    assert!(!store.status(&catalog).unwrap().table_exists);
}

proptest! {
    #[test]
    fn placeholders_always_match_parameters(
        region in proptest::option::of("[a-z?' ]{0,8}"),
        methods in proptest::collection::vec("[a-zA-Z?]{0,6}", 0..4),
        prizes in proptest::collection::vec(("[a-z]{1,4}", "[0-9?]{0,3}"), 0..4),
        redeem in proptest::option::of((0u32..60, 0u32..60)),
    ) {
        let mut builder = ConditionSet::builder()
            .region(region.as_deref().unwrap_or_default())
            .play_methods(&methods);
        for (method, amount) in &prizes {
            builder = builder.prize_condition(method, amount);
        }
        if let Some((start, end)) = redeem {
            let base = ymd(2025, 1, 1);
            builder = builder.redeem_time(
                base.checked_add_days(chrono::Days::new(start.into())),
                base.checked_add_days(chrono::Days::new(end.into())),
            );
        }
        let conditions = builder.build();
        let catalog = ColumnCatalog::default();
        let query = QueryCompiler::new(&catalog, TABLE).compile(&conditions);
        prop_assert_eq!(query.placeholder_count(), query.params.len());
        prop_assert!(query.text.starts_with("SELECT * FROM"));
    }
}
