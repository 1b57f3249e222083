#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use scratch_ledger::{
    catalog::ColumnCatalog,
    extract::RawExtract,
    import::{ImportPipeline, ImportSummary},
    store::Store,
};
use tempfile::{TempDir, tempdir};

/// Header row of the default redemption extract, in catalog order.
pub const EXTRACT_HEADERS: [&str; 9] = [
    "兑奖单位",
    "方案名称",
    "兑奖金额",
    "售出站点",
    "兑奖站点",
    "售出时间",
    "兑奖时间",
    "票号",
    "方案编号",
];

pub const TABLE: &str = "各奖等中奖明细表";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("lottery.db")
    }

    pub fn store(&self) -> Store {
        Store::new(self.db_path(), TABLE)
    }
}

/// One extract row; cells follow [`EXTRACT_HEADERS`].
pub fn record(
    region: &str,
    method: &str,
    amount: &str,
    redeem_site: &str,
    sale_time: &str,
    redeem_time: &str,
    serial: &str,
) -> Vec<String> {
    [
        region,
        method,
        amount,
        "S-001",
        redeem_site,
        sale_time,
        redeem_time,
        serial,
        "P1",
    ]
    .iter()
    .map(|cell| cell.to_string())
    .collect()
}

pub fn extract(rows: Vec<Vec<String>>) -> RawExtract {
    RawExtract {
        headers: EXTRACT_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
    }
}

/// Five records across two regions, three play methods and two months.
pub fn sample_rows() -> Vec<Vec<String>> {
    vec![
        record("北京", "即开A", "50", "R-1", "2025-01-01 09:00:00", "2025-01-05 10:00:00", "T1"),
        record("北京", "即开A", "100", "R-1", "2025-01-02 09:00:00", "2025-01-06 10:00:00", "T2"),
        record("北京", "即开B", "50", "R-2", "2025-01-03 09:00:00", "2025-01-20 10:00:00", "T3"),
        record("上海", "即开B", "20", "R-3", "2025-02-01 09:00:00", "2025-02-03 10:00:00", "T4"),
        record("上海", "即开C", "500", "R-3", "2025-02-02 09:00:00", "2025-02-10 23:59:59", "T5"),
    ]
}

pub fn sample_csv() -> String {
    let mut lines = vec![EXTRACT_HEADERS.join(",")];
    lines.extend(sample_rows().iter().map(|row| row.join(",")));
    lines.join("\n") + "\n"
}

/// Imports [`sample_rows`] into a fresh store and returns it.
pub fn seeded_store(workspace: &TestWorkspace) -> (Store, ColumnCatalog) {
    let store = workspace.store();
    let catalog = ColumnCatalog::default();
    let summary = import(&store, &catalog, sample_rows(), true);
    assert!(summary.success, "{}", summary.message);
    assert_eq!(summary.inserted, 5);
    (store, catalog)
}

pub fn import(
    store: &Store,
    catalog: &ColumnCatalog,
    rows: Vec<Vec<String>>,
    skip_duplicates: bool,
) -> ImportSummary {
    ImportPipeline::new(store, catalog).import_extract(&extract(rows), skip_duplicates)
}
