//! End-to-end pipeline tests against a real SQLite database.

use std::io::Write;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use contact_ledger::config::{Config, DbConfig, ExportConfig, IngestConfig, ServerConfig};
use contact_ledger::export::{export_records, ExportRequest};
use contact_ledger::sqlite_store::SqliteStore;
use contact_ledger::upload::ingest_upload;
use contact_ledger::{db, migrate};
use contact_ledger_core::error::LedgerError;
use contact_ledger_core::filter::FilterSpec;
use contact_ledger_core::models::Actor;
use contact_ledger_core::report::get_report;
use contact_ledger_core::snapshot::{list_snapshots, replay_snapshot, PageRequest};
use contact_ledger_core::store::RecordStore;

async fn setup() -> (TempDir, Config, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("data/ledger.sqlite"),
        },
        server: ServerConfig::default(),
        ingest: IngestConfig {
            staging_dir: Some(tmp.path().join("staging")),
            ..IngestConfig::default()
        },
        export: ExportConfig::default(),
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, config, SqliteStore::new(pool))
}

fn alice() -> Actor {
    Actor::new(Some("u-1".into()), "alice")
}

fn xlsx_fixture(sheet_rows: &str, shared: &[&str]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = SimpleFileOptions::default();

        let items: String = shared.iter().map(|s| format!("<si><t>{}</t></si>", s)).collect();
        zip.start_file("xl/sharedStrings.xml", options).unwrap();
        zip.write_all(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><sst count="{n}" uniqueCount="{n}">{items}</sst>"#,
                n = shared.len(),
                items = items
            )
            .as_bytes(),
        )
        .unwrap();

        zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
        zip.write_all(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><worksheet><sheetData>{}</sheetData></worksheet>"#,
                sheet_rows
            )
            .as_bytes(),
        )
        .unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}

#[tokio::test]
async fn reimport_updates_in_place_and_keeps_keyless_rows_apart() {
    let (_tmp, config, store) = setup().await;
    let csv = b"FirstName,EmailID,City\nAda,ada@x.io,London\nNoKey,,Paris\n";

    let first = ingest_upload(&store, &config.ingest, "people.csv", csv, alice())
        .await
        .unwrap();
    assert_eq!((first.inserted, first.updated, first.keyless), (2, 0, 1));

    let changed = b"FirstName,EmailID,City\nAda,ada@x.io,Cambridge\nNoKey,,Paris\n";
    let second = ingest_upload(&store, &config.ingest, "people.csv", changed, alice())
        .await
        .unwrap();
    assert_eq!((second.inserted, second.updated, second.keyless), (1, 1, 1));
    assert_eq!(second.duplicates_existing_count, 1);

    let all = store.query_records(&FilterSpec::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    let ada: Vec<_> = all.iter().filter(|r| r.record.email_id == "ada@x.io").collect();
    assert_eq!(ada.len(), 1);
    assert_eq!(ada[0].record.city, "Cambridge");
    assert_eq!(all.iter().filter(|r| r.record.email_id.is_empty()).count(), 2);
}

#[tokio::test]
async fn repeated_key_within_one_file_collapses_to_last_row() {
    let (_tmp, config, store) = setup().await;
    let csv = b"FirstName,EmailID\nFirst,dup@x.io\nSecond,dup@x.io\nThird,dup@x.io\n";

    let summary = ingest_upload(&store, &config.ingest, "dups.csv", csv, alice())
        .await
        .unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!((summary.inserted, summary.updated), (1, 2));
    assert_eq!(summary.duplicates_in_file_count, 1);
    assert_eq!(summary.duplicates_existing_count, 0);

    let all = store.query_records(&FilterSpec::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].record.first_name, "Third");

    let report = get_report(&store, summary.report_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(report.duplicates_in_file.len(), 1);
    assert_eq!(report.duplicates_in_file[0].email_id, "dup@x.io");
    assert_eq!(report.duplicates_in_file[0].count, 3);
    assert_eq!(report.actor, alice());
    assert_eq!(report.filename, "dups.csv");
    assert_eq!(report.source_sha256.len(), 64);
}

#[tokio::test]
async fn xlsx_upload_reads_first_sheet() {
    let (_tmp, config, store) = setup().await;
    let bytes = xlsx_fixture(
        r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="inlineStr"><is><t>PostalCode</t></is></c></row>
           <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2" t="inlineStr"><is><t>ada@x.io</t></is></c><c r="C2"><v>12345</v></c></row>
           <row r="4"><c r="B4" t="inlineStr"><is><t>grace@x.io</t></is></c></row>"#,
        &["FirstName", "EmailID", "Ada"],
    );

    let summary = ingest_upload(&store, &config.ingest, "Contacts.XLSX", &bytes, alice())
        .await
        .unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.inserted, 2);

    let all = store.query_records(&FilterSpec::default()).await.unwrap();
    assert_eq!(all[0].record.first_name, "Ada");
    assert_eq!(all[0].record.postal_code, "12345");
    assert_eq!(all[1].record.email_id, "grace@x.io");
    assert_eq!(all[1].record.first_name, "");
}

#[tokio::test]
async fn unsupported_upload_writes_nothing() {
    let (_tmp, config, store) = setup().await;
    let err = ingest_upload(&store, &config.ingest, "people.json", b"[]", alice())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnsupportedFormat(_)));

    let stats = contact_ledger::stats::collect_stats(store.pool()).await.unwrap();
    assert_eq!(stats.records, 0);
    assert_eq!(stats.upload_reports, 0);
    assert_eq!(stats.activities, 0);
}

#[tokio::test]
async fn filters_translate_to_sql() {
    let (_tmp, config, store) = setup().await;
    let csv = b"FirstName,LastName,EmailID,City,CompanyName\n\
                Ada,Lovelace,ada@x.io,London,Analytical\n\
                Grace,Hopper,grace@x.io,Arlington,Navy\n\
                Alan,Turing,alan@x.io,london,100%_Pure\n";
    ingest_upload(&store, &config.ingest, "p.csv", csv, alice())
        .await
        .unwrap();

    let names = |filter: FilterSpec| {
        let store = &store;
        async move {
            store
                .query_records(&filter)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.record.first_name)
                .collect::<Vec<_>>()
        }
    };

    let exact = FilterSpec::from_params(None, [("City", "=London")]).unwrap();
    assert_eq!(names(exact).await, vec!["Ada"]);

    let contains = FilterSpec::from_params(None, [("City", "LOND")]).unwrap();
    assert_eq!(names(contains).await, vec!["Ada", "Alan"]);

    let one_of = FilterSpec::from_params(None, [("City", "arlington, LONDON")]).unwrap();
    assert_eq!(names(one_of).await, vec!["Ada", "Grace", "Alan"]);

    let search = FilterSpec::from_params(Some("hop"), Vec::<(String, String)>::new()).unwrap();
    assert_eq!(names(search).await, vec!["Grace"]);

    // LIKE wildcards in the term are literal
    let wildcard = FilterSpec::from_params(None, [("CompanyName", "%_")]).unwrap();
    assert_eq!(names(wildcard).await, vec!["Alan"]);

    let blank = FilterSpec::from_params(None, [("City", "  ")]).unwrap();
    assert_eq!(names(blank).await.len(), 3, "blank filter values are skipped");

    let keyless = FilterSpec::from_params(None, [("EmailID", "=")]).unwrap();
    assert!(names(keyless).await.is_empty());
}

#[tokio::test]
async fn snapshot_replay_survives_deleted_records() {
    let (_tmp, config, store) = setup().await;
    let csv = b"FirstName,EmailID,DirectNumber\nA,a@x.io,1\nB,b@x.io,2\nC,c@x.io,3\n";
    ingest_upload(&store, &config.ingest, "p.csv", csv, alice())
        .await
        .unwrap();

    let request = ExportRequest {
        fields: Some(vec!["FirstName".into(), "EmailID".into(), "DirectNumber".into()]),
        ..Default::default()
    };
    let out = export_records(&store, &request, alice()).await.unwrap();
    assert_eq!(out.total, 3);
    let snapshot_id = out.snapshot_id.unwrap();

    sqlx::query("DELETE FROM records WHERE email_id = ?")
        .bind("b@x.io")
        .execute(store.pool())
        .await
        .unwrap();

    let page = replay_snapshot(&store, &snapshot_id, PageRequest { page: 1, limit: 10 }, 100)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    let firsts: Vec<_> = page
        .items
        .iter()
        .map(|r| r.get("FirstName").unwrap().to_string())
        .collect();
    assert_eq!(firsts, vec!["A", "C"]);
    assert_eq!(page.items[0].get("EmailID"), Some("NA"));
    assert_eq!(page.items[0].get("DirectNumber"), Some("NA"));

    let list = list_snapshots(&store, Some("alice"), PageRequest { page: 1, limit: 10 }, 100)
        .await
        .unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.items[0].item_ids.len(), 3);

    let err = replay_snapshot(&store, "missing", PageRequest { page: 1, limit: 10 }, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::SnapshotNotFound(_)));
}

#[tokio::test]
async fn snapshot_listing_is_newest_first_and_filtered_by_user() {
    let (_tmp, config, store) = setup().await;
    ingest_upload(&store, &config.ingest, "p.csv", b"EmailID\na@x.io\n", alice())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for actor in [alice(), Actor::new(None, "bob"), alice()] {
        let out = export_records(&store, &ExportRequest::default(), actor)
            .await
            .unwrap();
        ids.push(out.snapshot_id.unwrap());
    }

    let all = list_snapshots(&store, None, PageRequest { page: 1, limit: 2 }, 100)
        .await
        .unwrap();
    assert_eq!((all.total, all.pages), (3, 2));
    assert_eq!(all.items[0].id, ids[2]);
    assert_eq!(all.items[1].id, ids[1]);

    let mine = list_snapshots(&store, Some("alice"), PageRequest { page: 1, limit: 10 }, 100)
        .await
        .unwrap();
    assert_eq!(mine.total, 2);
    assert!(mine.items.iter().all(|s| s.actor.username == "alice"));
}

#[tokio::test]
async fn failure_mid_batch_rolls_back_the_whole_upload() {
    let (_tmp, config, store) = setup().await;
    ingest_upload(&store, &config.ingest, "p.csv", b"FirstName,EmailID\nAda,ada@x.io\n", alice())
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_boom BEFORE INSERT ON records \
         WHEN NEW.first_name = 'Boom' \
         BEGIN SELECT RAISE(ABORT, 'rejected row'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let csv = b"FirstName,EmailID\nAda Changed,ada@x.io\nNew,new@x.io\nBoom,boom@x.io\n";
    let err = ingest_upload(&store, &config.ingest, "p.csv", csv, alice())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Storage(_)), "{:?}", err);

    let all = store.query_records(&FilterSpec::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].record.first_name, "Ada");

    let stats = contact_ledger::stats::collect_stats(store.pool()).await.unwrap();
    assert_eq!(stats.upload_reports, 1);
    assert_eq!(stats.activities, 1);

    // The pool is still usable once the failed batch is gone
    let summary = ingest_upload(&store, &config.ingest, "p.csv", b"FirstName,EmailID\nNew,new@x.io\n", alice())
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);
}

#[tokio::test]
async fn overlapping_imports_both_commit() {
    let (_tmp, config, store) = setup().await;
    let first: Vec<u8> = std::iter::once("FirstName,EmailID".to_string())
        .chain((0..200).map(|i| format!("First{},shared{}@x.io", i, i)))
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes();
    let second: Vec<u8> = std::iter::once("FirstName,EmailID".to_string())
        .chain((0..200).map(|i| format!("Second{},shared{}@x.io", i, i)))
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes();

    let (a, b) = tokio::join!(
        ingest_upload(&store, &config.ingest, "a.csv", &first, alice()),
        ingest_upload(&store, &config.ingest, "b.csv", &second, alice()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.inserted + b.inserted, 200);
    assert_eq!(a.updated + b.updated, 200);

    let all = store.query_records(&FilterSpec::default()).await.unwrap();
    assert_eq!(all.len(), 200);
    // Each key carries the values of whichever batch committed last
    let winner = if a.updated == 200 { "First" } else { "Second" };
    assert!(all.iter().all(|r| r.record.first_name.starts_with(winner)));
}
