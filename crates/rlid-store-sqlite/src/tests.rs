//! Integration tests for `SqliteStore` against an in-memory database.

use rlid_core::{
  dataset::{DatasetSchema, Field, FieldType},
  geometry::{Geometry, GeometryType, Point},
  mail::{BodyFormat, MailMessage, Mailer},
  record::{Record, Value},
  store::{GisStore, ReadQuery},
};
use uuid::Uuid;

use crate::SqliteStore;

const PATH: &str = "RLIDGeo.dbo.SiteAddress";

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory().await.expect("in-memory store")
}

fn schema() -> DatasetSchema {
  DatasetSchema {
    fields:        vec![
      Field::new("gfid", FieldType::Guid).id(),
      Field::new("house_nbr", FieldType::Long),
      Field::text("street_name", 32),
      Field::new("last_update_date", FieldType::Date),
    ],
    geometry_type: GeometryType::Point,
  }
}

async fn seeded() -> SqliteStore {
  let s = store().await;
  s.create_dataset(PATH, &schema()).await.unwrap();
  let rows = (1..=3)
    .map(|i| {
      Record::new()
        .with("gfid", Uuid::new_v4())
        .with("house_nbr", i * 100_i64)
        .with("street_name", if i == 3 { "OAK" } else { "MAIN" })
        .with_shape(Geometry::Point(Point::new(i as f64, 0.0)))
    })
    .collect();
  assert_eq!(s.insert(PATH, rows).await.unwrap(), 3);
  s
}

// ─── Datasets ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_describe_and_delete() {
  let s = store().await;
  assert!(!s.dataset_exists(PATH).await.unwrap());

  s.create_dataset(PATH, &schema()).await.unwrap();
  assert!(s.dataset_exists(PATH).await.unwrap());
  assert_eq!(s.describe(PATH).await.unwrap(), schema());
  assert!(s.create_dataset(PATH, &schema()).await.is_err());

  s.delete_dataset(PATH).await.unwrap();
  assert!(!s.dataset_exists(PATH).await.unwrap());
  // Deleting twice is fine.
  s.delete_dataset(PATH).await.unwrap();
}

#[tokio::test]
async fn describe_missing_dataset_is_an_error() {
  let s = store().await;
  assert!(s.describe("Nope.dbo.Nothing").await.is_err());
}

// ─── Cursors ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_read_back_typed_values() {
  let s = seeded().await;
  let rows = s.read(PATH, &ReadQuery::all().order_by(&["house_nbr"])).await.unwrap();
  assert_eq!(rows.len(), 3);
  assert_eq!(rows[0].int("house_nbr"), Some(100));
  assert!(matches!(rows[0].get("gfid"), Value::Guid(_)));
  assert_eq!(rows[2].shape, Some(Geometry::Point(Point::new(3.0, 0.0))));
  assert!(rows.iter().all(|r| r.oid.is_some()));
}

#[tokio::test]
async fn read_with_filter_and_projection() {
  let s = seeded().await;
  let rows = s
    .read(PATH, &ReadQuery::fields(&["street_name"]).filter(Some("street_name = 'MAIN'")))
    .await
    .unwrap();
  assert_eq!(rows.len(), 2);
  assert!(rows.iter().all(|r| r.shape.is_none() && r.values.len() == 1));
  assert_eq!(s.count(PATH, Some("house_nbr > 100")).await.unwrap(), 2);
}

#[tokio::test]
async fn reading_an_unknown_field_fails() {
  let s = seeded().await;
  assert!(s.read(PATH, &ReadQuery::fields(&["nope"])).await.is_err());
}

#[tokio::test]
async fn update_overwrites_only_present_attributes() {
  let s = seeded().await;
  let first = s.read(PATH, &ReadQuery::all().order_by(&["house_nbr"])).await.unwrap().remove(0);
  let patch = Record { oid: first.oid, ..Record::new() }.with("street_name", "ELM");
  assert_eq!(s.update(PATH, vec![patch]).await.unwrap(), 1);

  let after = s.read(PATH, &ReadQuery::all().filter(Some("street_name = 'ELM'"))).await.unwrap();
  assert_eq!(after.len(), 1);
  assert_eq!(after[0].int("house_nbr"), Some(100));
  assert_eq!(after[0].shape, first.shape);
}

#[tokio::test]
async fn update_without_oid_is_rejected() {
  let s = seeded().await;
  assert!(s.update(PATH, vec![Record::new().with("house_nbr", 1_i64)]).await.is_err());
}

#[tokio::test]
async fn deletes_by_predicate_and_oid() {
  let s = seeded().await;
  assert_eq!(s.delete_where(PATH, Some("street_name = 'OAK'")).await.unwrap(), 1);
  let oids: Vec<i64> = s
    .read(PATH, &ReadQuery::fields::<&str>(&[]))
    .await
    .unwrap()
    .into_iter()
    .filter_map(|r| r.oid)
    .collect();
  assert_eq!(s.delete_oids(PATH, &oids[..1]).await.unwrap(), 1);
  assert_eq!(s.count(PATH, None).await.unwrap(), 1);
  assert_eq!(s.delete_where(PATH, None).await.unwrap(), 1);
}

// ─── Views & schema ──────────────────────────────────────────────────────────

#[tokio::test]
async fn views_filter_and_reject_writes() {
  let s = seeded().await;
  let fields = vec!["house_nbr".to_owned()];
  s.create_view("view_main", PATH, Some("street_name = 'MAIN'"), Some(&fields)).await.unwrap();

  assert_eq!(s.count("view_main", None).await.unwrap(), 2);
  assert_eq!(s.describe("view_main").await.unwrap().field_names(), fields);
  assert!(s.insert("view_main", vec![Record::new()]).await.is_err());

  s.delete_dataset("view_main").await.unwrap();
  assert_eq!(s.count(PATH, None).await.unwrap(), 3);
}

#[tokio::test]
async fn add_rename_and_drop_fields() {
  let s = seeded().await;
  s.add_field(PATH, &Field::text("esn", 5)).await.unwrap();
  s.add_index(PATH, &["esn".to_owned(), "shape".to_owned()], false).await.unwrap();
  s.rename_field(PATH, "esn", "emergency_service_number").await.unwrap();
  assert!(s.describe(PATH).await.unwrap().field("emergency_service_number").is_some());

  s.delete_field(PATH, "emergency_service_number").await.unwrap();
  assert!(s.describe(PATH).await.unwrap().field("emergency_service_number").is_none());
  assert_eq!(s.read(PATH, &ReadQuery::all()).await.unwrap().len(), 3);
}

// ─── Edit sessions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn aborted_edit_session_discards_writes() {
  let s = seeded().await;
  s.begin_edit("RLIDGeo").await.unwrap();
  assert!(s.begin_edit("RLIDGeo").await.is_err());
  s.delete_where(PATH, None).await.unwrap();
  s.abort_edit("RLIDGeo").await.unwrap();
  assert_eq!(s.count(PATH, None).await.unwrap(), 3);

  s.begin_edit("RLIDGeo").await.unwrap();
  s.delete_where(PATH, Some("house_nbr = 100")).await.unwrap();
  s.commit_edit("RLIDGeo").await.unwrap();
  assert_eq!(s.count(PATH, None).await.unwrap(), 2);
  assert!(s.commit_edit("RLIDGeo").await.is_err());
}

// ─── Domains, metadata, mail ─────────────────────────────────────────────────

#[tokio::test]
async fn domains_round_trip_and_missing_domain_fails() {
  let s = store().await;
  s.add_domain("Addressing", "StreetType", &[("ST", "Street"), ("AVE", "Avenue")]).await.unwrap();
  let d = s.domain("Addressing", "StreetType").await.unwrap();
  assert_eq!(d.get("AVE").map(String::as_str), Some("Avenue"));
  assert!(matches!(
    s.domain("Addressing", "Nope").await,
    Err(rlid_core::Error::UnknownDomain { ref name, .. }) if name == "Nope"
  ));
}

#[tokio::test]
async fn metadata_import_export_and_upgrade() {
  let s = seeded().await;
  assert_eq!(s.export_metadata(PATH).await.unwrap(), None);
  assert!(s.upgrade_metadata(PATH).await.is_err());

  s.import_metadata(PATH, "<metadata><idinfo/></metadata>").await.unwrap();
  s.upgrade_metadata(PATH).await.unwrap();
  let xml = s.export_metadata(PATH).await.unwrap().unwrap();
  assert!(xml.starts_with("<metadata><Esri><ArcGISFormat>1.0</ArcGISFormat></Esri>"));
}

#[tokio::test]
async fn mail_is_queued() {
  let s = store().await;
  let message = MailMessage {
    subject: "Address Publication: Issues".into(),
    recipients: "a@lane.test;b@lane.test".into(),
    body: "<table></table>".into(),
    body_format: BodyFormat::Html,
    ..MailMessage::default()
  };
  s.send_email(&message).await.unwrap();
  assert_eq!(s.queued_mail().await.unwrap(), vec![message]);
}
