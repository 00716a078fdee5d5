//! Road centerline publication.

use tracing::info;

use rlid_core::{
  catalog::{keys, tags},
  dataset::Field,
  mail::Mailer,
  record::{Record, Value},
  store::{GisStore, UpdateCounts},
};
use rlid_gis::cursor::{GEOMETRY_TOLERANCE, ensure_dataset};
use rlid_rules::{
  derive::{
    arterial::{ArterialTable, is_general_arterial},
    cclass::{CclassTables, cartographic_class},
    road_name::rlid_road_name,
  },
  road::{self, RoadRecord},
};

use crate::{
  EtlContext, Result,
  etls::report_blocking_issues,
  validation::{self, ValidationRun, apply_publication_sets},
  warehouse::record_update,
  workspace::{EtlWorkspace, Transform},
};

/// Attributes a [`RoadRecord`] is built from inside a transform.
const ROAD_ATTRIBUTES: &[&str] = &[
  road::ID_FIELD,
  "seg_id",
  "pre_direction_code",
  "street_name",
  "street_type_code",
  "suffix_direction_code",
  "functional_class",
  "cclass",
  "owner",
  "paved",
  "ugb_city",
  "mailing_city",
  "left_from_address",
  "left_to_address",
  "right_from_address",
  "right_to_address",
  "from_node_id",
  "to_node_id",
];

const NAME_FIELDS: &[&str] =
  &["pre_direction_code", "street_name", "street_type_code", "suffix_direction_code", "owner", "mailing_city"];

fn names(fields: &[&str]) -> Vec<String> { fields.iter().map(|f| f.to_string()).collect() }

/// Set `field` from a rule over the whole segment.
fn derive_field(field: &str, rule: impl Fn(&RoadRecord) -> Value + 'static) -> Transform {
  let arg_fields = names(ROAD_ATTRIBUTES);
  let attributes = arg_fields.clone();
  Transform::UpdateByFunction {
    field: field.to_owned(),
    func: Box::new(move |values: &[Value]| {
      let mut record = Record::new();
      for (name, value) in attributes.iter().zip(values) {
        record.set(name, value.clone());
      }
      rule(&RoadRecord::from_record(&record))
    }),
    arg_fields,
    field_as_first_arg: false,
    where_: None,
  }
}

fn transforms<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<Vec<Transform>> {
  let descriptor = ctx.catalog.describe(keys::ROAD)?;
  let published_fields: Vec<Field> = descriptor.fields_tagged(Some(tags::PUB)).into_iter().cloned().collect();
  let cclass_tables = CclassTables::standard();
  let arterials = ArterialTable::standard();
  Ok(vec![
    Transform::AddMissingFields(published_fields),
    Transform::CleanWhitespace(names(NAME_FIELDS)),
    Transform::ForceUppercase(names(NAME_FIELDS)),
    Transform::ForceYn { fields: vec!["paved".into()], default: Some("Y".into()) },
    Transform::ClearNonpositive(names(&["left_from_address", "left_to_address", "right_from_address", "right_to_address"])),
    derive_field("cclass", move |road| cartographic_class(road, &cclass_tables).into()),
    derive_field("rlid_name", |road| rlid_road_name(road).into()),
    derive_field("is_general_arterial", move |road| is_general_arterial(road, &arterials).into()),
    Transform::UpdateByNodeIds {
      from_id_field: "from_node_id".into(),
      to_id_field:   "to_node_id".into(),
      tolerance:     GEOMETRY_TOLERANCE,
    },
  ])
}

/// Derive the published road attributes, validate the segments and bring
/// the published set up to date.
pub async fn publish<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<(ValidationRun, UpdateCounts)> {
  let maint = ctx.catalog.path(keys::ROAD, Some(tags::MAINT))?;
  let published = ctx.catalog.path(keys::ROAD, Some(tags::PUB))?;
  let descriptor = ctx.catalog.describe(keys::ROAD)?;
  ensure_dataset(&ctx.store, &published, &descriptor.schema(Some(tags::PUB))).await?;

  let now = crate::now();
  let ops = transforms(ctx)?;
  let (run, counts) = EtlWorkspace::scoped(&ctx.store, "road", async |etl| {
    etl.extract(&maint, None).await?;
    etl.transform_all(ops).await?;
    let run = validation::validate_roads(&ctx.store, &ctx.catalog, etl.path(), now).await?;
    info!(summary = ?validation::summarize(&run.issues), "road validation");
    apply_publication_sets(&ctx.store, etl.path(), &published, road::ID_FIELD, &run.sets).await?;
    let counts = etl.update(&published, &[road::ID_FIELD.to_owned()], true).await?;
    Ok((run, counts))
  })
  .await?;

  record_update(&ctx.store, &ctx.catalog, keys::ROAD, &counts, false, now).await?;
  report_blocking_issues(ctx, "Road publication issues", &run).await?;
  Ok((run, counts))
}

#[cfg(test)]
mod tests {
  use rlid_core::{
    dataset::{DatasetSchema, FieldType},
    geometry::GeometryType,
    store::ReadQuery,
  };
  use rlid_rules::derive::cclass::ALLEY;
  use rlid_store_sqlite::SqliteStore;

  use super::*;

  #[tokio::test]
  async fn derived_fields_see_the_whole_segment() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let schema = DatasetSchema {
      fields:        vec![
        Field::new("street_name", FieldType::Text),
        Field::new("street_type_code", FieldType::Text),
        Field::new("rlid_name", FieldType::Text),
        Field::new("cclass", FieldType::Long),
      ],
      geometry_type: GeometryType::None,
    };
    store.create_dataset("roads", &schema).await.unwrap();
    store
      .insert("roads", vec![Record::new().with("street_name", "OAK").with("street_type_code", "ALY")])
      .await
      .unwrap();

    EtlWorkspace::scoped(&store, "derive", async |etl| {
      etl.extract("roads", None).await?;
      etl
        .transform_all(vec![
          derive_field("rlid_name", |road| rlid_road_name(road).into()),
          derive_field("cclass", |road| cartographic_class(road, &CclassTables::standard()).into()),
        ])
        .await?;
      let rows = store.read(etl.path(), &ReadQuery::all()).await?;
      assert_eq!(rows[0].text("rlid_name"), Some("Oak Aly"));
      assert_eq!(rows[0].int("cclass"), Some(ALLEY));
      Ok(())
    })
    .await
    .unwrap();
  }
}
