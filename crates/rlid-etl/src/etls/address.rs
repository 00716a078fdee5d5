//! Site address publication.

use tracing::info;

use rlid_core::{
  catalog::{keys, tags},
  dataset::Field,
  mail::Mailer,
  record::Value,
  store::{GisStore, UpdateCounts},
};
use rlid_gis::cursor::ensure_dataset;
use rlid_rules::address::{self, full_address};

use crate::{
  EtlContext, Result,
  etls::report_blocking_issues,
  validation::{self, ValidationRun, apply_publication_sets},
  warehouse::record_update,
  workspace::{EtlWorkspace, Transform},
};

/// Archived addresses never leave maintenance.
pub const ACTIVE: &str = "archived IS NULL OR archived <> 'Y'";

const TEXT_FIELDS: &[&str] = &[
  "house_suffix_code",
  "pre_direction_code",
  "street_name",
  "street_type_code",
  "suffix_direction_code",
  "unit_type_code",
  "unit_id",
  "city_name",
  "zip_code",
  "landuse",
  "structure_type",
  "drive_id",
  "maptaxlot",
  "account",
];

const UPPERCASE_FIELDS: &[&str] = &[
  "house_suffix_code",
  "pre_direction_code",
  "street_name",
  "street_type_code",
  "suffix_direction_code",
  "unit_type_code",
  "unit_id",
  "city_name",
];

/// Parts of `concat_address`, in order.
const ADDRESS_PARTS: &[&str] = &[
  "house_nbr",
  "house_suffix_code",
  "pre_direction_code",
  "street_name",
  "street_type_code",
  "suffix_direction_code",
  "unit_type_code",
  "unit_id",
];

fn names(fields: &[&str]) -> Vec<String> { fields.iter().map(|f| f.to_string()).collect() }

fn transforms<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<Vec<Transform>> {
  let descriptor = ctx.catalog.describe(keys::SITE_ADDRESS)?;
  let published_fields: Vec<Field> = descriptor.fields_tagged(Some(tags::PUB)).into_iter().cloned().collect();
  Ok(vec![
    Transform::AddMissingFields(published_fields),
    Transform::CleanWhitespace(names(TEXT_FIELDS)),
    Transform::ForceUppercase(names(UPPERCASE_FIELDS)),
    Transform::ForceYn { fields: vec!["archived".into()], default: Some("N".into()) },
    Transform::ForceYn { fields: vec!["valid".into()], default: Some("Y".into()) },
    Transform::UpdateByOverlay {
      field:              "esn".into(),
      overlay_path:       ctx.catalog.path(keys::EMERGENCY_SERVICE_ZONE, None)?,
      overlay_field:      "esn".into(),
      central_coincident: true,
      where_:             None,
    },
    Transform::UpdateByOverlay {
      field:              "fire_district".into(),
      overlay_path:       ctx.catalog.path(keys::FIRE_DISTRICT, None)?,
      overlay_field:      "district_name".into(),
      central_coincident: true,
      where_:             None,
    },
    Transform::UpdateByFunction {
      field:              "concat_address".into(),
      func:               Box::new(|parts: &[Value]| full_address(parts).into()),
      arg_fields:         names(ADDRESS_PARTS),
      field_as_first_arg: false,
      where_:             None,
    },
  ])
}

/// Validate the maintained addresses, hold back or roll back the bad ones,
/// and bring the published set up to date.
pub async fn publish<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<(ValidationRun, UpdateCounts)> {
  let maint = ctx.catalog.path(keys::SITE_ADDRESS, Some(tags::MAINT))?;
  let published = ctx.catalog.path(keys::SITE_ADDRESS, Some(tags::PUB))?;
  let descriptor = ctx.catalog.describe(keys::SITE_ADDRESS)?;
  ensure_dataset(&ctx.store, &published, &descriptor.schema(Some(tags::PUB))).await?;

  let now = crate::now();
  let ops = transforms(ctx)?;
  let (run, counts) = EtlWorkspace::scoped(&ctx.store, "site_address", async |etl| {
    etl.extract(&maint, Some(ACTIVE)).await?;
    etl.transform_all(ops).await?;
    let run = validation::validate_addresses(&ctx.store, &ctx.catalog, etl.path(), now).await?;
    info!(summary = ?validation::summarize(&run.issues), "address validation");
    apply_publication_sets(&ctx.store, etl.path(), &published, address::ID_FIELD, &run.sets).await?;
    let counts = etl.update(&published, &[address::ID_FIELD.to_owned()], true).await?;
    Ok((run, counts))
  })
  .await?;

  record_update(&ctx.store, &ctx.catalog, keys::SITE_ADDRESS, &counts, false, now).await?;
  report_blocking_issues(ctx, "Site address publication issues", &run).await?;
  Ok((run, counts))
}
