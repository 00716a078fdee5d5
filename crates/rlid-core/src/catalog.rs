//! The dataset catalog: a process-wide, immutable registry of descriptors.
//!
//! Built once at the entry point ([`Catalog::standard`]) and handed to every
//! ETL by reference. Lookups never have side effects.

use std::collections::BTreeMap;

use crate::{
  Error, Result,
  dataset::{DatasetDescriptor, Field, FieldType, PathValue},
  geometry::GeometryType,
};

/// Conventional path tags.
pub mod tags {
  pub const MAINT: &str = "maint";
  pub const PUB: &str = "pub";
  pub const SOURCE: &str = "source";
  pub const INSERTS: &str = crate::dataset::INSERTS_TAG;
  pub const CURRENT: &str = "current";
  pub const MASTER: &str = "master";
  pub const WAREHOUSE: &str = "warehouse";
  pub const LAST_LOAD: &str = "last_load";
}

/// Keys of the datasets in [`Catalog::standard`].
pub mod keys {
  pub const SITE_ADDRESS: &str = "site_address";
  pub const ADDRESS_ISSUES: &str = "address_issues";
  pub const ROAD: &str = "road";
  pub const ROAD_ISSUES: &str = "road_issues";
  pub const STREET_NAME_CITY: &str = "street_name_city";
  pub const EMERGENCY_SERVICE_ZONE: &str = "emergency_service_zone";
  pub const FIRE_DISTRICT: &str = "fire_district";
  pub const FIRE_STATION: &str = "fire_station";
  pub const TAXLOT: &str = "taxlot";
  pub const ZONING: &str = "zoning";
  pub const ZIP_CODE_AREA: &str = "zip_code_area";
  pub const MSAG_RANGE: &str = "msag_range";
  pub const ETL_JOB: &str = "etl_job";
  pub const ETL_JOB_HISTORY: &str = "etl_job_history";
  pub const ETL_BATCH: &str = "etl_batch";
  pub const DATASET_UPDATE: &str = "dataset_update";
  pub const METADATA_RECORD: &str = "metadata_record";
  pub const TAXMAP_ARCHIVE: &str = "taxmap_archive";
  pub const TAXMAP_IMAGE_UPDATE: &str = "taxmap_image_update";
}

/// Tag order tried by [`Catalog::path`] when no tag is given.
const DEFAULT_TAGS: [&str; 3] = [tags::PUB, tags::MAINT, tags::SOURCE];

#[derive(Debug, Clone, Default)]
pub struct Catalog {
  datasets: BTreeMap<String, DatasetDescriptor>,
}

impl Catalog {
  pub fn new() -> Self { Self::default() }

  /// Add a descriptor after checking its invariants.
  pub fn register(&mut self, descriptor: DatasetDescriptor) -> Result<()> {
    descriptor.validate()?;
    self.datasets.insert(descriptor.key.clone(), descriptor);
    Ok(())
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> { self.datasets.keys().map(String::as_str) }

  pub fn describe(&self, key: &str) -> Result<&DatasetDescriptor> {
    self.datasets.get(key).ok_or_else(|| Error::UnknownDataset(key.to_owned()))
  }

  pub fn field(&self, key: &str, name: &str) -> Result<&Field> {
    self.describe(key)?.fields.iter().find(|f| f.name == name).ok_or_else(|| {
      Error::UnknownField { dataset: key.to_owned(), field: name.to_owned() }
    })
  }

  /// Attribute field names (geometry excluded) in declaration order,
  /// optionally restricted to those carrying `tag`.
  pub fn field_names(&self, key: &str, tag: Option<&str>) -> Result<Vec<String>> {
    let d = self.describe(key)?;
    let names: Vec<String> = d
      .fields_tagged(tag)
      .into_iter()
      .filter(|f| f.kind != FieldType::Geometry)
      .map(|f| f.name.clone())
      .collect();
    match tag {
      Some(t) if names.is_empty() => {
        Err(Error::UnknownTag { dataset: key.to_owned(), tag: t.to_owned() })
      }
      _ => Ok(names),
    }
  }

  pub fn id_field_names(&self, key: &str) -> Result<Vec<String>> {
    Ok(self.describe(key)?.fields.iter().filter(|f| f.is_id).map(|f| f.name.clone()).collect())
  }

  /// The scalar path stored under `tag`; without a tag the first of
  /// `pub`, `maint`, `source` that exists.
  pub fn path(&self, key: &str, tag: Option<&str>) -> Result<String> {
    let d = self.describe(key)?;
    let found = match tag {
      Some(t) => d.paths.get(t),
      None => DEFAULT_TAGS.iter().find_map(|t| d.paths.get(*t)),
    };
    match found {
      Some(PathValue::Scalar(p)) => Ok(p.clone()),
      _ => Err(Error::UnknownTag {
        dataset: key.to_owned(),
        tag:     tag.unwrap_or("<default>").to_owned(),
      }),
    }
  }

  /// All paths under `tag`; scalar tags yield a single entry.
  pub fn paths(&self, key: &str, tag: &str) -> Result<Vec<String>> {
    match self.describe(key)?.paths.get(tag) {
      Some(PathValue::Scalar(p)) => Ok(vec![p.clone()]),
      Some(PathValue::List(ps)) => Ok(ps.clone()),
      None => Err(Error::UnknownTag { dataset: key.to_owned(), tag: tag.to_owned() }),
    }
  }

  /// Keys of datasets that carry a path under `tag`.
  pub fn keys_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .datasets
      .values()
      .filter(move |d| d.paths.contains_key(tag))
      .map(|d| d.key.as_str())
  }

  /// The land-information datasets this engine maintains or reads.
  pub fn standard() -> Self {
    let datasets = [
      site_address(),
      address_issues(),
      road(),
      road_issues(),
      street_name_city(),
      emergency_service_zone(),
      fire_district(),
      fire_station(),
      taxlot(),
      zoning(),
      zip_code_area(),
      msag_range(),
      etl_job(),
      etl_job_history(),
      etl_batch(),
      dataset_update(),
      metadata_record(),
      taxmap_archive(),
      taxmap_image_update(),
    ];
    Self { datasets: datasets.into_iter().map(|d| (d.key.clone(), d)).collect() }
  }
}

// ─── Standard descriptors ────────────────────────────────────────────────────

const BOTH: &[&str] = &[tags::MAINT, tags::PUB];
const MAINT_ONLY: &[&str] = &[tags::MAINT];
const PUB_ONLY: &[&str] = &[tags::PUB];

fn long(name: &str) -> Field { Field::new(name, FieldType::Long) }

fn date(name: &str) -> Field { Field::new(name, FieldType::Date) }

fn guid(name: &str) -> Field { Field::new(name, FieldType::Guid) }

fn site_address() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::SITE_ADDRESS, GeometryType::Point)
    .field(guid("site_address_gfid").id().tagged(BOTH))
    .field(long("geofeat_id").tagged(BOTH))
    .field(long("house_nbr").tagged(BOTH))
    .field(Field::text("house_suffix_code", 3).tagged(BOTH))
    .field(Field::text("pre_direction_code", 2).tagged(BOTH))
    .field(Field::text("street_name", 64).tagged(BOTH))
    .field(Field::text("street_type_code", 4).tagged(BOTH))
    .field(Field::text("suffix_direction_code", 2).tagged(BOTH))
    .field(Field::text("unit_type_code", 4).tagged(BOTH))
    .field(Field::text("unit_id", 8).tagged(BOTH))
    .field(Field::text("concat_address", 128).tagged(PUB_ONLY))
    .field(Field::text("city_name", 32).tagged(BOTH))
    .field(Field::text("zip_code", 5).tagged(BOTH))
    .field(Field::text("landuse", 4).tagged(BOTH))
    .field(Field::new("infill_code", FieldType::Short).tagged(BOTH))
    .field(Field::text("structure_type", 16).tagged(BOTH))
    .field(Field::text("drive_id", 16).tagged(BOTH))
    .field(Field::text("valid", 1).tagged(MAINT_ONLY))
    .field(Field::text("archived", 1).tagged(BOTH))
    .field(Field::text("confidence", 1).tagged(MAINT_ONLY))
    .field(Field::text("location", 16).tagged(MAINT_ONLY))
    .field(Field::text("maptaxlot", 13).tagged(BOTH))
    .field(Field::text("account", 7).tagged(BOTH))
    .field(long("esn").tagged(PUB_ONLY))
    .field(Field::text("fire_district", 32).tagged(PUB_ONLY))
    .field(date("initial_create_date").tagged(BOTH))
    .field(date("last_update_date").tagged(BOTH))
    .path(tags::MAINT, "Addressing.dbo.SiteAddress")
    .path(tags::PUB, "RLIDGeo.dbo.SiteAddress")
}

fn address_issues() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ADDRESS_ISSUES, GeometryType::None)
    .field(guid("site_address_gfid").id())
    .field(Field::text("description", 256).id())
    .field(Field::text("ok_to_publish", 1).not_null())
    .field(Field::text("maint_notes", 256))
    .field(date("maint_init_date"))
    .field(Field::text("concat_address", 128))
    .field(Field::text("city_name", 32))
    .path(tags::MAINT, "Addressing.dbo.Issues_SiteAddress")
}

fn road() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ROAD, GeometryType::Polyline)
    .field(guid("road_segment_gfid").id().tagged(BOTH))
    .field(long("seg_id").tagged(BOTH))
    .field(Field::text("pre_direction_code", 2).tagged(BOTH))
    .field(Field::text("street_name", 64).tagged(BOTH))
    .field(Field::text("street_type_code", 4).tagged(BOTH))
    .field(Field::text("suffix_direction_code", 2).tagged(BOTH))
    .field(Field::text("rlid_name", 80).tagged(PUB_ONLY))
    .field(Field::text("functional_class", 2).tagged(MAINT_ONLY))
    .field(Field::new("cclass", FieldType::Short).tagged(BOTH))
    .field(Field::text("owner", 8).tagged(BOTH))
    .field(Field::text("paved", 1).tagged(BOTH))
    .field(Field::text("ugb_city", 3).tagged(BOTH))
    .field(Field::text("mailing_city", 32).tagged(BOTH))
    .field(long("left_from_address").tagged(BOTH))
    .field(long("left_to_address").tagged(BOTH))
    .field(long("right_from_address").tagged(BOTH))
    .field(long("right_to_address").tagged(BOTH))
    .field(long("from_node_id").tagged(BOTH))
    .field(long("to_node_id").tagged(BOTH))
    .field(Field::text("one_way", 2).tagged(BOTH))
    .field(Field::new("speed_limit", FieldType::Short).tagged(BOTH))
    .field(Field::text("is_general_arterial", 1).tagged(PUB_ONLY))
    .field(date("last_update_date").tagged(BOTH))
    .path(tags::MAINT, "Roads.dbo.RoadSegment")
    .path(tags::PUB, "RLIDGeo.dbo.Road")
    .path(tags::WAREHOUSE, "RLID.dbo.Road")
    .path(tags::LAST_LOAD, "RLID.dbo.Road_LastLoad")
}

fn road_issues() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ROAD_ISSUES, GeometryType::None)
    .field(guid("road_segment_gfid").id())
    .field(Field::text("description", 256).id())
    .field(Field::text("ok_to_publish", 1).not_null())
    .field(Field::text("maint_notes", 256))
    .field(date("maint_init_date"))
    .field(long("seg_id"))
    .field(Field::text("street_name", 64))
    .path(tags::MAINT, "Roads.dbo.Issues_RoadSegment")
}

fn street_name_city() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::STREET_NAME_CITY, GeometryType::None)
    .field(Field::text("pre_direction_code", 2))
    .field(Field::text("street_name", 64).id())
    .field(Field::text("street_type_code", 4))
    .field(Field::text("city_name", 32).id())
    .path(tags::SOURCE, "Addressing.dbo.StreetNameCity")
}

fn emergency_service_zone() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::EMERGENCY_SERVICE_ZONE, GeometryType::Polygon)
    .field(long("esn").id())
    .field(Field::text("fire_agency", 32))
    .path(tags::SOURCE, "Addressing.dbo.EmergencyServiceZone")
}

fn fire_district() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::FIRE_DISTRICT, GeometryType::Polygon)
    .field(Field::text("district_name", 32).id())
    .path(tags::SOURCE, "Districts.dbo.FireProtectionDistrict")
}

fn fire_station() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::FIRE_STATION, GeometryType::Point)
    .field(Field::text("station_id", 8).id())
    .field(Field::text("station_name", 64))
    .path(tags::SOURCE, "Districts.dbo.FireStation")
}

fn taxlot() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::TAXLOT, GeometryType::Polygon)
    .field(Field::text("maptaxlot", 13).id().tagged(PUB_ONLY))
    .field(Field::text("maptaxlot_hyphen", 17).tagged(PUB_ONLY))
    .field(Field::text("account", 7).tagged(PUB_ONLY))
    .field(Field::new("acreage", FieldType::Double).tagged(PUB_ONLY))
    .field(Field::text("tca", 8).tagged(PUB_ONLY))
    .path(tags::PUB, "RLIDGeo.dbo.Taxlot")
    .path(tags::WAREHOUSE, "RLID.dbo.Taxlot")
    .path(tags::LAST_LOAD, "RLID.dbo.Taxlot_LastLoad")
}

fn zoning() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ZONING, GeometryType::Polygon)
    .field(long("zoning_id").id().tagged(PUB_ONLY))
    .field(Field::text("zoning_code", 16).tagged(PUB_ONLY))
    .field(Field::text("zoning_name", 64).tagged(PUB_ONLY))
    .field(Field::text("city_name", 32).tagged(PUB_ONLY))
    .path(tags::PUB, "RLIDGeo.dbo.Zoning")
    .path(tags::WAREHOUSE, "RLID.dbo.Zoning")
}

fn zip_code_area() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ZIP_CODE_AREA, GeometryType::Polygon)
    .field(Field::text("zip_code", 5).id().tagged(PUB_ONLY))
    .field(Field::text("postal_city", 32).tagged(PUB_ONLY))
    .path(tags::PUB, "RLIDGeo.dbo.ZIPCodeArea")
    .path(tags::WAREHOUSE, "RLID.dbo.ZIPCodeArea")
}

fn msag_range() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::MSAG_RANGE, GeometryType::Polygon)
    .field(guid("msag_id").id())
    .field(long("emergency_service_number"))
    .field(Field::text("parity_code", 1))
    .field(long("from_structure_number"))
    .field(long("to_structure_number"))
    .field(Field::text("prefix_direction", 2))
    .field(Field::text("street_name", 64))
    .field(Field::text("street_type", 4))
    .field(Field::text("suffix_direction", 2))
    .field(Field::text("postal_community", 32))
    .field(date("effective_date"))
    .field(date("expiration_date"))
    .path(tags::MASTER, "Addressing.dbo.MSAG_Range")
    .path(tags::CURRENT, "Addressing.dbo.MSAG_Range_Current")
}

fn etl_job() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ETL_JOB, GeometryType::None)
    .field(guid("job_id").id())
    .field(Field::text("job_name", 64).not_null())
    .field(guid("batch_id"))
    .path(tags::SOURCE, "ETL.dbo.Metadata_ETL_Job")
}

fn etl_job_history() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ETL_JOB_HISTORY, GeometryType::None)
    .field(guid("etl_job_history_id").id())
    .field(guid("job_id"))
    .field(Field::text("job_name", 64))
    .field(date("start_time"))
    .field(date("end_time"))
    .field(Field::new("job_status", FieldType::Short))
    .path(tags::SOURCE, "ETL.dbo.Metadata_ETL_Job_History")
}

fn etl_batch() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::ETL_BATCH, GeometryType::None)
    .field(guid("batch_id").id())
    .field(Field::text("batch_name", 64))
    .field(Field::text("notification_email_recipients", 1024))
    .path(tags::SOURCE, "ETL.dbo.Metadata_ETL_Batch")
}

fn dataset_update() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::DATASET_UPDATE, GeometryType::None)
    .field(guid("update_id").id())
    .field(Field::text("dataset_name", 128))
    .field(date("checked"))
    .field(long("deleted_row_count"))
    .field(long("inserted_row_count"))
    .field(long("altered_row_count"))
    .field(long("unchanged_row_count"))
    .field(long("total_row_count"))
    .field(long("updated_row_count"))
    .path(tags::SOURCE, "RLID.dbo.Metadata_Dataset_Update")
}

fn metadata_record() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::METADATA_RECORD, GeometryType::None)
    .field(Field::text("record_id", 38).id())
    .field(Field::text("title", 256))
    .field(Field::text("approval_status", 16))
    .field(Field::text("dataset_path", 512))
    .field(Field::new("xml", FieldType::Text))
    .field(date("update_date"))
    .field(date("input_date"))
    .path(tags::SOURCE, "Metadata.dbo.Metadata_Record")
}

fn taxmap_archive() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::TAXMAP_ARCHIVE, GeometryType::None)
    .field(Field::text("archive_file_name", 64).id())
    .field(Field::text("source_file_name", 64))
    .field(date("archive_date"))
    .path(tags::SOURCE, "RLID.dbo.Taxmap_Archive")
}

fn taxmap_image_update() -> DatasetDescriptor {
  DatasetDescriptor::new(keys::TAXMAP_IMAGE_UPDATE, GeometryType::None)
    .field(Field::text("file_name", 64).id())
    .field(date("release_date"))
    .path(tags::SOURCE, "RLID.dbo.Taxmap_Image_Update")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn standard_descriptors_are_valid() {
    let catalog = Catalog::standard();
    for key in catalog.keys() {
      catalog.describe(key).unwrap().validate().unwrap();
    }
  }

  #[test]
  fn id_fields_are_never_nullable() {
    let catalog = Catalog::standard();
    for key in catalog.keys() {
      for f in &catalog.describe(key).unwrap().fields {
        assert!(!f.is_id || !f.is_nullable, "{key}.{}", f.name);
      }
    }
  }

  #[test]
  fn lookups_fail_with_named_errors() {
    let catalog = Catalog::standard();
    assert!(matches!(catalog.describe("nope"), Err(Error::UnknownDataset(_))));
    assert!(matches!(
      catalog.path(keys::SITE_ADDRESS, Some("warehouse")),
      Err(Error::UnknownTag { .. })
    ));
    assert!(matches!(
      catalog.field(keys::SITE_ADDRESS, "nope"),
      Err(Error::UnknownField { .. })
    ));
  }

  #[test]
  fn tagged_field_names_keep_declaration_order() {
    let catalog = Catalog::standard();
    let maint_only = catalog.field_names(keys::SITE_ADDRESS, Some(tags::MAINT)).unwrap();
    assert_eq!(maint_only[0], "site_address_gfid");
    assert!(maint_only.contains(&"archived".to_owned()));
    assert!(!maint_only.contains(&"concat_address".to_owned()));
    assert_eq!(
      catalog.id_field_names(keys::ADDRESS_ISSUES).unwrap(),
      vec!["site_address_gfid", "description"]
    );
  }

  #[test]
  fn default_path_prefers_publication() {
    let catalog = Catalog::standard();
    assert_eq!(catalog.path(keys::SITE_ADDRESS, None).unwrap(), "RLIDGeo.dbo.SiteAddress");
    assert_eq!(
      catalog.path(keys::STREET_NAME_CITY, None).unwrap(),
      "Addressing.dbo.StreetNameCity"
    );
  }
}
