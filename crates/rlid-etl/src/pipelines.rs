//! The named pipelines the binary can run.

use rlid_core::{mail::Mailer, store::GisStore};

use crate::{
  etls,
  job::{Job, JobRegistry},
};

pub fn registry<S: GisStore + Mailer + 'static>() -> JobRegistry<S> {
  JobRegistry::new()
    .job(Job::new("address_publication").etl("site_address", etls::publish_site_address))
    .job(Job::new("road_publication").etl("road", etls::publish_road))
    .job(Job::new("warehouse").etl("warehouse_datasets", etls::warehouse))
    .job(
      Job::new("nightly")
        .etl("site_address", etls::publish_site_address)
        .etl("road", etls::publish_road)
        .etl("warehouse_datasets", etls::warehouse),
    )
    .job(Job::new("msag").etl("msag_ranges", etls::msag_ranges))
    .job(Job::new("metadata").etl("metadata_sync", etls::metadata_sync))
    .job(Job::new("document_repositories").etl("document_repositories", etls::document_repositories))
    .etl("batch_notification", etls::batch_notification)
}

#[cfg(test)]
mod tests {
  use rlid_store_sqlite::SqliteStore;

  use super::*;
  use crate::{Error, job::Pipeline};

  #[test]
  fn names_resolve_to_jobs_or_etls() {
    let registry = registry::<SqliteStore>();
    assert!(registry.names().any(|n| n == "nightly"));
    match registry.get("nightly").unwrap() {
      Pipeline::Job(job) => {
        let etls: Vec<_> = job.etls.iter().map(|(name, _)| *name).collect();
        assert_eq!(etls, ["site_address", "road", "warehouse_datasets"]);
      }
      Pipeline::Etl(_) => panic!("nightly is a job"),
    }
    assert!(matches!(registry.get("batch_notification"), Ok(Pipeline::Etl(_))));
    assert!(matches!(registry.get("nope"), Err(Error::UnknownPipeline(_))));
  }
}
