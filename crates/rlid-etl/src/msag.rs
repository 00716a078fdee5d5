//! MSAG range synthesis.
//!
//! Published address points are grouped into runs of consecutive house
//! numbers sharing community, street and emergency service number. Each run
//! becomes a current range. The toggle phase then folds the current ranges
//! into the historized master: retired ranges get an expiration date,
//! reshaped ones get their new geometry and new ones are inserted.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDateTime, NaiveTime};
use strum::{Display, EnumString};
use tracing::{info, warn};
use uuid::Uuid;

use rlid_core::{
  catalog::{keys, tags},
  geometry::{Geometry, Point, convex_buffer, hull_rectangle},
  mail::Mailer,
  record::Record,
  store::{GisStore, ReadQuery},
};
use rlid_gis::cursor::{self, GEOMETRY_TOLERANCE, ensure_dataset};

use crate::{
  EtlContext, Result,
  config::{GeometryStyle, MsagConfig},
  notify::Email,
};

/// Street names that are highway mileposts rather than addresses.
const MILEPOST_PREFIXES: &[&str] = &["MILEPOST", "MP "];

/// Vertices per buffered hull corner.
const BUFFER_SEGMENTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Parity {
  #[strum(serialize = "O")]
  Odd,
  #[strum(serialize = "E")]
  Even,
  #[strum(serialize = "B")]
  Both,
}

impl Parity {
  /// `None` for an empty list.
  pub fn of(numbers: &[i64]) -> Option<Self> {
    let odd = numbers.iter().filter(|n| *n % 2 != 0).count();
    match (odd, numbers.len()) {
      (_, 0) => None,
      (o, n) if o == n => Some(Self::Odd),
      (0, _) => Some(Self::Even),
      _ => Some(Self::Both),
    }
  }
}

/// The identity of a range: community, street parts and ESN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeKey {
  pub community:        String,
  pub pre_direction:    Option<String>,
  pub street_name:      String,
  pub street_type:      Option<String>,
  pub suffix_direction: Option<String>,
  pub esn:              Option<i64>,
}

fn text(r: &Record, name: &str) -> Option<String> {
  r.text(name).map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

/// One address point that qualifies for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressPoint {
  pub key:       RangeKey,
  pub house_nbr: i64,
  pub point:     Point,
}

impl AddressPoint {
  /// `None` for archived, unnumbered, unnamed, milepost or unlocated
  /// addresses.
  pub fn from_record(r: &Record) -> Option<Self> {
    if r.text("archived") == Some("Y") {
      return None;
    }
    let house_nbr = r.int("house_nbr").filter(|n| *n > 0)?;
    let street_name = text(r, "street_name")?;
    if MILEPOST_PREFIXES.iter().any(|p| street_name.to_uppercase().starts_with(p)) {
      return None;
    }
    let key = RangeKey {
      community: text(r, "city_name")?,
      pre_direction: text(r, "pre_direction_code"),
      street_name,
      street_type: text(r, "street_type_code"),
      suffix_direction: text(r, "suffix_direction_code"),
      esn: r.int("esn"),
    };
    let point = r.shape.as_ref()?.centroid()?;
    Some(Self { key, house_nbr, point })
  }

  /// Synthesis order: street identity, then house number, then ESN.
  fn sort_key(&self) -> (&str, &Option<String>, &str, &Option<String>, &Option<String>, i64, Option<i64>) {
    let k = &self.key;
    (&k.community, &k.pre_direction, &k.street_name, &k.street_type, &k.suffix_direction, self.house_nbr, k.esn)
  }
}

// ─── Ranges ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MsagRange {
  pub msag_id:         Uuid,
  pub key:             RangeKey,
  pub parity:          Parity,
  pub from:            i64,
  pub to:              i64,
  pub effective_date:  Option<NaiveDateTime>,
  pub expiration_date: Option<NaiveDateTime>,
  pub shape:           Option<Geometry>,
  /// Row id when read from a dataset.
  pub oid:             Option<i64>,
}

impl MsagRange {
  pub fn from_record(r: &Record) -> Option<Self> {
    Some(Self {
      msag_id:         r.get("msag_id").as_guid()?,
      key:             RangeKey {
        community:        text(r, "postal_community").unwrap_or_default(),
        pre_direction:    text(r, "prefix_direction"),
        street_name:      text(r, "street_name").unwrap_or_default(),
        street_type:      text(r, "street_type"),
        suffix_direction: text(r, "suffix_direction"),
        esn:              r.int("emergency_service_number"),
      },
      parity:          r.text("parity_code").and_then(|p| p.parse().ok()).unwrap_or(Parity::Both),
      from:            r.int("from_structure_number").unwrap_or_default(),
      to:              r.int("to_structure_number").unwrap_or_default(),
      effective_date:  r.date("effective_date"),
      expiration_date: r.date("expiration_date"),
      shape:           r.shape.clone(),
      oid:             r.oid,
    })
  }

  pub fn to_record(&self) -> Record {
    let k = &self.key;
    let record = Record::new()
      .with("msag_id", self.msag_id)
      .with("emergency_service_number", k.esn)
      .with("parity_code", self.parity.to_string())
      .with("from_structure_number", self.from)
      .with("to_structure_number", self.to)
      .with("prefix_direction", k.pre_direction.clone())
      .with("street_name", k.street_name.as_str())
      .with("street_type", k.street_type.clone())
      .with("suffix_direction", k.suffix_direction.clone())
      .with("postal_community", k.community.as_str())
      .with("effective_date", self.effective_date)
      .with("expiration_date", self.expiration_date);
    match &self.shape {
      Some(shape) => record.with_shape(shape.clone()),
      None => record,
    }
  }

  pub fn is_expired(&self) -> bool { self.expiration_date.is_some() }
}

fn range_shape(points: &[Point], config: &MsagConfig) -> Option<Geometry> {
  match config.geometry_style {
    GeometryStyle::ConvexHull => convex_buffer(points, config.buffer_distance, BUFFER_SEGMENTS),
    GeometryStyle::HullRectangle => hull_rectangle(points),
    GeometryStyle::Multipoint => (!points.is_empty()).then(|| Geometry::MultiPoint(points.to_vec())),
  }
}

/// Group `points` into ranges. A run continues while consecutive points (in
/// synthesis order) share their key. Ids and effective dates are left for
/// [`assign_ids`].
pub fn synthesize(mut points: Vec<AddressPoint>, config: &MsagConfig) -> Vec<MsagRange> {
  points.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

  let mut runs: Vec<(RangeKey, Vec<i64>, Vec<Point>)> = Vec::new();
  for p in points {
    match runs.last_mut() {
      Some((key, numbers, pts)) if *key == p.key => {
        numbers.push(p.house_nbr);
        pts.push(p.point);
      }
      _ => runs.push((p.key, vec![p.house_nbr], vec![p.point])),
    }
  }

  runs
    .into_iter()
    .filter_map(|(key, numbers, pts)| {
      Some(MsagRange {
        msag_id: Uuid::nil(),
        parity: Parity::of(&numbers)?,
        from: *numbers.iter().min()?,
        to: *numbers.iter().max()?,
        shape: range_shape(&pts, config),
        key,
        effective_date: None,
        expiration_date: None,
        oid: None,
      })
    })
    .collect()
}

/// Carry ids and effective dates over from unexpired master ranges with the
/// same key; everything else gets a fresh id effective `today`. A master id
/// is reused at most once.
pub fn assign_ids(ranges: &mut [MsagRange], master: &[MsagRange], today: NaiveDateTime) {
  let mut open: HashMap<&RangeKey, &MsagRange> =
    master.iter().filter(|m| !m.is_expired()).map(|m| (&m.key, m)).collect();
  for range in ranges {
    match open.remove(&range.key) {
      Some(m) => {
        range.msag_id = m.msag_id;
        range.effective_date = m.effective_date.or(Some(today));
      }
      None => {
        range.msag_id = Uuid::new_v4();
        range.effective_date = Some(today);
      }
    }
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

async fn read_ranges<S: GisStore>(store: &S, path: &str) -> Result<Vec<MsagRange>> {
  Ok(store.read(path, &ReadQuery::all()).await?.iter().filter_map(MsagRange::from_record).collect())
}

fn today() -> NaiveDateTime { crate::now().date().and_time(NaiveTime::MIN) }

/// Synthesize the current ranges from the published addresses and write
/// them to the current dataset.
pub async fn synthesize_current<S: GisStore + Mailer>(ctx: &EtlContext<S>, today: NaiveDateTime) -> Result<Vec<MsagRange>> {
  let address_path = ctx.catalog.path(keys::SITE_ADDRESS, Some(tags::PUB))?;
  let master_path = ctx.catalog.path(keys::MSAG_RANGE, Some(tags::MASTER))?;
  let current_path = ctx.catalog.path(keys::MSAG_RANGE, Some(tags::CURRENT))?;
  let schema = ctx.catalog.describe(keys::MSAG_RANGE)?.schema(None);
  ensure_dataset(&ctx.store, &master_path, &schema).await?;
  ensure_dataset(&ctx.store, &current_path, &schema).await?;

  let query = ReadQuery::fields(&[
    "house_nbr",
    "pre_direction_code",
    "street_name",
    "street_type_code",
    "suffix_direction_code",
    "city_name",
    "esn",
    "archived",
  ])
  .with_shape();
  let points: Vec<AddressPoint> =
    ctx.store.read(&address_path, &query).await?.iter().filter_map(AddressPoint::from_record).collect();
  info!(addresses = points.len(), "address points selected");

  let mut ranges = synthesize(points, &ctx.config.msag);
  let master = read_ranges(&ctx.store, &master_path).await?;
  assign_ids(&mut ranges, &master, today);

  let counts = cursor::load_records(&ctx.store, &current_path, ranges.iter().map(MsagRange::to_record).collect()).await?;
  info!(ranges = ranges.len(), ?counts, "current ranges written");
  Ok(ranges)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToggleOutcome {
  pub expired:  usize,
  pub reshaped: usize,
  pub inserted: usize,
  /// The run was refused by the deviation guard; nothing was written.
  pub refused:  bool,
}

/// Fold `current` into the master ranges.
pub async fn toggle<S: GisStore + Mailer>(ctx: &EtlContext<S>, current: &[MsagRange]) -> Result<ToggleOutcome> {
  let master_path = ctx.catalog.path(keys::MSAG_RANGE, Some(tags::MASTER))?;
  let master = read_ranges(&ctx.store, &master_path).await?;
  let open: Vec<&MsagRange> = master.iter().filter(|m| !m.is_expired()).collect();

  if !open.is_empty() {
    let deviation = (current.len() as f64 - open.len() as f64).abs() / open.len() as f64;
    if deviation > ctx.config.msag.deviation_threshold {
      warn!(current = current.len(), master = open.len(), deviation, "msag deviation too large; not publishing");
      Email::new("MSAG ranges not published")
        .to(&ctx.recipients())
        .reply_to(ctx.config.mail.reply_to.as_deref())
        .text(format!(
          "The current synthesis has {} ranges against {} unexpired master ranges ({:.1}% deviation, {:.1}% allowed).",
          current.len(),
          open.len(),
          deviation * 100.0,
          ctx.config.msag.deviation_threshold * 100.0,
        ))
        .send(&ctx.store)
        .await?;
      return Ok(ToggleOutcome { refused: true, ..ToggleOutcome::default() });
    }
  }

  let by_id: HashMap<Uuid, &MsagRange> = current.iter().map(|r| (r.msag_id, r)).collect();
  let expiration = current.iter().filter_map(|r| r.effective_date).max();
  let mut outcome = ToggleOutcome::default();
  let mut updates = Vec::new();
  for m in &open {
    match by_id.get(&m.msag_id) {
      None => {
        updates.push(Record { oid: m.oid, ..Record::new() }.with("expiration_date", expiration));
        outcome.expired += 1;
      }
      Some(c) => {
        let same = match (&m.shape, &c.shape) {
          (Some(a), Some(b)) => a.approx_eq(b, GEOMETRY_TOLERANCE),
          (None, None) => true,
          _ => false,
        };
        if !same && let Some(shape) = &c.shape {
          updates.push(Record { oid: m.oid, shape: Some(shape.clone()), ..Record::new() });
          outcome.reshaped += 1;
        }
      }
    }
  }
  ctx.store.update(&master_path, updates).await?;

  let known: HashSet<Uuid> = master.iter().map(|m| m.msag_id).collect();
  let inserts: Vec<Record> = current.iter().filter(|r| !known.contains(&r.msag_id)).map(MsagRange::to_record).collect();
  outcome.inserted = ctx.store.insert(&master_path, inserts).await?;
  info!(?outcome, "master ranges toggled");
  Ok(outcome)
}

/// Synthesize the current ranges and fold them into the master.
pub async fn run<S: GisStore + Mailer>(ctx: &EtlContext<S>) -> Result<ToggleOutcome> {
  let current = synthesize_current(ctx, today()).await?;
  toggle(ctx, &current).await
}
