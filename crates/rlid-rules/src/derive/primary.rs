//! Primary-account and primary-owner selection for a taxlot.
//!
//! Candidates are narrowed in passes: highest value, then highest acreage,
//! then lowest numeric id. Each pass only breaks the ties the previous one
//! left.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub id:      String,
  pub value:   Option<f64>,
  pub acreage: Option<f64>,
}

impl Candidate {
  pub fn new(id: &str, value: Option<f64>, acreage: Option<f64>) -> Self {
    Self { id: id.to_owned(), value, acreage }
  }
}

/// Larger first; absent values last.
fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
  match (a, b) {
    (Some(a), Some(b)) => b.total_cmp(&a),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}

/// Numeric ids ascending, then non-numeric ids lexically.
fn by_id(a: &str, b: &str) -> Ordering {
  match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
    (Ok(x), Ok(y)) => x.cmp(&y),
    (Ok(_), Err(_)) => Ordering::Less,
    (Err(_), Ok(_)) => Ordering::Greater,
    (Err(_), Err(_)) => a.cmp(b),
  }
}

fn pick(candidates: &[Candidate]) -> Option<&Candidate> {
  candidates.iter().min_by(|a, b| {
    descending(a.value, b.value)
      .then_with(|| descending(a.acreage, b.acreage))
      .then_with(|| by_id(&a.id, &b.id))
  })
}

/// The account that represents a taxlot with several.
pub fn primary_account(accounts: &[Candidate]) -> Option<&Candidate> { pick(accounts) }

/// The owner listed first for a taxlot with several.
pub fn primary_owner(owners: &[Candidate]) -> Option<&Candidate> { pick(owners) }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn value_wins_first() {
    let accounts = [
      Candidate::new("0200", Some(100.0), Some(9.0)),
      Candidate::new("0100", Some(250.0), Some(1.0)),
    ];
    assert_eq!(primary_account(&accounts).unwrap().id, "0100");
  }

  #[test]
  fn acreage_then_id_break_ties() {
    let accounts = [
      Candidate::new("30", Some(100.0), Some(1.0)),
      Candidate::new("20", Some(100.0), Some(2.0)),
      Candidate::new("10", Some(100.0), Some(2.0)),
    ];
    assert_eq!(primary_account(&accounts).unwrap().id, "10");

    let owners = [Candidate::new("9", None, None), Candidate::new("12", None, None), Candidate::new("B", None, None)];
    assert_eq!(primary_owner(&owners).unwrap().id, "9");
  }

  #[test]
  fn unvalued_candidates_lose_and_empty_lists_pick_nothing() {
    let accounts = [Candidate::new("1", None, Some(50.0)), Candidate::new("2", Some(0.0), None)];
    assert_eq!(primary_account(&accounts).unwrap().id, "2");
    assert!(primary_owner(&[]).is_none());
  }
}
