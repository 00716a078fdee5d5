//! Derivation rules: pure functions from maintained attributes to published
//! ones.

pub mod arterial;
pub mod cclass;
pub mod primary;
pub mod road_name;

pub use arterial::{ArterialTable, is_general_arterial};
pub use cclass::{CclassTables, cartographic_class};
pub use primary::{Candidate, primary_account, primary_owner};
pub use road_name::rlid_road_name;
