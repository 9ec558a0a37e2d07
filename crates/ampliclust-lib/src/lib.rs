//! Amplicon clustering engine.
//!
//! Groups DNA amplicons into OTUs so that every member is reachable from
//! its cluster seed through a chain of links at edit distance at most a
//! user-chosen threshold, with abundance-monotone chaining. Candidate
//! pairs come from a length-partitioned pigeonhole segment filter and are
//! confirmed by banded bounded edit-distance (or Gotoh) verification. An
//! optional fastidious phase grafts light OTUs onto heavy ones at a
//! doubled threshold.
//!
//! ```no_run
//! use ampliclust_lib::{cluster, AmpliconPools, ClusterConfig, InputRecord};
//!
//! let records = vec![
//!     InputRecord::new("a_10", b"ACGTACGT".to_vec(), 10),
//!     InputRecord::new("b_3", b"ACGTACGA".to_vec(), 3),
//! ];
//! let cfg = ClusterConfig::default();
//! let pools = AmpliconPools::build(records, cfg.threshold)?;
//! let otus = cluster(&pools, &cfg)?;
//! # anyhow::Ok(())
//! ```

pub mod amplicon;
pub mod clustering;
pub mod config;
pub mod io;
pub mod output;

pub use amplicon::{AmpliconPools, InputRecord};
pub use clustering::{cluster, Otu, OtuMember};
pub use config::{ClusterConfig, FastidiousCheckMode, FilterMode, Scoring};
