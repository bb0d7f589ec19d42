//! Collective completion steps: small all-to-all helpers and the shared-node
//! halo summation built on them.

pub mod halo_exchange;
pub mod size_exchange;

pub use halo_exchange::{HALO_TAG, HaloExchanger};
pub use size_exchange::{all_gather_u64, exchange_all_bytes};
