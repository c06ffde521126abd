pub mod consts;
pub mod errors;
pub mod utils;
pub mod filter;
pub mod allowlist;

pub use allowlist::{KeyGate, KeyList};
pub use consts::HashScheme;
pub use errors::{Result, SieveError};
pub use filter::{BloomFilter, FilterParams};
