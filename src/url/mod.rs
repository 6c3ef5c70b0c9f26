//! URL handling module for Sumi-Fleet
//!
//! This module provides domain and origin derivation, link resolution, and
//! spider-trap detection.

mod domain;
mod normalize;
mod trap;

pub use domain::{domain_of, extract_domain, origin_key};
pub use normalize::resolve_link;
pub use trap::is_spider_trap;
