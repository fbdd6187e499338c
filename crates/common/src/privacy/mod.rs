//! Privacy helpers
//!
//! Secrets that must be compared later but never stored in the clear (such
//! as validation codes) are reduced to salted digests here.

pub mod hasher;

pub use hasher::SecureHasher;
