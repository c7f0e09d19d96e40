//! A mutex keyed by arbitrary values, with cancellable lock acquisition.
//!
//! # Overview
//! `kmutex` serializes access to a dynamically named, unbounded set of resources
//! without allocating a lock object per resource. Only the keys that are
//! currently held occupy memory.
//!
//! # Features
//! - Lock and unlock by key, `String` keys by default
//! - Cancellation and deadlines through [`Context`]
//! - Unlocking a key nobody holds is an error value, not a panic
//! - No poisoning, the lock is released normally on panic
//!
//! # Examples
//! ```
//! use kmutex::{Context, Error, KMutex};
//! use std::time::Duration;
//!
//! let km = KMutex::new();
//! let ctx = Context::background();
//!
//! km.lock(&ctx, "a".to_string()).unwrap();
//! km.lock(&ctx, "b".to_string()).unwrap();
//!
//! // "a" is held and the deadline has already passed
//! let ctx = Context::with_timeout(&ctx, Duration::ZERO);
//! assert_eq!(km.lock(&ctx, "a".to_string()), Err(Error::DeadlineExceeded));
//!
//! km.unlock("a").unwrap();
//! km.unlock("b").unwrap();
//! assert_eq!(km.unlock("a"), Err(Error::NotLocked));
//! ```
mod context;
mod error;
mod futex;
#[doc = include_str!("../README.md")]
mod kmutex;

pub use context::*;
pub use error::*;
pub use kmutex::*;
