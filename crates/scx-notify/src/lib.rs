//! SCX Notify
//!
//! Scope-keyed publish/subscribe with **replay-latest** semantics: a
//! subscriber that arrives after a value was published immediately
//! receives that value, then every later one.
//!
//! # Example
//!
//! ```rust
//! use scx_notify::Notifier;
//! use std::sync::{Arc, Mutex};
//!
//! let notifier: Notifier<&'static str, u32> = Notifier::new();
//! notifier.publish("s1", 7);
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let _sub = notifier.subscribe("s1", move |v| sink.lock().unwrap().push(*v));
//!
//! notifier.publish("s1", 8);
//! assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod notifier;

pub use notifier::{Listener, Notifier, Subscription};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
