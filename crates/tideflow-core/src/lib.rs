#![forbid(unsafe_code)]

//! Fine-grained incremental dataflow.
//!
//! Structured state lives in reactive [`Record`]s and [`List`]s. Computations
//! are [`Node`]s registered on a [`Scope`]; while a node evaluates, every
//! tracked read subscribes it to the [`Channel`] behind that read. A write
//! notifies the channel, the channel triggers its subscribers, and the
//! [`scheduler`] batches the triggered nodes and re-runs each exactly once,
//! framework-origin nodes first, until nothing is pending.
//!
//! ```ignore
//! use tideflow_core::{Record, Scope, Value, runtime};
//!
//! let scope = Scope::new("counter", Record::from_entries([("a", Value::from(1))]));
//! let node = scope
//!     .node("a + 1", |s| Ok(Value::from(s.get("a").as_i64().unwrap_or(0) + 1)))
//!     .callback(|new, old| println!("{old:?} -> {new:?}"))
//!     .build();
//! scope.set("a", Value::from(5));
//! runtime::tick(); // prints "Int(2) -> Int(6)"
//! ```
//!
//! # Threading
//!
//! All engine state is thread-local and every handle is `Rc`-based, so the
//! engine is `!Send` by construction. Each thread drives its own runtime.

pub mod channel;
pub mod computed;
pub mod config;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod node;
pub mod runtime;
pub mod scheduler;
pub mod scope;
pub mod value;

pub use channel::{Channel, ChannelId};
pub use computed::Computed;
pub use config::{Config, ConfigError, ConfigResult};
pub use container::{
    Container, List, Locate, MAX_SET_AT_GROWTH, Record, observe, observe_with_owner,
};
pub use diagnostics::{Diagnostic, DiagnosticsSink, RecordingSink, TracingSink};
pub use error::{EvalError, ReactiveError};
pub use executor::{Executor, Task, TickQueue};
pub use node::{Node, NodeBuilder, NodeFlags, NodeId};
pub use scheduler::{Origin, flush};
pub use scope::{Scope, ScopeId, WatchOptions};
pub use value::Value;
