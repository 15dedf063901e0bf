//! Logical endpoint and environment identifiers.
//!
//! Both are closed sets known at configuration time, usually fieldless enums:
//!
//! ```rust
//! use api_throttle::Endpoint;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Api {
//!     Login,
//!     FooModel,
//! }
//!
//! impl Endpoint for Api {
//!     fn all() -> &'static [Self] {
//!         &[Api::Login, Api::FooModel]
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Api::Login => "Login",
//!             Api::FooModel => "FooModel",
//!         }
//!     }
//! }
//!
//! assert_eq!(Api::FooModel.path_segment(), "foomodel");
//! ```

use std::fmt::Debug;
use std::hash::Hash;

/// A named logical API operation, resolved to a path segment under the current base URL.
pub trait Endpoint: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every endpoint of the set. All-endpoint configuration calls iterate this.
    fn all() -> &'static [Self];

    fn name(&self) -> &'static str;

    /// Path segment appended to the environment base URL.
    fn path_segment(&self) -> String {
        self.name().to_lowercase()
    }
}

/// A named deployment target (dev/test/prod) mapping to a base URL.
pub trait Environment: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    fn all() -> &'static [Self];

    fn name(&self) -> &'static str;

    /// Case-insensitive lookup by name, used when loading configuration files.
    fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|env| env.name().eq_ignore_ascii_case(name))
    }
}
