//! Glance Widget
//!
//! This crate contains the serializable widget types shared across the
//! scheduler, the script runtime and the CRUD collaborators:
//!
//! - [`WidgetDefinition`]: the reusable script + parameter schema a widget
//!   instance is based on
//! - [`WidgetInstance`]: one placed, configured occurrence of a definition
//!   on a dashboard grid
//! - [`ConfigMap`]: ordered `key=value` configuration attached to an instance
//! - [`ParamSpec`] / [`ParamType`]: the parameter schema, including which
//!   values are secret
//!
//! Definitions can be loaded from JSON files (via the CLI) or from database
//! storage (as JSON blobs). Execution state does not live here; see the
//! instance state store.

mod config;
mod dashboard;
mod definition;
mod instance;
mod param;

pub use config::ConfigMap;
pub use dashboard::DashboardDef;
pub use definition::{ConfigError, WidgetDefinition};
pub use instance::WidgetInstance;
pub use param::{ParamSpec, ParamType};
