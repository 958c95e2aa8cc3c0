//! # Labform
//!
//! Labform provisions and tears down the cloud infrastructure used by course
//! exercises. Each exercise declares a static map of "resource name → desired
//! configuration" per resource kind, and labform performs `create`, `list` and
//! `delete` against the provider with a thin SDK client.
//!
//! ## Concepts
//!
//! - **Service**: one resource kind on the provider (IAM policies, IAM roles,
//!   KMS keys, ...). A [`Service`] knows how to list every resource of its kind
//!   and how to create or delete a single named resource.
//! - **Config**: a [`Config`] pairs a service with its definitions and a cache
//!   of the remote state. A `dirty` flag decides when the cache must be
//!   re-fetched from the provider. `create` is idempotent: names that already
//!   exist remotely are skipped. `delete` acts unconditionally and lets the
//!   provider report resources that do not exist.
//! - **Project**: a [`Project`] groups several configs under one provider
//!   session, which may be a session obtained by assuming an IAM role.
//!
//! There is no dependency graph and no reconciliation: definitions are applied
//! in the order the program registers them, and every operation is a single
//! round of calls to the provider.
//!
//! ## Error Handling
//!
//! Labform exposes one error enum [`Error`]. Failures of individual resources
//! during `create` and `delete` do not abort the run, they are recorded as
//! [`Status::Failed`] entries of the returned [`Report`].

pub mod aws;
pub mod config;
pub mod project;
pub mod report;
#[cfg(test)]
mod test;
pub mod utils;

pub use config::{Config, Definitions, Removal, ResourceAttributes, Service};
pub use project::Project;
pub use report::{Entry, Listing, Report, Status};

/// Marker trait for errors produced by service implementations.
pub trait UserError: core::fmt::Display + core::fmt::Debug + 'static {}
impl<T: core::fmt::Display + core::fmt::Debug + 'static> UserError for T {}

/// Top-level error enum that encompasses all errors.
#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{source}:\n{}",
                source.chain()
                    .skip(1)
                    .map(|e| format!("{e}"))
                    .collect::<Vec<_>>()
                    .join("\n -> ")))]
    Aws { source: anyhow::Error },

    #[snafu(display("Failure in refreshing the {kind} resource list: {error:#}"))]
    Refresh {
        kind: &'static str,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Could not find {kind} resource '{name}'"))]
    MissingResource { kind: &'static str, name: String },

    #[snafu(display("No {kind} configuration has been added to project '{project}'"))]
    UnknownConfig { project: String, kind: String },

    #[snafu(display("Could not serialize {kind} attributes of '{name}': {source}"))]
    Serialize {
        kind: &'static str,
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not read manifest '{path:?}': {source}"))]
    ManifestRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse TOML manifest '{path:?}': {source}"))]
    ManifestToml {
        path: std::path::PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Could not parse JSON manifest '{path:?}': {source}"))]
    ManifestJson {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Could not find role '{role}' to assume for project '{project}'"))]
    MissingRole { project: String, role: String },

    #[snafu(display("Error during '{name}' encryption: {error:#}"))]
    Encrypt {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Error during '{name}' decryption: {error:#}"))]
    Decrypt {
        name: String,
        error: Box<dyn UserError>,
    },
}

impl From<anyhow::Error> for Error {
    fn from(source: anyhow::Error) -> Self {
        Error::Aws { source }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The three operations every exercise supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Delete,
    List,
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Delete => "delete",
            Action::List => "list",
        })
    }
}

impl core::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "delete" => Ok(Action::Delete),
            "list" => Ok(Action::List),
            other => Err(format!("unknown action '{other}', expected create|delete|list")),
        }
    }
}
