//! The list/create/delete dispatcher shared by every resource kind.
use std::{collections::BTreeMap, future::Future};

use snafu::prelude::*;

use crate::{
    Action, Error, Listing, MissingResourceSnafu, Report, Result, SerializeSnafu, Status,
    UserError,
};

/// Desired configuration of each named resource of one kind.
pub type Definitions<D> = BTreeMap<String, D>;

/// Remote state of a single resource.
pub trait ResourceAttributes:
    core::fmt::Debug + Clone + serde::Serialize + serde::de::DeserializeOwned + 'static
{
    /// The provider's identifier for the resource, usually an ARN.
    fn arn(&self) -> &str;
}

/// What the provider reported when asked to delete a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    /// The resource did not exist.
    Absent,
}

/// One kind of resource on a platform (IAM policies, KMS keys, ...).
///
/// Implementations shape the request payloads. Deciding _when_ to call them is
/// left to [`Config`].
pub trait Service {
    /// Type of the platform/resource provider.
    ///
    /// For example [`crate::aws::Session`] in the case of amazon web services.
    type Provider;

    /// The desired configuration of one resource, as written in definitions.
    type Definition: core::fmt::Debug
        + Clone
        + PartialEq
        + serde::Serialize
        + serde::de::DeserializeOwned
        + 'static;

    /// Remote state of one resource.
    type Attributes: ResourceAttributes;

    /// Errors that may occur interacting with the provider.
    type Error: UserError;

    /// Name of the resource kind, used in reports and to address configs in a
    /// [`crate::Project`].
    const KIND: &'static str;

    /// Lists every resource of this kind visible to the provider, by name.
    fn do_list(
        &self,
        provider: &Self::Provider,
    ) -> impl Future<Output = Result<BTreeMap<String, Self::Attributes>, Self::Error>>;

    /// Creates the named resource.
    fn do_create(
        &self,
        provider: &Self::Provider,
        name: &str,
        definition: &Self::Definition,
    ) -> impl Future<Output = Result<Self::Attributes, Self::Error>>;

    /// Deletes the named resource.
    ///
    /// `existing` holds the cached remote state when the last listing saw the
    /// resource. It is `None` otherwise, and the implementation should still
    /// ask the provider.
    fn do_delete(
        &self,
        provider: &Self::Provider,
        name: &str,
        definition: &Self::Definition,
        existing: Option<&Self::Attributes>,
    ) -> impl Future<Output = Result<Removal, Self::Error>>;
}

/// A [`Service`] together with its definitions and a cache of the remote
/// state.
pub struct Config<S: Service> {
    service: S,
    definitions: Option<Definitions<S::Definition>>,
    resources: BTreeMap<String, S::Attributes>,
    dirty: bool,
}

impl<S: Service> Config<S> {
    /// Creates a config.
    ///
    /// Without definitions the config can still list and look up resources,
    /// but `create` and `delete` have nothing to act on.
    pub fn new(service: S, definitions: Option<Definitions<S::Definition>>) -> Self {
        Self {
            service,
            definitions,
            resources: BTreeMap::default(),
            dirty: true,
        }
    }

    pub fn kind(&self) -> &'static str {
        S::KIND
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn definitions(&self) -> Option<&Definitions<S::Definition>> {
        self.definitions.as_ref()
    }

    /// The cached remote resources, as of the last refresh.
    pub fn resources(&self) -> &BTreeMap<String, S::Attributes> {
        &self.resources
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the cache as stale, so the next lookup re-fetches it.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Re-fetches the remote resources if the cache is stale.
    pub async fn refresh(&mut self, provider: &S::Provider) -> Result<()> {
        if !self.dirty {
            log::trace!("{} resource list is up to date", S::KIND);
            return Ok(());
        }
        log::debug!("refreshing {} resource list", S::KIND);
        let resources = self
            .service
            .do_list(provider)
            .await
            .map_err(|error| Error::Refresh {
                kind: S::KIND,
                error: Box::new(error),
            })?;
        log::debug!("  found {} {} resources", resources.len(), S::KIND);
        self.resources = resources;
        self.dirty = false;
        Ok(())
    }

    /// Lists remote resources.
    ///
    /// Always re-fetches. When the config has definitions only the defined
    /// names are returned, otherwise everything the provider reported.
    pub async fn list(&mut self, provider: &S::Provider) -> Result<Listing> {
        self.mark_dirty();
        self.refresh(provider).await?;
        let mut rows = vec![];
        for (name, attributes) in self.resources.iter() {
            if let Some(definitions) = self.definitions.as_ref() {
                if !definitions.contains_key(name) {
                    continue;
                }
            }
            let value = serde_json::to_value(attributes).context(SerializeSnafu {
                kind: S::KIND,
                name: name.clone(),
            })?;
            rows.push((name.clone(), value));
        }
        Ok(Listing {
            kind: S::KIND,
            rows,
        })
    }

    /// Returns the remote state of the named resource.
    ///
    /// A name missing from the cache triggers one re-fetch before giving up.
    pub async fn lookup(&mut self, provider: &S::Provider, name: &str) -> Result<&S::Attributes> {
        self.refresh(provider).await?;
        if !self.resources.contains_key(name) {
            log::info!("{} resource '{name}' not found, re-populating list", S::KIND);
            self.mark_dirty();
            self.refresh(provider).await?;
        }
        self.resources.get(name).context(MissingResourceSnafu {
            kind: S::KIND,
            name,
        })
    }

    /// Returns the ARN of the named resource.
    pub async fn arn(&mut self, provider: &S::Provider, name: &str) -> Result<String> {
        Ok(self.lookup(provider, name).await?.arn().to_owned())
    }

    /// Creates every defined resource that does not exist yet.
    pub async fn create(&mut self, provider: &S::Provider) -> Result<Report> {
        let mut report = Report::new(S::KIND, Action::Create);
        if self.definitions.is_none() {
            log::warn!("no {} definitions to create", S::KIND);
            return Ok(report);
        }
        self.refresh(provider).await?;

        for (name, definition) in self.definitions.iter().flatten() {
            if self.resources.contains_key(name) {
                log::info!("{} '{name}' already exists", S::KIND);
                report.push(name, Status::Skipped, "already exists");
                continue;
            }
            log::debug!("creating {} '{name}' from {definition:?}", S::KIND);
            match self.service.do_create(provider, name, definition).await {
                Ok(attributes) => {
                    report.push(name, Status::Created, attributes.arn());
                    self.resources.insert(name.clone(), attributes);
                }
                Err(error) => report.push(name, Status::Failed, format!("{error:#}")),
            }
        }

        self.mark_dirty();
        Ok(report)
    }

    /// Deletes every defined resource, whether or not it was seen remotely.
    pub async fn delete(&mut self, provider: &S::Provider) -> Result<Report> {
        let mut report = Report::new(S::KIND, Action::Delete);
        if self.definitions.is_none() {
            log::warn!("no {} definitions to delete", S::KIND);
            return Ok(report);
        }
        self.refresh(provider).await?;

        for (name, definition) in self.definitions.iter().flatten() {
            let existing = self.resources.get(name);
            match self
                .service
                .do_delete(provider, name, definition, existing)
                .await
            {
                Ok(Removal::Deleted) => {
                    let detail = existing.map(|a| a.arn().to_owned()).unwrap_or_default();
                    report.push(name, Status::Deleted, detail);
                    self.resources.remove(name);
                }
                Ok(Removal::Absent) => report.push(name, Status::Absent, "does not exist"),
                Err(error) => report.push(name, Status::Failed, format!("{error:#}")),
            }
        }

        self.mark_dirty();
        Ok(report)
    }

    /// Runs `action` on this config.
    ///
    /// `List` logs the listing and returns an empty report.
    pub async fn action(&mut self, provider: &S::Provider, action: Action) -> Result<Report> {
        match action {
            Action::Create => self.create(provider).await,
            Action::Delete => self.delete(provider).await,
            Action::List => {
                let listing = self.list(provider).await?;
                log::info!("{} {}:\n{listing}", action, S::KIND);
                Ok(Report::new(S::KIND, action))
            }
        }
    }
}
