//! Several configs applied together under one provider session.
use std::{any::Any, future::Future, pin::Pin};

use snafu::OptionExt;

use crate::{
    Action, Config, Definitions, Error, Listing, Report, Result, Service, Status,
    UnknownConfigSnafu,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A [`Config`] with its service type erased.
trait ErasedConfig<P> {
    fn kind(&self) -> &'static str;

    fn create<'a>(&'a mut self, provider: &'a P) -> BoxFuture<'a, Result<Report>>;

    fn delete<'a>(&'a mut self, provider: &'a P) -> BoxFuture<'a, Result<Report>>;

    fn list<'a>(&'a mut self, provider: &'a P) -> BoxFuture<'a, Result<Listing>>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<S> ErasedConfig<S::Provider> for Config<S>
where
    S: Service + 'static,
    S::Provider: 'static,
{
    fn kind(&self) -> &'static str {
        S::KIND
    }

    fn create<'a>(&'a mut self, provider: &'a S::Provider) -> BoxFuture<'a, Result<Report>> {
        Box::pin(Config::create(self, provider))
    }

    fn delete<'a>(&'a mut self, provider: &'a S::Provider) -> BoxFuture<'a, Result<Report>> {
        Box::pin(Config::delete(self, provider))
    }

    fn list<'a>(&'a mut self, provider: &'a S::Provider) -> BoxFuture<'a, Result<Listing>> {
        Box::pin(Config::list(self, provider))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Groups the configs an exercise needs under one provider session.
///
/// Configs are addressed by their [`Service::KIND`].
pub struct Project<P> {
    name: String,
    provider: P,
    configs: Vec<Box<dyn ErasedConfig<P>>>,
}

impl<P: 'static> Project<P> {
    pub fn new(name: impl Into<String>, provider: P) -> Self {
        Self {
            name: name.into(),
            provider,
            configs: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Kinds of the registered configs, in registration order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.configs.iter().map(|c| c.kind()).collect()
    }

    /// Adds a config for `service`.
    ///
    /// Adding a kind that is already registered replaces the previous config
    /// in place.
    pub fn add_config<S>(
        &mut self,
        service: S,
        definitions: Option<Definitions<S::Definition>>,
    ) -> &mut Self
    where
        S: Service<Provider = P> + 'static,
    {
        let config: Box<dyn ErasedConfig<P>> = Box::new(Config::new(service, definitions));
        if let Some(slot) = self.configs.iter_mut().find(|c| c.kind() == S::KIND) {
            log::debug!("replacing {} config in project '{}'", S::KIND, self.name);
            *slot = config;
        } else {
            log::debug!("adding {} config to project '{}'", S::KIND, self.name);
            self.configs.push(config);
        }
        self
    }

    pub fn config<S>(&self) -> Result<&Config<S>>
    where
        S: Service<Provider = P> + 'static,
    {
        self.configs
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<Config<S>>())
            .context(UnknownConfigSnafu {
                project: self.name.as_str(),
                kind: S::KIND,
            })
    }

    pub fn config_mut<S>(&mut self) -> Result<&mut Config<S>>
    where
        S: Service<Provider = P> + 'static,
    {
        let project = &self.name;
        self.configs
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<Config<S>>())
            .context(UnknownConfigSnafu {
                project,
                kind: S::KIND,
            })
    }

    /// Returns a config along with the provider, for operations on the config
    /// that need both.
    pub fn config_with_provider<S>(&mut self) -> Result<(&mut Config<S>, &P)>
    where
        S: Service<Provider = P> + 'static,
    {
        let Self {
            name,
            provider,
            configs,
        } = self;
        let config = configs
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<Config<S>>())
            .context(UnknownConfigSnafu {
                project: name.as_str(),
                kind: S::KIND,
            })?;
        Ok((config, provider))
    }

    /// Indices of the configs selected by `kind`, in registration order.
    fn select(&self, kind: Option<&str>) -> Result<Vec<usize>> {
        match kind {
            None => {
                log::info!(
                    "number of configs in project '{}': {}",
                    self.name,
                    self.configs.len()
                );
                Ok((0..self.configs.len()).collect())
            }
            Some(kind) => {
                let index = self
                    .configs
                    .iter()
                    .position(|c| c.kind() == kind)
                    .context(UnknownConfigSnafu {
                        project: self.name.as_str(),
                        kind,
                    })?;
                Ok(vec![index])
            }
        }
    }

    /// Creates the defined resources of every config, or of one kind.
    ///
    /// A config whose resources cannot be listed is reported as a single
    /// failed `*` entry and the remaining configs still run.
    pub async fn create(&mut self, kind: Option<&str>) -> Result<Vec<Report>> {
        let mut reports = vec![];
        for i in self.select(kind)? {
            let config = &mut self.configs[i];
            let result = config.create(&self.provider).await;
            reports.push(unlisted(config.kind(), Action::Create, result)?);
        }
        Ok(reports)
    }

    /// Deletes the defined resources of every config, or of one kind.
    ///
    /// Configs are visited in reverse registration order, so resources
    /// registered later (which usually refer to earlier ones) go first.
    /// As with `create`, a listing failure only fails its own config.
    pub async fn delete(&mut self, kind: Option<&str>) -> Result<Vec<Report>> {
        let mut reports = vec![];
        for i in self.select(kind)?.into_iter().rev() {
            let config = &mut self.configs[i];
            let result = config.delete(&self.provider).await;
            reports.push(unlisted(config.kind(), Action::Delete, result)?);
        }
        Ok(reports)
    }

    /// Lists the remote resources of every config, or of one kind.
    pub async fn list(&mut self, kind: Option<&str>) -> Result<Vec<Listing>> {
        let mut listings = vec![];
        for i in self.select(kind)? {
            listings.push(self.configs[i].list(&self.provider).await?);
        }
        Ok(listings)
    }

    /// Runs `action` on every config, or on one kind.
    ///
    /// `List` logs each listing and yields one empty report per config.
    pub async fn action(&mut self, action: Action, kind: Option<&str>) -> Result<Vec<Report>> {
        match action {
            Action::Create => self.create(kind).await,
            Action::Delete => self.delete(kind).await,
            Action::List => Ok(self
                .list(kind)
                .await?
                .into_iter()
                .map(|listing| {
                    log::info!("{action} {}:\n{listing}", listing.kind);
                    Report::new(listing.kind, action)
                })
                .collect()),
        }
    }
}

/// Turns a refresh failure into a report with one failed `*` entry.
fn unlisted(kind: &'static str, action: Action, result: Result<Report>) -> Result<Report> {
    match result {
        Err(error @ Error::Refresh { .. }) => {
            let mut report = Report::new(kind, action);
            report.push("*", Status::Failed, error.to_string());
            Ok(report)
        }
        result => result,
    }
}
