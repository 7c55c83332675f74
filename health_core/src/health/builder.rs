//! Check registration: descriptors, the builder that collects them and the
//! registry that turns them into check instances for each run.

use crate::error::{HealthError, Result};
use crate::health::cache::HealthCheckCache;
use crate::health::check::{HealthCheck, HealthCheckProperties};
use crate::health::checks::{
    CachedHealthCheck, CachedHealthCheckProperties, ConnectionFactory, DelegatingHealthCheck,
    HttpHealthCheck, HttpHealthCheckProperties, SqlHealthCheck,
};
use crate::health::status::CheckStatus;
use parking_lot::Mutex;
use sqlx::{Connection, Executor};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Whether a check instance is shared across runs or created for each run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifetime {
    /// One instance, created on first use and reused by every run.
    Singleton,
    /// A new instance per run.
    #[default]
    Scoped,
    /// A new instance per resolution. Runs resolve once, so this behaves
    /// like `Scoped`.
    Transient,
}

/// Shared resources handed to check factories: the status cache, the HTTP
/// client, and any services the host application registers.
#[derive(Clone)]
pub struct CheckContext {
    cache: HealthCheckCache,
    http_client: reqwest::Client,
    extensions: Arc<http::Extensions>,
}

impl Default for CheckContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckContext {
    pub fn new() -> Self {
        Self {
            cache: HealthCheckCache::new(),
            http_client: reqwest::Client::new(),
            extensions: Arc::new(http::Extensions::new()),
        }
    }

    pub fn with_cache(mut self, cache: HealthCheckCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    /// Registers an application service, retrievable with [`CheckContext::get`].
    pub fn with_extension<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.extensions).insert(value);
        self
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    pub fn cache(&self) -> &HealthCheckCache {
        &self.cache
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }
}

pub type CheckFactory = Arc<dyn Fn(&CheckContext) -> Arc<dyn HealthCheck> + Send + Sync>;

/// A named check factory plus its lifetime.
#[derive(Clone)]
pub struct HealthCheckDescriptor {
    name: String,
    lifetime: Lifetime,
    factory: CheckFactory,
}

impl std::fmt::Debug for HealthCheckDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckDescriptor")
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl HealthCheckDescriptor {
    pub fn new<F>(name: impl Into<String>, lifetime: Lifetime, factory: F) -> Result<Self>
    where
        F: Fn(&CheckContext) -> Arc<dyn HealthCheck> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HealthError::EmptyName);
        }

        Ok(Self {
            name,
            lifetime,
            factory: Arc::new(factory),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Creates an instance; it must report the name it was registered under.
    pub fn instantiate(&self, context: &CheckContext) -> Result<Arc<dyn HealthCheck>> {
        let check = (self.factory)(context);
        if check.name() != self.name {
            return Err(HealthError::NameMismatch {
                registered: self.name.clone(),
                reported: check.name().to_string(),
            });
        }
        Ok(check)
    }

    /// Same name and lifetime, every instance wrapped in a cached decorator.
    fn cached(self, properties: CachedHealthCheckProperties) -> Self {
        let inner = self.factory;
        let factory: CheckFactory = Arc::new(move |context: &CheckContext| -> Arc<dyn HealthCheck> {
            Arc::new(CachedHealthCheck::new(
                inner(context),
                context.cache().clone(),
                properties,
            ))
        });

        Self {
            name: self.name,
            lifetime: self.lifetime,
            factory,
        }
    }
}

/// Collects descriptors at startup. Every registration validates its input
/// and rejects a name that is already registered.
#[derive(Debug, Default)]
pub struct HealthCheckBuilder {
    descriptors: Vec<HealthCheckDescriptor>,
    names: HashSet<String>,
}

impl HealthCheckBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, descriptor: HealthCheckDescriptor) -> Result<Self> {
        if !self.names.insert(descriptor.name.clone()) {
            return Err(HealthError::DuplicateName(descriptor.name));
        }

        debug!(name = %descriptor.name, lifetime = ?descriptor.lifetime, "Registered health check");
        self.descriptors.push(descriptor);
        Ok(self)
    }

    /// Registers a check that already exists; it is shared by every run.
    pub fn add_check<T>(self, check: T) -> Result<Self>
    where
        T: HealthCheck + 'static,
    {
        let check: Arc<dyn HealthCheck> = Arc::new(check);
        let name = check.name().to_string();
        self.add(HealthCheckDescriptor::new(name, Lifetime::Singleton, move |_| {
            Arc::clone(&check)
        })?)
    }

    pub fn add_delegate<F, Fut>(self, properties: HealthCheckProperties, action: F) -> Result<Self>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CheckStatus>> + Send + 'static,
    {
        self.add_check(DelegatingHealthCheck::new(properties, action))
    }

    /// Delegate receiving the resolution context, for actions that need
    /// application services. Instances are created per run.
    pub fn add_delegate_with_context<F, Fut>(
        self,
        properties: HealthCheckProperties,
        action: F,
    ) -> Result<Self>
    where
        F: Fn(CheckContext, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CheckStatus>> + Send + 'static,
    {
        let action = Arc::new(action);
        let name = properties.name().to_string();

        self.add(HealthCheckDescriptor::new(name, Lifetime::Scoped, move |context| {
            let context = context.clone();
            let action = Arc::clone(&action);
            Arc::new(DelegatingHealthCheck::new(properties.clone(), move |cancel| {
                action(context.clone(), cancel)
            })) as Arc<dyn HealthCheck>
        })?)
    }

    /// SQL check over a connection factory. `sql` of `None` keeps the default
    /// statement; an empty statement only opens and closes the connection.
    pub fn add_sql<C>(
        self,
        properties: HealthCheckProperties,
        connect: ConnectionFactory<C>,
        sql: Option<&str>,
    ) -> Result<Self>
    where
        C: Connection + 'static,
        for<'c> &'c mut C: Executor<'c, Database = C::Database>,
    {
        let mut check = SqlHealthCheck::new(properties, connect);
        if let Some(sql) = sql {
            check = check.with_sql(sql);
        }
        self.add_check(check)
    }

    pub fn add_sql_url<C>(
        self,
        properties: HealthCheckProperties,
        url: &str,
        sql: Option<&str>,
    ) -> Result<Self>
    where
        C: Connection + 'static,
        for<'c> &'c mut C: Executor<'c, Database = C::Database>,
    {
        let mut check = SqlHealthCheck::<C>::from_url(properties, url);
        if let Some(sql) = sql {
            check = check.with_sql(sql);
        }
        self.add_check(check)
    }

    /// HTTP check using the context's shared client. The instance is created
    /// on first use and then shared.
    pub fn add_http(self, properties: HttpHealthCheckProperties) -> Result<Self> {
        let name = properties.name().to_string();
        self.add(HealthCheckDescriptor::new(name, Lifetime::Singleton, move |context| {
            Arc::new(HttpHealthCheck::new(properties.clone(), context.http_client().clone()))
                as Arc<dyn HealthCheck>
        })?)
    }

    /// Registers every check added by `configure` behind a cached decorator.
    pub fn add_cached<F>(self, properties: CachedHealthCheckProperties, configure: F) -> Result<Self>
    where
        F: FnOnce(HealthCheckBuilder) -> Result<HealthCheckBuilder>,
    {
        let cached = configure(HealthCheckBuilder::new())?;

        cached
            .descriptors
            .into_iter()
            .try_fold(self, |builder, descriptor| builder.add(descriptor.cached(properties)))
    }

    pub fn descriptors(&self) -> &[HealthCheckDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn build(self) -> HealthCheckRegistry {
        HealthCheckRegistry {
            entries: self
                .descriptors
                .into_iter()
                .map(|descriptor| RegistryEntry {
                    descriptor,
                    singleton: Mutex::new(None),
                })
                .collect(),
        }
    }
}

struct RegistryEntry {
    descriptor: HealthCheckDescriptor,
    singleton: Mutex<Option<Arc<dyn HealthCheck>>>,
}

/// Registered descriptors, in registration order. Singletons are created
/// lazily on first resolution and memoized.
#[derive(Default)]
pub struct HealthCheckRegistry {
    entries: Vec<RegistryEntry>,
}

impl HealthCheckRegistry {
    pub fn resolve(&self, context: &CheckContext) -> Result<Vec<Arc<dyn HealthCheck>>> {
        self.entries
            .iter()
            .map(|entry| match entry.descriptor.lifetime {
                Lifetime::Singleton => {
                    let mut singleton = entry.singleton.lock();
                    if let Some(check) = singleton.as_ref() {
                        return Ok(Arc::clone(check));
                    }
                    let check = entry.descriptor.instantiate(context)?;
                    *singleton = Some(Arc::clone(&check));
                    Ok(check)
                }
                Lifetime::Scoped | Lifetime::Transient => entry.descriptor.instantiate(context),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.descriptor.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
