//! Applications
//!
//! An application binds settings, the engine (routes, factories, events),
//! caches and queues built from configuration, registered jobs, an IoC
//! container, and daemons. It boots once, may reload many times, and shuts
//! down once; exactly one runner is bound per run.

use crate::container::Container;
use crate::daemon::Daemon;
use anima_cache::{CacheDriver, NullCache, RedisCache};
use anima_config::{Config, Settings};
use anima_core::engine::{ContextFactory, EngineBuilder, LoggerFactory, PanicHandler};
use anima_core::event::Listener;
use anima_core::{Engine, Error, Event, Processor, Result, Route, Runner};
use anima_queue::{
    MemoryDriver, Queue, QueueCallback, QueueDriver, QueueProcessor, QueueWorkerRunner, RedisDriver,
};
use std::collections::HashMap;
use std::fmt;
use std::net::TcpListener as StdTcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Builds the runner bound for one application run. Invoked after boot, so
/// it may resolve queues and configuration.
pub type RunnerFactory = Box<dyn Fn(&Application) -> Result<Arc<dyn Runner>> + Send + Sync>;

/// A runnable application.
pub struct Application {
    name: String,
    settings: Box<dyn Settings>,
    config: RwLock<Option<Config>>,
    engine: Arc<Engine>,
    jobs: HashMap<i32, QueueProcessor>,
    job_callbacks: HashMap<i32, QueueCallback>,
    caches: RwLock<HashMap<String, Arc<dyn CacheDriver>>>,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    container: Container,
    daemons: Vec<Arc<Daemon>>,
    listener: Mutex<Option<StdTcpListener>>,
    runner: Mutex<Option<Arc<dyn Runner>>>,
    runner_factory: RunnerFactory,
    reload_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("jobs", &self.jobs.len())
            .field("daemons", &self.daemons.len())
            .finish()
    }
}

impl Application {
    /// Start building an application.
    pub fn builder(name: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder::new(name)
    }

    /// The application name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The engine surface runners borrow.
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// The IoC container.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Registered queue processors by job kind.
    pub fn jobs(&self) -> &HashMap<i32, QueueProcessor> {
        &self.jobs
    }

    /// Registered terminal-action callbacks by job kind.
    pub fn job_callbacks(&self) -> &HashMap<i32, QueueCallback> {
        &self.job_callbacks
    }

    /// The loaded configuration. Errors before boot.
    pub fn config(&self) -> Result<Config> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::Runtime(format!("application '{}' is not booted", self.name)))
    }

    /// Fire an event on the application's bus.
    pub fn fire(&self, event: Event, payload: &dyn std::any::Any) {
        self.engine.fire(event, payload);
    }

    /// Look up a cache by name; unconfigured names yield the null driver.
    pub fn cache(&self, name: &str) -> Arc<dyn CacheDriver> {
        self.caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(NullCache::new(name)))
    }

    /// Look up a logical queue by its `<driver>:<queue>` key.
    pub fn queue(&self, key: &str) -> Option<Arc<Queue>> {
        self.queues
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Adopt a listener inherited from the supervisor.
    pub fn set_listener(&self, listener: StdTcpListener) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// A duplicated handle to the application's listener, binding the
    /// configured address on first use. The original stays with the
    /// application so its descriptor survives runner handoff.
    pub fn listener(&self) -> Result<StdTcpListener> {
        let mut guard = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            let address = self.config()?.service.address;
            *guard = Some(StdTcpListener::bind(&address)?);
        }
        Ok(guard
            .as_ref()
            .expect("listener just bound")
            .try_clone()?)
    }

    /// The raw descriptor of the bound listener, if any.
    pub fn listener_fd(&self) -> Option<RawFd> {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|l| l.as_raw_fd())
    }

    /// Load configuration, build caches and queues from it, and fire the
    /// boot event.
    pub async fn boot(&self) -> Result<()> {
        let config = self.settings.load()?;
        self.initialize_services(&config).await?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Some(config);

        self.engine.fire(Event::BOOT, &self.name);
        info!(app = %self.name, "application booted");
        Ok(())
    }

    /// Bind the runner and serve. Daemons start first and run alongside.
    pub async fn run(&self) -> Result<()> {
        let runner = (self.runner_factory)(self)?;
        {
            let mut bound = self.runner.lock().unwrap_or_else(|e| e.into_inner());
            if bound.is_some() {
                return Err(Error::Runtime(format!(
                    "application '{}' already has a bound runner",
                    self.name
                )));
            }
            *bound = Some(Arc::clone(&runner));
        }

        for daemon in &self.daemons {
            daemon.start();
        }

        runner.run().await
    }

    /// Re-read settings, rebuild caches and queues, and fire the reload
    /// event. Serialized; never cancels in-flight requests.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        let config = self.settings.load()?;
        self.initialize_services(&config).await?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Some(config);

        self.engine.fire(Event::RELOAD, &self.name);
        info!(app = %self.name, "application reloaded");
        Ok(())
    }

    /// Fire the terminate event, cancel daemons, and drain the runner
    /// within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.engine.fire(Event::TERMINATE, &self.name);

        for daemon in &self.daemons {
            daemon.cancel();
        }

        let runner = self
            .runner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match runner {
            Some(runner) => runner.shutdown(timeout).await,
            None => Ok(()),
        }
    }

    async fn initialize_services(&self, config: &Config) -> Result<()> {
        let mut caches: HashMap<String, Arc<dyn CacheDriver>> = HashMap::new();
        for cache in &config.cache {
            match (cache.driver.as_str(), &cache.redis) {
                ("redis", Some(redis)) => {
                    let driver = RedisCache::connect(&cache.name, redis)
                        .await
                        .map_err(|e| Error::Runtime(format!("cache '{}': {e}", cache.name)))?;
                    caches.insert(cache.name.clone(), Arc::new(driver));
                }
                (driver, _) => {
                    warn!(cache = %cache.name, driver, "skipping cache with unsupported driver");
                }
            }
        }

        let mut queues: HashMap<String, Arc<Queue>> = HashMap::new();
        for queue in &config.queue {
            let driver: Arc<dyn QueueDriver> = match (queue.driver.as_str(), &queue.redis) {
                ("redis", Some(redis)) => Arc::new(
                    RedisDriver::connect(redis)
                        .await
                        .map_err(|e| Error::Runtime(format!("queue '{}': {e}", queue.name)))?,
                ),
                ("memory", redis) => {
                    let read_timeout = redis
                        .as_ref()
                        .map(|r| r.read_timeout)
                        .unwrap_or(Duration::from_secs(1));
                    Arc::new(MemoryDriver::new(read_timeout))
                }
                (driver, _) => {
                    warn!(queue = %queue.name, driver, "skipping queue with unsupported driver");
                    continue;
                }
            };

            for logical in &queue.queues {
                let key = format!("{}:{}", queue.name, logical);
                queues.insert(key, Arc::new(Queue::new(logical.clone(), Arc::clone(&driver))));
            }
        }

        *self.caches.write().unwrap_or_else(|e| e.into_inner()) = caches;
        *self.queues.write().unwrap_or_else(|e| e.into_inner()) = queues;
        Ok(())
    }
}

/// Builder for [`Application`].
pub struct ApplicationBuilder {
    name: String,
    settings: Option<Box<dyn Settings>>,
    engine: EngineBuilder,
    jobs: HashMap<i32, QueueProcessor>,
    job_callbacks: HashMap<i32, QueueCallback>,
    daemons: Vec<Arc<Daemon>>,
    runner_factory: Option<RunnerFactory>,
}

impl fmt::Debug for ApplicationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationBuilder")
            .field("name", &self.name)
            .finish()
    }
}

impl ApplicationBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: None,
            engine: Engine::builder(),
            jobs: HashMap::new(),
            job_callbacks: HashMap::new(),
            daemons: Vec::new(),
            runner_factory: None,
        }
    }

    /// Use the given settings provider.
    pub fn settings(mut self, settings: impl Settings + 'static) -> Self {
        self.settings = Some(Box::new(settings));
        self
    }

    /// Register a route and its processor.
    pub fn route(mut self, route: Route, processor: Processor) -> Self {
        self.engine = self.engine.route(route, processor);
        self
    }

    /// Replace the context factory.
    pub fn context_factory(mut self, factory: ContextFactory) -> Self {
        self.engine = self.engine.context_factory(factory);
        self
    }

    /// Replace the logger factory.
    pub fn logger_factory(mut self, factory: LoggerFactory) -> Self {
        self.engine = self.engine.logger_factory(factory);
        self
    }

    /// Replace the panic handler.
    pub fn panic_handler(mut self, handler: PanicHandler) -> Self {
        self.engine = self.engine.panic_handler(handler);
        self
    }

    /// Register an event listener.
    pub fn on(mut self, event: Event, listener: Listener) -> Self {
        self.engine = self.engine.on(event, listener);
        self
    }

    /// Register the processor for jobs of `kind`.
    pub fn job(mut self, kind: i32, processor: QueueProcessor) -> Self {
        self.jobs.insert(kind, processor);
        self
    }

    /// Register a terminal-action callback for jobs of `kind`.
    pub fn job_callback(mut self, kind: i32, callback: QueueCallback) -> Self {
        self.job_callbacks.insert(kind, callback);
        self
    }

    /// Register a daemon started at run and cancelled at shutdown.
    pub fn daemon(mut self, daemon: Daemon) -> Self {
        self.daemons.push(Arc::new(daemon));
        self
    }

    /// Replace the runner factory.
    pub fn runner_factory(mut self, factory: RunnerFactory) -> Self {
        self.runner_factory = Some(factory);
        self
    }

    /// Serve the registered jobs as a queue worker over the logical queue
    /// addressed by `queue_key` (`<driver>:<queue>`). A zero worker count
    /// falls back to the queue's configured pool size.
    pub fn queue_worker(mut self, queue_key: impl Into<String>, workers: usize) -> Self {
        let key = queue_key.into();
        self.runner_factory = Some(Box::new(move |app| {
            let queue = app.queue(&key).ok_or_else(|| {
                Error::Runtime(format!("queue '{key}' is not configured"))
            })?;

            let workers = if workers == 0 {
                let driver_name = key.split(':').next().unwrap_or_default().to_string();
                app.config()?
                    .queue
                    .iter()
                    .find(|q| q.name == driver_name)
                    .map(|q| q.workers)
                    .unwrap_or(0)
            } else {
                workers
            };

            let mut runner = QueueWorkerRunner::new(queue, workers);
            for (kind, processor) in app.jobs() {
                runner = runner.job(*kind, Arc::clone(processor));
            }
            for (kind, callback) in app.job_callbacks() {
                runner = runner.job_callback(*kind, Arc::clone(callback));
            }
            Ok(Arc::new(runner))
        }));
        self
    }

    /// Build the application. Without an explicit runner factory, the
    /// configured protocol selects one of the built-in runners.
    pub fn build(self) -> Result<Arc<Application>> {
        let settings = self
            .settings
            .ok_or_else(|| Error::Config("application built without settings".to_string()))?;

        let runner_factory = self.runner_factory.unwrap_or_else(|| {
            Box::new(|app: &Application| {
                let config = app.config()?;
                let listener = app.listener()?;
                Ok(anima_protocols::new_runner(
                    app.engine(),
                    &config.service,
                    Some(listener),
                ))
            })
        });

        Ok(Arc::new(Application {
            name: self.name,
            settings,
            config: RwLock::new(None),
            engine: Arc::new(self.engine.build()?),
            jobs: self.jobs,
            job_callbacks: self.job_callbacks,
            caches: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            container: Container::new(),
            daemons: self.daemons,
            listener: Mutex::new(None),
            runner: Mutex::new(None),
            runner_factory,
            reload_lock: tokio::sync::Mutex::new(()),
        }))
    }
}
