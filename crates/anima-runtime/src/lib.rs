//! # Anima Runtime
//!
//! The application container and the soul process supervisor:
//! - [`Application`]: settings, engine, caches, queues, jobs, an IoC
//!   container, and daemons behind one boot/run/reload/shutdown lifecycle
//! - [`Container`]: a typed, lock-protected IoC registry
//! - [`Daemon`]: named background workers with cancel/done signals
//! - [`Soul`]: signal loop, listener inheritance, and exec reincarnation

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod application;
pub mod container;
pub mod daemon;
pub mod soul;

pub use application::{Application, ApplicationBuilder, RunnerFactory};
pub use container::Container;
pub use daemon::{Daemon, DaemonWorker};
pub use soul::{Soul, SERVER_FDS};
