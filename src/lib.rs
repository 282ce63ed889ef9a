//! Metaprogrammer - an interactive loop for generating, approving, storing
//! and running functions written by a language model.
//!
//! The library provides:
//!
//! - **Function generation** via an OpenAI-compatible chat completions API
//! - **Human review** of every generated function before it is kept
//! - **A persistent catalog** of approved functions in SQLite
//! - **Sandboxed execution** of loaded functions and ad-hoc snippets in a
//!   separate interpreter process, with captured output
//!
//! # Architecture
//!
//! - [`config`] - Configuration management (API key, model, database, interpreter)
//! - [`providers`] - Shared dependency injection traits
//! - [`http_client`] - HTTP client abstraction
//! - [`llm_generator`] - Turns an instruction into a function triple
//! - [`function_catalog`] - Persistent name → (code, language) store
//! - [`executor`] - Runs snippets against the session's loaded functions
//! - [`lifecycle`] - The generate → review → fix → persist → load cycle
//! - [`review_ui`] - Terminal prompter and text rendering
//! - [`command_router`] - Maps session commands onto the components above
//!
//! # Example
//!
//! ```ignore
//! use metaprogrammer::command_router::CommandRouter;
//! use metaprogrammer::config::Config;
//! use metaprogrammer::executor::Executor;
//! use metaprogrammer::function_catalog::SqliteCatalog;
//! use metaprogrammer::llm_generator::generator_from_config;
//! use metaprogrammer::review_ui::ReviewUI;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let mut router = CommandRouter::new(
//!         Box::new(SqliteCatalog::open(&config.database_path()?)?),
//!         generator_from_config(&config)?,
//!         Executor::new(config.interpreter.clone()),
//!         Box::new(ReviewUI::stdio()),
//!         config.default_language.clone(),
//!     );
//!     router.run().await
//! }
//! ```

pub mod command_router;
pub mod config;
pub mod executor;
pub mod function_catalog;
pub mod http_client;
pub mod lifecycle;
pub mod llm_generator;
pub mod providers;
pub mod review_ui;
