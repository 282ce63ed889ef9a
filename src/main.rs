use clap::{Arg, Command};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use metaprogrammer::command_router::CommandRouter;
use metaprogrammer::config::Config;
use metaprogrammer::executor::Executor;
use metaprogrammer::function_catalog::SqliteCatalog;
use metaprogrammer::llm_generator::generator_from_config;
use metaprogrammer::review_ui::ReviewUI;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never interleave with the session prompt
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("metaprog")
        .about("Generate functions with a language model, review them, keep them, run them")
        .arg(Arg::new("set-api-key")
            .long("set-api-key")
            .help("Set the OpenAI API key")
            .value_name("API_KEY")
            .num_args(1))
        .arg(Arg::new("config")
            .long("config")
            .help("Show configuration information")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("database")
            .long("database")
            .help("Path of the function catalog database")
            .value_name("PATH")
            .value_parser(clap::value_parser!(PathBuf))
            .num_args(1))
        .arg(Arg::new("reset")
            .long("reset")
            .help("Drop all stored functions before starting")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("mock")
            .long("mock")
            .help("Use the offline mock generator")
            .action(clap::ArgAction::SetTrue))
        .get_matches();

    if let Some(api_key) = matches.get_one::<String>("set-api-key") {
        let mut config = Config::load()?;
        config.set_api_key(api_key.clone())?;
        println!("✅ API key saved successfully");
        return Ok(());
    }

    if matches.get_flag("config") {
        Config::show_config_info()?;
        return Ok(());
    }

    let mut config = Config::load()?;
    if let Some(path) = matches.get_one::<PathBuf>("database") {
        config.database_path = Some(path.clone());
    }
    if matches.get_flag("mock") {
        config.use_mock = true;
    }

    let database_path = config.database_path()?;
    let mut catalog = SqliteCatalog::open(&database_path)?;
    if matches.get_flag("reset") {
        catalog.reset()?;
    }

    let generator = generator_from_config(&config)?;
    info!("Starting session with catalog {}", database_path.display());

    let mut router = CommandRouter::new(
        Box::new(catalog),
        generator,
        Executor::new(config.interpreter.clone()),
        Box::new(ReviewUI::stdio()),
        config.default_language.clone(),
    );
    router.run().await
}
