use crate::{
    executor::Executor,
    function_catalog::FunctionCatalog,
    lifecycle::{LifecycleController, LifecycleOutcome},
    llm_generator::CodeGenerator,
    providers::{is_input_closed, Prompter},
    review_ui::{render_names, render_outcome, render_record},
};
use anyhow::Result;
use tracing::{error, info};

const COMMAND_PROMPT: &str = "Waiting for instruction (generate/load/execute/list/show/exit)";

/// A line typed at the session prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Generate,
    Load,
    Execute,
    List,
    Show,
    Exit,
    Unknown(String),
}

impl SessionCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "generate" => SessionCommand::Generate,
            "load" => SessionCommand::Load,
            "execute" => SessionCommand::Execute,
            "list" => SessionCommand::List,
            "show" => SessionCommand::Show,
            "exit" => SessionCommand::Exit,
            _ => SessionCommand::Unknown(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Maps session commands onto the lifecycle, the catalog and the executor.
///
/// Owns every per-session resource; dropping the router ends the session
/// and discards the loaded-function namespace.
pub struct CommandRouter {
    catalog: Box<dyn FunctionCatalog>,
    generator: Box<dyn CodeGenerator>,
    executor: Executor,
    prompter: Box<dyn Prompter>,
    default_language: String,
}

impl CommandRouter {
    pub fn new(
        catalog: Box<dyn FunctionCatalog>,
        generator: Box<dyn CodeGenerator>,
        executor: Executor,
        prompter: Box<dyn Prompter>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            generator,
            executor,
            prompter,
            default_language: default_language.into(),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn catalog(&self) -> &dyn FunctionCatalog {
        self.catalog.as_ref()
    }

    /// Reads and dispatches commands until `exit` or end of input.
    ///
    /// A failing command is reported and the loop moves on to the next one.
    /// Errors are only returned when the prompt itself cannot be written.
    pub async fn run(&mut self) -> Result<()> {
        self.prompter.say("Metaprogrammer started")?;

        loop {
            let line = match self.prompter.ask(COMMAND_PROMPT) {
                Ok(line) => line,
                Err(e) if is_input_closed(&e) => break,
                Err(e) => return Err(e),
            };

            match self.dispatch(SessionCommand::parse(&line)).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => {
                    self.prompter.say("Goodbye!")?;
                    break;
                }
                Err(e) if is_input_closed(&e) => break,
                Err(e) => {
                    error!("Command '{}' failed: {:#}", line, e);
                    self.prompter.say(&format!("Error: {:#}", e))?;
                }
            }
        }

        info!("Session ended with {} loaded function(s)", self.executor.registry().len());
        Ok(())
    }

    pub async fn dispatch(&mut self, command: SessionCommand) -> Result<Flow> {
        info!("Dispatching {:?}", command);

        match command {
            SessionCommand::Exit => return Ok(Flow::Exit),
            SessionCommand::Generate => {
                let outcome = self.lifecycle().generate_interactively().await?;
                info!("Lifecycle finished: {}", outcome_label(&outcome));
            }
            SessionCommand::Load => self.load().await?,
            SessionCommand::Execute => self.execute()?,
            SessionCommand::List => {
                let names = self.catalog.list()?;
                self.prompter.say(&render_names(&names))?;
            }
            SessionCommand::Show => self.show()?,
            SessionCommand::Unknown(_) => {
                self.prompter
                    .say("I'm sorry, I didn't understand your command. Please, try again.")?;
            }
        }

        Ok(Flow::Continue)
    }

    fn lifecycle(&mut self) -> LifecycleController<'_> {
        LifecycleController::new(
            self.generator.as_ref(),
            self.catalog.as_mut(),
            &mut self.executor,
            self.prompter.as_mut(),
            &self.default_language,
        )
    }

    async fn load(&mut self) -> Result<()> {
        let name = self
            .prompter
            .ask("Enter the function name you want to load from the catalog")?;
        let mut lifecycle = self.lifecycle();
        let record = lifecycle.resolve(&name).await?;
        lifecycle.load(&record)?;
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        let code = self.prompter.ask("Enter the code you want to execute")?;
        let outcome = self.executor.run(&code)?;
        self.prompter.say(&render_outcome(&outcome))?;
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        let name = self
            .prompter
            .ask("What is the name of the function you want to display?")?;
        match self.catalog.get(&name)? {
            Some(record) => self.prompter.say(&render_record(&record))?,
            None => self
                .prompter
                .say(&format!("No function named {} found in the catalog.", name))?,
        }
        Ok(())
    }
}

fn outcome_label(outcome: &LifecycleOutcome) -> &str {
    match outcome {
        LifecycleOutcome::Registered(record) => &record.name,
        LifecycleOutcome::Discarded => "discarded",
        LifecycleOutcome::NothingGenerated => "nothing generated",
    }
}
