//! Function lifecycle: generate, review, fix, persist, load.
//!
//! A lifecycle starts from a free-text instruction and walks an explicit
//! state machine until it reaches a [`LifecycleOutcome`]:
//!
//! ```text
//! Drafting ──generate──▶ PendingApproval ──yes──▶ Registered
//!    ▲                        │
//!    │                        no
//!    │                        ▼
//!    └──────fix────────── Rejected ──decline──▶ Discarded
//! ```
//!
//! A soft generation failure ends the cycle as `NothingGenerated` without
//! touching the catalog. Every human decision goes through a [`Prompter`].

use crate::executor::Executor;
use crate::function_catalog::{FunctionCatalog, FunctionRecord};
use crate::llm_generator::{CodeGenerator, GeneratedFunction};
use crate::providers::Prompter;
use crate::review_ui::render_generation;
use anyhow::Result;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("No function named {0} found in the catalog.")]
    NotFound(String),
}

/// How a lifecycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOutcome {
    Registered(FunctionRecord),
    Discarded,
    NothingGenerated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    Drafting(String),
    PendingApproval(GeneratedFunction),
    Rejected(GeneratedFunction),
    Finished(LifecycleOutcome),
}

/// Instruction asking the backend to rework rejected code.
pub fn fix_instruction(existing_code: &str, change: &str) -> String {
    format!(
        "The following code has issues and needs to be fixed: \n{}\nPlease generate an improved version. {}",
        existing_code, change
    )
}

pub struct LifecycleController<'a> {
    generator: &'a dyn CodeGenerator,
    catalog: &'a mut dyn FunctionCatalog,
    executor: &'a mut Executor,
    prompter: &'a mut dyn Prompter,
    default_language: &'a str,
}

impl<'a> LifecycleController<'a> {
    pub fn new(
        generator: &'a dyn CodeGenerator,
        catalog: &'a mut dyn FunctionCatalog,
        executor: &'a mut Executor,
        prompter: &'a mut dyn Prompter,
        default_language: &'a str,
    ) -> Self {
        Self {
            generator,
            catalog,
            executor,
            prompter,
            default_language,
        }
    }

    /// Asks the human what the function should do, then runs [`Self::request`].
    pub async fn generate_interactively(&mut self) -> Result<LifecycleOutcome> {
        let instruction = self
            .prompter
            .ask("What should the function do? (describe in one sentence)")?;
        self.request(&instruction).await
    }

    /// Runs the full cycle for `instruction`, offering to load the function
    /// once it is registered.
    pub async fn request(&mut self, instruction: &str) -> Result<LifecycleOutcome> {
        self.run_cycle(instruction, true).await
    }

    async fn run_cycle(&mut self, instruction: &str, offer_load: bool) -> Result<LifecycleOutcome> {
        let mut state = LifecycleState::Drafting(instruction.to_string());
        // Name of the rejected draft currently being fixed
        let mut fixing: Option<String> = None;

        loop {
            state = match state {
                LifecycleState::Drafting(instruction) => self.draft(&instruction).await?,
                LifecycleState::PendingApproval(function) => {
                    if let Some(original) = fixing.as_deref() {
                        if original != function.name {
                            self.prompter.say(&format!(
                                "Note: the fixed function is named '{}' (was '{}'); it will be registered as a separate entry.",
                                function.name, original
                            ))?;
                        }
                    }
                    self.review(function, offer_load)?
                }
                LifecycleState::Rejected(function) => {
                    let next = self.offer_fix(&function)?;
                    if matches!(next, LifecycleState::Drafting(_)) {
                        fixing = Some(function.name);
                    }
                    next
                }
                LifecycleState::Finished(outcome) => return Ok(outcome),
            };
        }
    }

    async fn draft(&mut self, instruction: &str) -> Result<LifecycleState> {
        self.prompter.say("Generating function...")?;

        match self.generator.generate(instruction).await {
            Ok(function) => {
                info!("Function '{}' pending approval", function.name);
                self.prompter.say(&render_generation(&function))?;
                Ok(LifecycleState::PendingApproval(function))
            }
            Err(e) if e.is_soft() => {
                warn!("Generation produced no function: {}", e);
                self.prompter
                    .say("No code was produced. Please try again with a different description.")?;
                Ok(LifecycleState::Finished(LifecycleOutcome::NothingGenerated))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Presents a drafted function for approval.
    ///
    /// Approval stores it in the catalog and, for the default language and
    /// when `offer_load` is set, offers to load it into the session.
    pub fn review(&mut self, function: GeneratedFunction, offer_load: bool) -> Result<LifecycleState> {
        let approved = self
            .prompter
            .confirm(&format!("Do you want to register the function '{}'?", function.name))?;

        if !approved {
            info!("Function '{}' rejected", function.name);
            self.prompter
                .say(&format!("Function '{}' registration cancelled", function.name))?;
            return Ok(LifecycleState::Rejected(function));
        }

        let record = FunctionRecord::from(function);
        self.catalog.put(&record)?;
        self.prompter
            .say(&format!("Function '{}' saved to catalog", record.name))?;

        if offer_load
            && self.is_loadable(&record)
            && self
                .prompter
                .confirm("Would you like to load the function in-memory for execution?")?
        {
            self.load(&record)?;
        }

        Ok(LifecycleState::Finished(LifecycleOutcome::Registered(record)))
    }

    fn offer_fix(&mut self, function: &GeneratedFunction) -> Result<LifecycleState> {
        if !self.prompter.confirm("Would you like to apply changes?")? {
            info!("Function '{}' discarded", function.name);
            return Ok(LifecycleState::Finished(LifecycleOutcome::Discarded));
        }

        self.prompter.say(&format!("Fixing function '{}'.", function.name))?;
        let change = self.prompter.ask("How should the function be changed?")?;
        Ok(LifecycleState::Drafting(fix_instruction(&function.code, &change)))
    }

    /// Looks a function up for loading, offering to generate it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] if the name is unknown and the
    /// human declines (or the offered cycle registers nothing).
    pub async fn resolve(&mut self, name: &str) -> Result<FunctionRecord> {
        if let Some(record) = self.catalog.get(name)? {
            return Ok(record);
        }

        self.prompter
            .say(&format!("No function named {} found in the catalog.", name))?;
        let generate = self
            .prompter
            .confirm(&format!("Do you want to generate a new function named {}?", name))?;
        if !generate {
            return Err(LifecycleError::NotFound(name.to_string()).into());
        }

        let instruction = self
            .prompter
            .ask("What should the function do? (describe in one sentence)")?;
        match self.run_cycle(&instruction, false).await? {
            LifecycleOutcome::Registered(record) => {
                if record.name != name {
                    self.prompter.say(&format!(
                        "Note: the generated function is named '{}', not '{}'.",
                        record.name, name
                    ))?;
                }
                Ok(record)
            }
            _ => Err(LifecycleError::NotFound(name.to_string()).into()),
        }
    }

    fn is_loadable(&self, record: &FunctionRecord) -> bool {
        record.language.eq_ignore_ascii_case(self.default_language)
    }

    /// Loads a catalog record into the session namespace.
    ///
    /// Returns whether the definition was loaded. Failures of the
    /// definition itself are reported to the human, not returned.
    pub fn load(&mut self, record: &FunctionRecord) -> Result<bool> {
        if !self.is_loadable(record) {
            self.prompter.say(&format!(
                "Function '{}' is written in {}; only {} functions can be loaded.",
                record.name, record.language, self.default_language
            ))?;
            return Ok(false);
        }

        let outcome = self.executor.define(&record.name, &record.code)?;
        if !outcome.output.is_empty() {
            self.prompter.say(outcome.output.trim_end())?;
        }

        match &outcome.error {
            None => self
                .prompter
                .say(&format!("Function '{}' loaded from catalog", record.name))?,
            Some(error) => self.prompter.say(&format!(
                "Function '{}' could not be loaded: {}",
                record.name, error
            ))?,
        }
        Ok(outcome.is_success())
    }
}
