use anyhow::Result;
use metaprogrammer::command_router::CommandRouter;
use metaprogrammer::config::InterpreterConfig;
use metaprogrammer::executor::{Executor, InterpreterChannel, ProcessRunner};
use metaprogrammer::function_catalog::{FunctionCatalog, FunctionRecord, SqliteCatalog};
use metaprogrammer::llm_generator::MockGenerator;
use metaprogrammer::review_ui::ReviewUI;
use std::io::{Cursor, Write};
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, Mutex};

/// Writer whose contents stay readable after the router takes ownership of it.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Interpreter stand-in answering every request with the same result.
#[derive(Clone)]
struct FixedRunner {
    output: &'static str,
    error: Option<&'static str>,
}

impl ProcessRunner for FixedRunner {
    fn spawn(&self, _program: &str, _args: &[&str]) -> Result<Box<dyn InterpreterChannel>> {
        Ok(Box::new(self.clone()))
    }

    fn program_exists(&self, _program: &str) -> bool {
        true
    }
}

impl InterpreterChannel for FixedRunner {
    fn exchange(&mut self, _request: &str) -> Result<Option<String>> {
        let reply = serde_json::json!({ "output": self.output, "error": self.error });
        Ok(Some(format!("{}\n", reply)))
    }
}

fn ok_runner(output: &'static str) -> FixedRunner {
    FixedRunner { output, error: None }
}

/// Runs a whole session over scripted input and returns the session output.
async fn run_session(
    catalog: SqliteCatalog,
    runner: FixedRunner,
    input: &str,
) -> Result<(String, CommandRouter)> {
    let output = SharedBuffer::default();
    let mut router = CommandRouter::new(
        Box::new(catalog),
        Box::new(MockGenerator::new()),
        Executor::with_runner(InterpreterConfig::default(), Box::new(runner)),
        Box::new(ReviewUI::new(Cursor::new(input.as_bytes().to_vec()), output.clone())),
        "python",
    );

    router.run().await?;
    Ok((output.contents(), router))
}

#[tokio::test]
async fn test_register_list_and_show() -> Result<()> {
    let input = "generate\nadd two to x\nyes\nno\nlist\nshow\nadd_two\nexit\n";

    let (output, router) = run_session(SqliteCatalog::in_memory()?, ok_runner(""), input).await?;

    assert!(output.contains("Function 'add_two' saved to catalog"));
    assert!(output.contains("Function names in the catalog:\nadd_two"));
    let stored = router.catalog().get("add_two")?.expect("add_two registered");
    assert!(output.contains(&format!("Code:\n{}", stored.code)));
    assert_eq!(stored.language, "python");
    assert!(output.ends_with("Goodbye!\n"));

    Ok(())
}

#[tokio::test]
async fn test_load_unknown_function_declined() -> Result<()> {
    let input = "load\nunknown_fn\nno\nlist\nexit\n";

    let (output, router) = run_session(SqliteCatalog::in_memory()?, ok_runner(""), input).await?;

    assert!(output.contains("Error: No function named unknown_fn found in the catalog."));
    // The session keeps going after the failed command
    assert!(output.contains("No functions found in the catalog."));
    assert!(router.catalog().list()?.is_empty());
    assert!(router.executor().registry().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_empty_generation_skips_registration() -> Result<()> {
    let input = "generate\ndo nothing useful\nlist\nexit\n";

    let (output, router) = run_session(SqliteCatalog::in_memory()?, ok_runner(""), input).await?;

    assert!(output.contains("No code was produced"));
    assert!(!output.contains("Do you want to register"));
    assert!(router.catalog().list()?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_load_existing_function_then_execute() -> Result<()> {
    let mut catalog = SqliteCatalog::in_memory()?;
    catalog.put(&FunctionRecord {
        name: "add_two".to_string(),
        code: "def add_two(x):\n    return x + 2\n".to_string(),
        language: "python".to_string(),
    })?;
    let input = "load\nadd_two\nexecute\nprint(add_two(40))\nexit\n";

    let (output, router) = run_session(catalog, ok_runner("42\n"), input).await?;

    assert!(router.executor().registry().contains("add_two"));
    assert!(output.contains("---\nOutput:\n42\n---\nExecution finished"));

    Ok(())
}

#[tokio::test]
async fn test_execution_failure_does_not_end_session() -> Result<()> {
    let runner = FixedRunner {
        output: "",
        error: Some("NameError: name 'missing' is not defined"),
    };
    let input = "execute\nmissing()\nlist\nexit\n";

    let (output, _) = run_session(SqliteCatalog::in_memory()?, runner, input).await?;

    assert!(output.contains("Execution yielded error: NameError: name 'missing' is not defined"));
    assert!(output.contains("No functions found in the catalog."));
    assert!(output.ends_with("Goodbye!\n"));

    Ok(())
}

#[tokio::test]
async fn test_unknown_command_and_end_of_input() -> Result<()> {
    let (output, _) = run_session(SqliteCatalog::in_memory()?, ok_runner(""), "dance\n").await?;

    assert!(output.contains("I'm sorry, I didn't understand your command."));
    assert!(!output.contains("Goodbye!"));

    Ok(())
}

#[tokio::test]
async fn test_rejected_then_fixed_function_is_registered() -> Result<()> {
    let input = "generate\ngreet someone\nno\nyes\nbe louder\nyes\nno\nexit\n";

    let (output, router) = run_session(SqliteCatalog::in_memory()?, ok_runner(""), input).await?;

    assert!(output.contains("Function 'greet' registration cancelled"));
    assert!(output.contains("Fixing function 'greet'."));
    let stored = router.catalog().get("greet")?.expect("fixed greet registered");
    assert!(stored.code.contains("Revised offline"));

    Ok(())
}

// =============================================================================
// Binary tests
// =============================================================================

/// Runs the `metaprog` binary in mock mode with an isolated HOME.
fn run_metaprog(home: &std::path::Path, database: &std::path::Path, input: &str) -> Result<Output> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_metaprog"))
        .arg("--mock")
        .arg("--database")
        .arg(database)
        .env("HOME", home)
        .env_remove("METAPROGRAMMER_DATABASE")
        .env_remove("OPENAI_API_KEY")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(input.as_bytes())?;

    Ok(child.wait_with_output()?)
}

#[test]
fn test_binary_session_persists_catalog() -> Result<()> {
    let home = tempfile::tempdir()?;
    let database = home.path().join("functions.db");

    let first = run_metaprog(
        home.path(),
        &database,
        "generate\nadd two to x\nyes\nno\nexit\n",
    )?;
    assert!(first.status.success());
    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.contains("Metaprogrammer started"));
    assert!(stdout.contains("Function 'add_two' saved to catalog"));

    let second = run_metaprog(home.path(), &database, "list\nexit\n")?;
    assert!(second.status.success());
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(stdout.contains("Function names in the catalog:\nadd_two"));

    Ok(())
}

#[test]
fn test_binary_session_keeps_state_between_executions() -> Result<()> {
    if which::which("python3").is_err() {
        eprintln!("python3 not found, skipping");
        return Ok(());
    }
    let home = tempfile::tempdir()?;
    let database = home.path().join("functions.db");

    let session = run_metaprog(
        home.path(),
        &database,
        "generate\nadd two to x\nyes\nyes\nexecute\ncounter = 40\nexecute\nprint(add_two(counter))\nexit\n",
    )?;

    assert!(session.status.success());
    let stdout = String::from_utf8_lossy(&session.stdout);
    assert!(stdout.contains("Function 'add_two' loaded from catalog"));
    assert!(stdout.contains("---\nOutput:\n42\n---\nExecution finished"));

    Ok(())
}
