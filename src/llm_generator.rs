use crate::config::Config;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Name of the tool the backend is forced to call.
const TOOL_NAME: &str = "register_function";

/// A function proposed by the generation backend, not yet approved.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFunction {
    pub name: String,
    pub code: String,
    pub language: String,
}

/// Why a generation request produced no function.
///
/// `Parse` and `Refused` are soft failures: the human is told that no code
/// was produced and the session carries on. `Transport` and `Backend` are
/// failures of the control system itself and propagate.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation backend unreachable: {0}")]
    Transport(String),

    #[error("generation backend returned status {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("failed to extract function details: {0}")]
    Parse(String),

    #[error("the backend did not produce a function: {0}")]
    Refused(String),
}

impl GenerationError {
    pub fn is_soft(&self) -> bool {
        matches!(self, GenerationError::Parse(_) | GenerationError::Refused(_))
    }
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Turns a free-text instruction into a function triple.
    async fn generate(&self, instruction: &str) -> Result<GeneratedFunction, GenerationError>;
}

#[derive(Debug, Deserialize)]
struct FunctionArguments {
    function_code: Option<String>,
    function_name: Option<String>,
    function_language: Option<String>,
}

/// Generator backed by an OpenAI-compatible chat completions endpoint.
///
/// The instruction is sent as the whole prompt and the model is forced to
/// answer through a single tool call whose arguments carry the code, the
/// name and the language of the function.
pub struct OpenAiGenerator {
    http: Box<dyn HttpClient>,
    api_key: String,
    base_url: String,
    model: String,
    default_language: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Box::new(ReqwestHttpClient::new()),
            api_key: api_key.into(),
            base_url: crate::config::DEFAULT_API_BASE_URL.to_string(),
            model: crate::config::DEFAULT_MODEL.to_string(),
            default_language: crate::config::DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn from_config(config: &Config, api_key: &str) -> Self {
        Self::new(api_key)
            .with_model(&config.model)
            .with_base_url(&config.api_base_url)
            .with_default_language(&config.default_language)
    }

    pub fn with_http_client(mut self, http: Box<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    fn build_request_body(&self, instruction: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": instruction
                }
            ],
            "tools": [
                {
                    "type": "function",
                    "function": {
                        "name": TOOL_NAME,
                        "description": "Registers code that achieves the request given in natural language",
                        "parameters": {
                            "type": "object",
                            "properties": {
                                "function_code": {
                                    "type": "string",
                                    "description": "The non-nullable complete standalone best-practice commented documented function definition code including a function header with typed parameters and the function body with a return type, error handling and a docstring"
                                },
                                "function_name": {
                                    "type": "string",
                                    "description": "A non-nullable speaking identifier as the name of the given code function in the naming convention of the programming language"
                                },
                                "function_language": {
                                    "type": "string",
                                    "description": format!(
                                        "The non-nullable programming language of the generated code. Defaults to {}",
                                        self.default_language
                                    )
                                }
                            },
                            "required": ["function_code", "function_name", "function_language"]
                        }
                    }
                }
            ],
            "tool_choice": {
                "type": "function",
                "function": { "name": TOOL_NAME }
            }
        })
    }
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    async fn generate(&self, instruction: &str) -> Result<GeneratedFunction, GenerationError> {
        info!("Generating function with model {}", self.model);
        let body = self.build_request_body(instruction);
        let authorization = format!("Bearer {}", self.api_key);

        let response = self
            .http
            .post_json(
                &self.base_url,
                &[
                    ("authorization", authorization.as_str()),
                    ("content-type", "application/json"),
                ],
                &body,
            )
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !response.is_success() {
            return Err(GenerationError::Backend {
                status: response.status,
                message: response.body,
            });
        }

        debug!("Generation backend reply: {}", response.body);

        let result = serde_json::from_str::<Value>(&response.body)
            .map_err(|e| GenerationError::Parse(format!("{}. Input: {}", e, response.body)))
            .and_then(|reply| extract_function(&reply, &self.default_language));

        if let Err(e) = &result {
            warn!("The function could not be generated: {}", e);
        }
        result
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Extracts the function triple from a chat completions reply.
///
/// Reads the arguments of the first tool call, or of the legacy
/// `function_call` field. A missing or blank language falls back to
/// `default_language`; a missing code or name is a parse failure.
pub fn extract_function(
    reply: &Value,
    default_language: &str,
) -> Result<GeneratedFunction, GenerationError> {
    let message = reply
        .pointer("/choices/0/message")
        .ok_or_else(|| GenerationError::Parse("reply contains no message".to_string()))?;

    let arguments = message
        .pointer("/tool_calls/0/function/arguments")
        .or_else(|| message.pointer("/function_call/arguments"))
        .and_then(Value::as_str);

    let Some(arguments) = arguments else {
        let reason = message
            .get("refusal")
            .and_then(Value::as_str)
            .or_else(|| message.get("content").and_then(Value::as_str))
            .unwrap_or("no function call in reply");
        return Err(GenerationError::Refused(reason.to_string()));
    };

    let parsed: FunctionArguments = serde_json::from_str(arguments)
        .map_err(|e| GenerationError::Parse(format!("{}. Input: {}", e, arguments)))?;

    let code = non_blank(parsed.function_code)
        .ok_or_else(|| GenerationError::Parse(format!("missing function_code. Input: {}", arguments)))?;
    let name = non_blank(parsed.function_name)
        .ok_or_else(|| GenerationError::Parse(format!("missing function_name. Input: {}", arguments)))?;
    let language = non_blank(parsed.function_language).unwrap_or_else(|| default_language.to_string());

    Ok(GeneratedFunction {
        name: name.trim().to_string(),
        code,
        language: language.trim().to_string(),
    })
}

/// Deterministic offline generator, enabled with `METAPROGRAMMER_USE_MOCK`.
pub struct MockGenerator;

impl MockGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn mock_generate(&self, instruction: &str) -> Result<GeneratedFunction, GenerationError> {
        let lower = instruction.to_lowercase();

        if lower.starts_with("the following code has issues") {
            return self.mock_fix(instruction);
        }

        let (name, code, language) = if lower.contains("nothing") || lower.contains("refuse") {
            return Err(GenerationError::Refused("mock backend declined the request".to_string()));
        } else if lower.contains("add") && (lower.contains("two") || lower.contains('2')) {
            (
                "add_two",
                "def add_two(x: int) -> int:\n    \"\"\"Return x plus two.\"\"\"\n    return x + 2\n".to_string(),
                "python",
            )
        } else if lower.contains("greet") || lower.contains("hello") {
            (
                "greet",
                "def greet(name: str) -> None:\n    \"\"\"Print a greeting for name.\"\"\"\n    print(f\"Hello, {name}!\")\n".to_string(),
                "python",
            )
        } else if lower.contains("javascript") {
            (
                "shout",
                "function shout(text) {\n  return text.toUpperCase();\n}\n".to_string(),
                "javascript",
            )
        } else {
            let name = snake_case_name(instruction);
            // JSON string literals are valid Python string literals
            let message = serde_json::to_string(&format!("Mock function for: {}", instruction))
                .unwrap_or_else(|_| "\"Mock function\"".to_string());
            let code = format!(
                "def {}() -> None:\n    \"\"\"Generated offline.\"\"\"\n    print({})\n",
                name, message
            );
            return Ok(GeneratedFunction {
                name,
                code,
                language: "python".to_string(),
            });
        };

        Ok(GeneratedFunction {
            name: name.to_string(),
            code,
            language: language.to_string(),
        })
    }

    /// Keeps the name of the first `def` in the instruction and marks the code as revised.
    fn mock_fix(&self, instruction: &str) -> Result<GeneratedFunction, GenerationError> {
        let name = instruction
            .split("def ")
            .nth(1)
            .map(|rest| {
                rest.chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            })
            .filter(|n| !n.is_empty())
            .ok_or_else(|| GenerationError::Parse("no function definition to fix".to_string()))?;

        Ok(GeneratedFunction {
            code: format!(
                "def {}(*args, **kwargs):\n    \"\"\"Revised offline.\"\"\"\n    print(\"revised\")\n",
                name
            ),
            name,
            language: "python".to_string(),
        })
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn snake_case_name(instruction: &str) -> String {
    let words: Vec<String> = instruction
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .take(3)
        .collect();

    let name = words.join("_");
    match name.chars().next() {
        None => "generated_function".to_string(),
        Some(c) if c.is_ascii_digit() => format!("fn_{}", name),
        Some(_) => name,
    }
}

#[async_trait]
impl CodeGenerator for MockGenerator {
    async fn generate(&self, instruction: &str) -> Result<GeneratedFunction, GenerationError> {
        info!("Using mock generator (METAPROGRAMMER_USE_MOCK)");
        let result = self.mock_generate(instruction);
        if let Err(e) = &result {
            warn!("The function could not be generated: {}", e);
        }
        result
    }
}

/// Builds the generator selected by the configuration.
pub fn generator_from_config(config: &Config) -> anyhow::Result<Box<dyn CodeGenerator>> {
    if config.is_mock_mode() {
        return Ok(Box::new(MockGenerator::new()));
    }

    match config.get_api_key() {
        Some(api_key) => Ok(Box::new(OpenAiGenerator::from_config(config, api_key))),
        None => Err(anyhow!(
            "No OpenAI API key found. Please set it using one of these methods:

1. Set API key in config:
   metaprog --set-api-key sk-your-key-here

2. Set environment variable:
   export OPENAI_API_KEY=sk-your-key-here

3. Run offline with the mock generator:
   metaprog --mock

4. Check current config:
   metaprog --config"
        )),
    }
}
