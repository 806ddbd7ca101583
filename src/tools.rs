//! Executable tools and the registry the client dispatches tool calls through.
//!
//! A tool pairs a [`ToolDefinition`] (what the model sees) with a [`ToolExecutor`]
//! (what runs when the model calls it). Any async closure taking and returning JSON is
//! an executor:
//!
//! ```
//! use serde_json::{Value, json};
//! use tessera_llm::schema::Schema;
//! use tessera_llm::tools::{BoxError, ExecutableTool};
//!
//! let tool = ExecutableTool::new(
//!     "add",
//!     "Adds two integers",
//!     Schema::object([("a", Schema::integer()), ("b", Schema::integer())]),
//!     |args: Value| async move {
//!         let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
//!         Ok::<Value, BoxError>(json!(sum))
//!     },
//! );
//! assert_eq!(tool.name(), "add");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;

use crate::error::LLMError;
use crate::schema::compiler::WRAPPER_PROPERTY;
use crate::schema::validate::validate;
use crate::schema::{CompileTarget, Dialect, Schema};
use crate::types::{ToolCall, ToolDefinition};

/// Error type returned by tool executors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Runs a tool with already validated arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: Value) -> Result<Value, BoxError>;
}

#[async_trait]
impl<F, Fut> ToolExecutor for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    async fn execute(&self, arguments: Value) -> Result<Value, BoxError> {
        (self)(arguments).await
    }
}

/// A tool definition bound to its executor.
#[derive(Clone)]
pub struct ExecutableTool {
    pub definition: ToolDefinition,
    pub executor: Arc<dyn ToolExecutor>,
}

impl fmt::Debug for ExecutableTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl ExecutableTool {
    pub fn new<E>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Schema,
        executor: E,
    ) -> Self
    where
        E: ToolExecutor + 'static,
    {
        Self {
            definition: ToolDefinition::new(name, description, parameters),
            executor: Arc::new(executor),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Validates `arguments` as the `dialect` backend produced them, then executes.
    ///
    /// Arguments of tools whose parameter schema is not an object arrive wrapped in a
    /// `value` property and are unwrapped first.
    pub async fn invoke(&self, arguments: &Value, dialect: Dialect) -> Result<Value, LLMError> {
        let name = self.name().to_string();
        let compiled = dialect
            .compiler()
            .compile_schema(&self.definition.parameters, CompileTarget::ToolInput)?;

        let arguments = match arguments {
            Value::String(raw) => serde_json::from_str(raw).map_err(|err| LLMError::ToolExecution {
                name: name.clone(),
                message: format!("arguments are not valid JSON: {err}"),
            })?,
            other => other.clone(),
        };
        let arguments = if compiled.wrapped {
            match arguments {
                Value::Object(mut map) => {
                    map.remove(WRAPPER_PROPERTY)
                        .ok_or_else(|| LLMError::ToolExecution {
                            name: name.clone(),
                            message: format!("arguments lack the `{WRAPPER_PROPERTY}` property"),
                        })?
                }
                _ => {
                    return Err(LLMError::ToolExecution {
                        name,
                        message: format!(
                            "expected an object with a `{WRAPPER_PROPERTY}` property"
                        ),
                    });
                }
            }
        } else {
            arguments
        };

        validate(&compiled.validation, &arguments).map_err(|reason| LLMError::ToolExecution {
            name: name.clone(),
            message: format!("invalid arguments: {reason}"),
        })?;

        self.executor
            .execute(arguments)
            .await
            .map_err(|err| LLMError::ToolExecution {
                name,
                message: err.to_string(),
            })
    }
}

/// Outcome of one tool call.
#[derive(Debug)]
pub struct ToolExecution {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: Result<Value, LLMError>,
}

impl ToolExecution {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Tool registry shared by every call on a client.
///
/// Registration replaces an existing tool of the same name. Tools are never removed.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ExecutableTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: ExecutableTool) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.insert(tool.name().to_string(), tool).is_some() {
            tracing::debug!("replaced a registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<ExecutableTool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Definitions of every registered tool, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        let mut definitions = tools
            .values()
            .map(|tool| tool.definition.clone())
            .collect::<Vec<_>>();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every call concurrently. Results keep the order of `calls`, and a failing
    /// call never affects the others.
    pub async fn execute_all(&self, calls: &[ToolCall], dialect: Dialect) -> Vec<ToolExecution> {
        let runs = calls.iter().map(|call| async move {
            let outcome = match self.get(&call.name) {
                Some(tool) => tool.invoke(&call.arguments, dialect).await,
                None => Err(LLMError::ToolNotFound {
                    name: call.name.clone(),
                }),
            };
            if let Err(err) = &outcome {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %err, "tool call failed");
            }
            ToolExecution {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                outcome,
            }
        });
        join_all(runs).await
    }
}
