//! Tool dispatch table with schema validation.
//!
//! Each tool is a descriptor plus a handler; the input schema is compiled
//! into a `jsonschema::Validator` at registration so dispatch validates
//! without re-parsing the schema. Unknown tool → method-not-found; schema
//! mismatch → invalid-params carrying every violation, joined.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Value;

use finhub_core::{HubError, RequestContext, ToolDescriptor};

/// One hosted tool. Handlers receive the raw (validated) arguments and
/// the request context; they surface failures as `HubError` kinds, which
/// map directly onto the wire codes.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: &Value, ctx: &RequestContext) -> Result<Value, HubError>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: Option<Validator>,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of the tools this spoke advertises.
pub struct ToolRegistry {
    service_name: String,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tools: HashMap::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Register a tool. The descriptor's owning service is forced to this
    /// spoke's name; an uncompilable schema leaves the tool callable but
    /// unvalidated.
    pub fn register(&mut self, mut descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        descriptor.service_name = self.service_name.clone();
        let validator = match Validator::new(&descriptor.input_schema) {
            Ok(validator) => Some(validator),
            Err(err) => {
                tracing::warn!(
                    tool = %descriptor.qualified_name,
                    error = %err,
                    "input schema failed to compile, skipping validation"
                );
                None
            }
        };
        self.tools.insert(
            descriptor.qualified_name.clone(),
            RegisteredTool {
                descriptor,
                validator,
                handler,
            },
        );
    }

    /// Descriptors for registration with the hub and `tools/list`.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        descriptors
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Validate arguments against the tool's compiled schema, collecting
    /// all violations.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<(), HubError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| HubError::MethodNotFound(format!("unknown tool: {name}")))?;

        if let Some(validator) = &tool.validator {
            let errors: Vec<String> = validator
                .iter_errors(arguments)
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();
            if !errors.is_empty() {
                return Err(HubError::InvalidParams(errors.join("; ")));
            }
        }
        Ok(())
    }

    /// Validate, then run the handler under the context deadline.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, HubError> {
        self.validate(name, arguments)?;
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| HubError::MethodNotFound(format!("unknown tool: {name}")))?;

        tokio::select! {
            result = tool.handler.call(arguments, ctx) => result,
            _ = ctx.cancelled() => Err(HubError::Cancelled),
            _ = tokio::time::sleep(ctx.remaining()) => Err(HubError::DeadlineExceeded),
        }
    }
}
