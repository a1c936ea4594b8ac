//! A Model Context Protocol router exposing one `refine_backlog` tool.
//!
//! Served over stdio by the `refine-backlog-mcp` binary through
//! `mcp_server::Server`. Failed calls come back as tool errors so the chat
//! client shows the message instead of a protocol failure.

use std::future::Future;
use std::pin::Pin;

use mcp_server::router::CapabilitiesBuilder;
use mcp_server::Router;
use mcp_spec::content::Content;
use mcp_spec::handler::{PromptError, ResourceError, ToolError};
use mcp_spec::prompt::Prompt;
use mcp_spec::protocol::ServerCapabilities;
use mcp_spec::resource::Resource;
use mcp_spec::tool::Tool;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{format_response, ClientError, RefineClient, RefineRequest, PRICING_URL};

pub use mcp_server::router::RouterService;
pub use mcp_server::{ByteTransport, Server};

pub const SERVER_NAME: &str = "refine-backlog";
pub const TOOL_NAME: &str = "refine_backlog";

const TOOL_DESCRIPTION: &str = concat!(
    "Refine messy backlog items into structured, actionable work items. ",
    "Returns each item with a clean title, problem statement, acceptance criteria, ",
    "T-shirt size estimate (XS/S/M/L/XL), priority with rationale, tags, and optional assumptions. ",
    "Free tier: up to 5 items per request. Pro: 25. Team: 50.\n\n",
    "Before calling this tool, ask the user whether titles should be user stories ",
    "and whether acceptance criteria should use Gherkin (Given/When/Then), ",
    "and set useUserStories and useGherkin accordingly. Both default to false.\n\n",
    "For higher limits, set REFINE_BACKLOG_KEY in the MCP server environment. ",
    "Get a key at https://refinebacklog.com/pricing",
);

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolArguments {
    #[serde(default)]
    items: Vec<String>,
    context: Option<String>,
    license_key: Option<String>,
    use_user_stories: Option<bool>,
    use_gherkin: Option<bool>,
}

/// Routes MCP requests to the Refine Backlog API.
#[derive(Clone)]
pub struct RefineRouter {
    client: RefineClient,
}

impl RefineRouter {
    pub fn new(client: RefineClient) -> Self {
        Self { client }
    }
}

impl Router for RefineRouter {
    fn name(&self) -> String {
        SERVER_NAME.to_string()
    }

    fn instructions(&self) -> String {
        "Use the refine_backlog tool to turn raw backlog items into structured work items."
            .to_string()
    }

    fn capabilities(&self) -> ServerCapabilities {
        CapabilitiesBuilder::new().with_tools(false).build()
    }

    fn list_tools(&self) -> Vec<Tool> {
        vec![tool_definition()]
    }

    fn call_tool(&self, tool_name: &str, arguments: Value) -> BoxFuture<Vec<Content>, ToolError> {
        let client = self.client.clone();
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            if tool_name != TOOL_NAME {
                return Err(ToolError::NotFound(tool_name));
            }
            refine_backlog(&client, arguments).await
        })
    }

    fn list_resources(&self) -> Vec<Resource> {
        Vec::new()
    }

    fn read_resource(&self, uri: &str) -> BoxFuture<String, ResourceError> {
        let uri = uri.to_string();
        Box::pin(async move { Err(ResourceError::NotFound(uri)) })
    }

    fn list_prompts(&self) -> Vec<Prompt> {
        Vec::new()
    }

    fn get_prompt(&self, prompt_name: &str) -> BoxFuture<String, PromptError> {
        let prompt_name = prompt_name.to_string();
        Box::pin(async move { Err(PromptError::NotFound(prompt_name)) })
    }
}

#[instrument(name = "refine_backlog_tool", skip_all)]
async fn refine_backlog(client: &RefineClient, arguments: Value) -> Result<Vec<Content>, ToolError> {
    let args: ToolArguments = serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidParameters(format!("invalid arguments: {e}")))?;
    if args.items.is_empty() {
        return Err(ToolError::InvalidParameters(
            "items array is required and must not be empty.".to_string(),
        ));
    }

    debug!(items = args.items.len(), "Calling Refine Backlog API");
    let request = RefineRequest {
        items: args.items,
        context: args.context.filter(|c| !c.trim().is_empty()),
        use_user_stories: args.use_user_stories,
        use_gherkin: args.use_gherkin,
    };
    // An explicit key argument overrides the one from the environment.
    let response = client
        .refine(&request, args.license_key.as_deref())
        .await
        .map_err(|e| ToolError::ExecutionError(describe_failure(&e)))?;
    Ok(vec![Content::text(format_response(&response))])
}

/// Chat-facing text for a failed call, pointing at the upgrade page when the gateway asks for it.
fn describe_failure(error: &ClientError) -> String {
    match error {
        ClientError::RateLimited { message, upgrade } => format!(
            "⚠️ {message}\n\n👉 Upgrade at {}\n\nOnce you have a key, set REFINE_BACKLOG_KEY in the `env` section of your MCP server config.",
            upgrade.as_deref().unwrap_or(PRICING_URL)
        ),
        ClientError::Rejected {
            message,
            upgrade: Some(upgrade),
            ..
        } => format!(
            "⚠️ {message}\n\n👉 Upgrade at {upgrade}\n\nOnce you have a license key, pass it as the `licenseKey` parameter."
        ),
        ClientError::Rejected { message, .. } => {
            format!("Error from Refine Backlog API: {message}")
        }
        other => other.to_string(),
    }
}

pub fn tool_definition() -> Tool {
    Tool::new(
        TOOL_NAME,
        TOOL_DESCRIPTION,
        json!({
            "type": "object",
            "required": ["items"],
            "properties": {
                "items": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "maxItems": 50,
                    "description": "Raw backlog item strings to refine.",
                },
                "context": {
                    "type": "string",
                    "description": "Optional project context, e.g. \"B2B SaaS CRM for enterprise sales teams\".",
                },
                "licenseKey": {
                    "type": "string",
                    "description": "Optional Pro or Team license key. Overrides REFINE_BACKLOG_KEY.",
                },
                "useUserStories": {
                    "type": "boolean",
                    "description": "Add a user story: \"As a [user], I want [goal], so that [benefit]\". Default: false.",
                },
                "useGherkin": {
                    "type": "boolean",
                    "description": "Write acceptance criteria as Given/When/Then. Default: false.",
                },
            },
        }),
    )
}
