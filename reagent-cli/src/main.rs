//! reagent CLI - run a one-shot agent task from the terminal.

use clap::{Parser, ValueEnum};
use reagent::models::Throttled;
use reagent::prelude::*;
use reagent::tools::{builtin_tool, BUILTIN_TOOL_NAMES};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Which step strategy the agent uses.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum ActionType {
    /// The model emits one code block per step.
    #[default]
    Code,
    /// The model uses the structured tool-call channel.
    ToolCalling,
}

/// reagent - run LLM agents from the command line
#[derive(Parser, Debug)]
#[command(name = "reagent")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The task to run
    task: String,

    /// Agent action type
    #[arg(short, long, value_enum, default_value_t = ActionType::Code)]
    action_type: ActionType,

    /// Model id (e.g. gpt-4o)
    #[arg(short, long, default_value = "gpt-4o")]
    model_id: String,

    /// Custom API base URL (OpenAI-compatible endpoints)
    #[arg(long, env = "OPENAI_BASE_URL")]
    base_url: Option<String>,

    /// API key (falls back to OPENAI_API_KEY)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Tools to enable, by built-in name
    #[arg(short, long, value_delimiter = ',', default_values_t = [
        "web_search".to_string(), "visit_webpage".to_string()
    ])]
    tools: Vec<String>,

    /// Extra sandbox imports to authorize (code agents)
    #[arg(long, value_delimiter = ',')]
    authorized_imports: Vec<String>,

    /// Maximum number of action steps
    #[arg(long, default_value_t = 20)]
    max_steps: usize,

    /// Insert a planning step every N action steps
    #[arg(long)]
    planning_interval: Option<usize>,

    /// Throttle model calls to this many requests per minute
    #[arg(long)]
    requests_per_minute: Option<f64>,

    /// Verbosity: -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::new("reagent=warn,reagent_cli=info"),
        1 => EnvFilter::new("reagent=debug,reagent_cli=debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn build_agent(args: &Args) -> anyhow::Result<Agent> {
    let mut client = OpenAIClient::new(&args.api_key);
    if let Some(base_url) = &args.base_url {
        client = client.with_base_url(base_url);
    }
    let completion = client.completion_model(&args.model_id);

    let model: Box<dyn Model> = match args.requests_per_minute {
        Some(rpm) => Box::new(Throttled::new(completion, rpm)),
        None => Box::new(completion),
    };

    let mut builder = match args.action_type {
        ActionType::Code => Agent::code(),
        ActionType::ToolCalling => Agent::tool_calling(),
    }
    .model(model)
    .max_steps(args.max_steps)
    .additional_authorized_imports(args.authorized_imports.iter().cloned());

    if let Some(interval) = args.planning_interval {
        builder = builder.planning_interval(interval);
    }

    for name in &args.tools {
        let tool = builtin_tool(name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown tool '{name}'; built-in tools are: {}",
                BUILTIN_TOOL_NAMES.join(", ")
            )
        })?;
        builder = builder.tool(tool);
    }

    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut agent = build_agent(&args)?;

    let result = agent.run_detailed(&args.task).await;
    match result.state {
        RunState::Success | RunState::MaxStepsReached => {
            if result.state == RunState::MaxStepsReached {
                eprintln!("warning: step budget exhausted, answer was synthesized from memory");
            }
            let output = result.output.unwrap_or_default();
            match output {
                serde_json::Value::String(text) => println!("{text}"),
                other => println!("{other}"),
            }
            Ok(())
        }
        RunState::Interrupted => anyhow::bail!("agent run was interrupted"),
        RunState::Failed => anyhow::bail!(
            "agent run failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_owned())
        ),
    }
}
