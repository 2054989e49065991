use std::path::PathBuf;

use agentlog_core::{
    config::Config,
    emit::sink_for,
    log_ctx,
    metadata::detect_project_id,
    middleware::RequestLogLayer,
    runner::instrument_stream,
    telemetry::init_telemetry,
    LogContext,
};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::{Layer, ServiceExt};

#[derive(Parser)]
#[command(author, version, about = "agentlog CLI smoke tool", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit one structured record built from key=value fields
    Emit {
        /// Field as key=value; dotted keys nest, values parse as JSON when possible
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
        #[arg(short, long)]
        message: Option<String>,
        /// Record an error with this message and escalate severity
        #[arg(long)]
        error: Option<String>,
    },
    /// Print the detected GCP project id
    ProjectId,
    /// Run a simulated agent request through the middleware
    Demo {
        #[arg(long, default_value = "demo-session")]
        session: String,
        #[arg(long, default_value = "/chat")]
        path: String,
    },
}

fn parse_field(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err("empty key".into());
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    let _telemetry = init_telemetry(&cfg.telemetry)?;

    match cli.command {
        Commands::Emit {
            fields,
            message,
            error,
        } => {
            let sink = sink_for(cfg.emission.sink);
            let emitted = LogContext::scope(async {
                let ctx = LogContext::from_config(&cfg.emission);
                ctx.enrich(fields);
                if let Some(msg) = error {
                    ctx.record_error(agentlog_core::ErrorRecord::new("CliError", msg, "agentlog"));
                }
                ctx.emit(&*sink, message.as_deref())
            })
            .await;
            if !emitted {
                eprintln!("nothing to emit: no fields given");
            }
        }
        Commands::ProjectId => {
            let id = detect_project_id(&cfg.gcp)
                .await
                .ok_or_else(|| anyhow::anyhow!("no project id found"))?;
            println!("{id}");
        }
        Commands::Demo { session, path } => {
            let project_id = detect_project_id(&cfg.gcp).await;
            let layer = RequestLogLayer::from_config(&cfg, project_id);
            let snippet_len = cfg.emission.snippet_len;
            let svc = layer.layer(tower::service_fn(move |req: http::Request<Value>| {
                demo_handler(req, snippet_len)
            }));

            let req = http::Request::post(path).body(json!({
                "session_id": session,
                "user_id": "cli-user",
                "message": "What's the weather in Paris?"
            }))?;
            let resp = svc.oneshot(req).await?;
            eprintln!("demo finished with status {}", resp.status());
        }
    }

    Ok(())
}

/// Stand-in for an agent endpoint: streams a few canned runner chunks.
async fn demo_handler(
    req: http::Request<Value>,
    snippet_len: usize,
) -> Result<http::Response<String>, std::convert::Infallible> {
    let runner = json!({"agent": {
        "name": "weather-agent",
        "model": {"model_name": "gemini-1.5-flash", "generation_config": {"temperature": 0.4}}
    }});
    let chunks = vec![
        json!({"agent_name": "router", "usage": {"total_tokens": 42}}),
        json!({
            "source": "weather-agent",
            "usage_metadata": {"total_token_count": 118},
            "content": {"parts": [{"function_call": {"name": "get_weather", "args": {"city": "Paris"}}}]}
        }),
        json!({"agent_name": "weather-agent", "text": "It is 22°C and sunny in Paris."}),
    ];

    let ctx = log_ctx();
    if let Some(question) = req.body().get("message").and_then(Value::as_str) {
        ctx.add_content("llm.question", question, snippet_len);
    }
    let mut stream = instrument_stream(
        ctx,
        "run_async",
        &runner,
        req.body(),
        futures_util::stream::iter(chunks),
    );
    let mut answer = String::new();
    while let Some(chunk) = stream.next().await {
        if let Some(text) = chunk.get("text").and_then(Value::as_str) {
            answer.push_str(text);
        }
    }
    drop(stream);
    ctx.add_content("llm.response", &answer, snippet_len);
    tracing::info!(chars = answer.len(), "demo answer ready");

    Ok(http::Response::new(answer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_parse_as_json_or_string() {
        assert_eq!(parse_field("a.b=3").unwrap(), ("a.b".into(), json!(3)));
        assert_eq!(parse_field("k=hello").unwrap(), ("k".into(), json!("hello")));
        assert_eq!(parse_field("k={\"x\":1}").unwrap().1, json!({"x": 1}));
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=1").is_err());
    }
}
