use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::types::RoutingDecision;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(target), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(
    output_format: &OutputFormat,
    message: &str,
    error_code: Option<&str>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": message
            });

            if let Some(code) = error_code {
                response["error_code"] = json!(code);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}

/// Output a routing decision in the appropriate format
pub fn output_decision(output_format: &OutputFormat, decision: &RoutingDecision) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(decision)?);
        }
        OutputFormat::Text => match decision {
            RoutingDecision::Render => println!("✓ render (access granted)"),
            RoutingDecision::Redirect { path } => println!("→ redirect to {}", path),
            RoutingDecision::Failed { reason } => {
                println!("✗ failed ({:?}): {}", reason.kind, reason.message)
            }
        },
    }
    Ok(())
}
