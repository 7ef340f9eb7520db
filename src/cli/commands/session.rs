use anyhow::anyhow;
use serde_json::json;

use crate::cli::client::{GateClient, GateResponse};
use crate::cli::utils::{output_decision, output_success};
use crate::cli::OutputFormat;
use crate::types::RoutingDecision;

fn decision_from(response: &GateResponse) -> anyhow::Result<RoutingDecision> {
    serde_json::from_value(response.data().clone()).map_err(|_| anyhow!(response.error_message()))
}

fn report_decision(response: GateResponse, output_format: OutputFormat) -> anyhow::Result<()> {
    let decision = decision_from(&response)?;
    output_decision(&output_format, &decision)?;
    match decision {
        RoutingDecision::Failed { reason } => Err(anyhow!("resolution failed: {}", reason.message)),
        _ => Ok(()),
    }
}

pub async fn resolve(client: &GateClient, role: Option<&str>, output_format: OutputFormat) -> anyhow::Result<()> {
    report_decision(client.resolve(role).await?, output_format)
}

pub async fn landing(client: &GateClient, output_format: OutputFormat) -> anyhow::Result<()> {
    report_decision(client.landing().await?, output_format)
}

pub async fn choose_role(client: &GateClient, role: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let response = client.choose_role(role).await?;
    if !response.status.is_success() {
        return Err(anyhow!(response.error_message()));
    }

    output_success(&output_format, "Role updated", Some(response.body.clone()))?;
    if let OutputFormat::Text = output_format {
        if let Ok(next) = serde_json::from_value::<RoutingDecision>(response.body["next"].clone()) {
            output_decision(&output_format, &next)?;
        }
    }
    Ok(())
}

pub async fn sign_out(client: &GateClient, output_format: OutputFormat) -> anyhow::Result<()> {
    let response = client.sign_out().await?;
    if !response.status.is_success() {
        return Err(anyhow!(response.error_message()));
    }
    output_success(&output_format, "Signed out", Some(json!({ "next": response.data() })))
}

pub async fn health(client: &GateClient, output_format: OutputFormat) -> anyhow::Result<()> {
    let response = client.health().await?;
    if !response.status.is_success() {
        return Err(anyhow!("server unhealthy: {}", response.data()));
    }
    output_success(&output_format, "Server healthy", Some(response.data().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn reads_decision_from_envelope() {
        let response = GateResponse {
            status: StatusCode::OK,
            body: json!({ "success": true, "data": { "decision": "redirect", "path": "/login" } }),
        };
        assert_eq!(decision_from(&response).unwrap(), RoutingDecision::redirect("/login"));
    }

    #[test]
    fn error_body_becomes_error() {
        let response = GateResponse {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": true, "message": "Unknown role: wizard", "code": "BAD_REQUEST" }),
        };
        let err = decision_from(&response).unwrap_err();
        assert_eq!(err.to_string(), "Unknown role: wizard");
    }
}
