//! `coxy login`: run the device flow in the terminal.

use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::auth::{CopilotMetaClient, DeviceFlowClient, DeviceFlowEvent, TokenFetcher};
use crate::config::CoxyConfig;
use crate::http::upstream_client;

/// Handle `coxy login`.
pub async fn handle_login(
    config: &CoxyConfig,
    verify: bool,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = upstream_client(Duration::from_secs(10))?;
    let mut flow = DeviceFlowClient::new(client.clone())
        .with_poll_interval(config.device_flow_poll)
        .start();

    let mut access_token = None;
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            event = flow.next() => Some(event),
        };
        let Some(event) = next else {
            flow.cancel();
            eprintln!("Login cancelled.");
            return Ok(());
        };
        let Some(event) = event else { break };
        match &event {
            DeviceFlowEvent::Initiated {
                verification_uri,
                user_code,
                ..
            } => {
                println!("🔗 Visit: {verification_uri}");
                println!("📋 Enter code: {user_code}");
                println!("⏳ Waiting for authorization...");
            }
            DeviceFlowEvent::Pending { .. } => {}
            DeviceFlowEvent::Success {
                access_token: token,
                message,
            } => {
                println!("✅ {message}");
                access_token = Some(token.clone());
            }
            DeviceFlowEvent::Error { message } | DeviceFlowEvent::Expired { message } => {
                return Err(message.clone().into());
            }
        }
    }

    let Some(access_token) = access_token else {
        return Err("device flow ended without a result".into());
    };
    println!("   Use this as your API key: {access_token}");

    if verify {
        let meta = CopilotMetaClient::new(client).fetch(&access_token).await?;
        println!("   Copilot token valid until {}", meta.expires_at);
        if let Some(chat) = meta.chat_quota {
            println!("   Chat quota: {chat}");
        }
        if let Some(completions) = meta.completions_quota {
            println!("   Completions quota: {completions}");
        }
        if let Some(reset) = meta.reset_time {
            println!("   Quota resets at {reset}");
        }
    }
    Ok(())
}
