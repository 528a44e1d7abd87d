use std::time::Duration;

use btc_dex_flows::config::Config;
use btc_dex_flows::{
    FaucetRequest, FlowIdRequest, GetBalancesRequest, QuoteSwapRequest, SwapTokensRequest,
};
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::SseClientTransport;
use serde::Serialize;

type Client = RunningService<RoleClient, ClientInfo>;

/// Example of driving the DEX flows through rmcp's SSE client
///
/// This example demonstrates:
/// 1. Connecting to the MCP server via SSE transport
/// 2. Listing available tools
/// 3. Funding the account with wrapped coin through the faucet flow
/// 4. Quoting a swap
/// 5. Running the approve + swap flow and following it to completion
/// 6. Reading balances and pool reserves afterwards
#[tokio::main]
async fn main() {
    let config = Config::from_yaml("config/default.yaml")
        .await
        .expect("failed to load configuration");
    let uri = format!("http://localhost:{}/dex/sse", config.server.port);

    let transport = SseClientTransport::start(uri.as_str())
        .await
        .expect("Failed to start SSE client transport");

    let client_info = ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "btc-dex-flows-client".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        },
    };

    let client = client_info
        .serve(transport)
        .await
        .inspect_err(|e| {
            eprintln!("client error: {e:?}");
        })
        .expect("Failed to serve client");

    println!("✓ Connected to MCP server at {}\n", uri);

    // 1. List available tools
    println!("=== Listing available tools ===");
    let tools_response = client.list_tools(None).await.expect("failed to list tools");

    println!("Available tools:");
    for tool in &tools_response.tools {
        let desc = tool
            .description
            .as_ref()
            .map(|s| s.as_ref())
            .unwrap_or("No description");

        println!("  - {}: {}", tool.name, desc);
    }
    println!();

    // 2. Fund the account with wrapped coin
    println!("=== Depositing 0.01 into WBTC ===");
    let faucet = call(
        &client,
        "faucet",
        &FaucetRequest {
            token: "WBTC".to_string(),
            amount: "0.01".to_string(),
        },
    )
    .await;
    follow_flow(&client, &faucet).await;

    // 3. Quote the swap
    println!("=== Quoting 0.001 WBTC -> TBTC ===");
    let quote = call(
        &client,
        "quote_swap",
        &QuoteSwapRequest {
            token_in: "WBTC".to_string(),
            token_out: "TBTC".to_string(),
            amount_in: "0.001".to_string(),
            slippage_tolerance: Some("0.5".to_string()),
        },
    )
    .await;
    println!("{}\n", serde_json::to_string_pretty(&quote).unwrap());

    // 4. Approve and swap
    println!("=== Swapping 0.001 WBTC -> TBTC ===");
    let swap = call(
        &client,
        "swap_tokens",
        &SwapTokensRequest {
            token_in: "WBTC".to_string(),
            token_out: "TBTC".to_string(),
            amount_in: "0.001".to_string(),
            min_amount_out: None,
            slippage_tolerance: Some("0.5".to_string()),
        },
    )
    .await;
    follow_flow(&client, &swap).await;

    // 5. Balances after both flows
    println!("=== Balances ===");
    let balances = call(&client, "get_balances", &GetBalancesRequest { refresh: true }).await;
    println!("{}\n", serde_json::to_string_pretty(&balances).unwrap());

    println!("=== All operations completed ===");
}

async fn call(client: &Client, name: &'static str, request: &impl Serialize) -> CallToolResult {
    let arguments = serde_json::to_value(request)
        .unwrap_or_else(|e| panic!("failed to serialize {name} request: {e}"))
        .as_object()
        .cloned();

    client
        .call_tool(CallToolRequestParam {
            name: name.into(),
            arguments,
        })
        .await
        .unwrap_or_else(|e| panic!("failed to call `{name}`: {e}"))
}

/// Polls `get_flow` until the flow started by `started` is no longer running or no
/// longer known to the server.
async fn follow_flow(client: &Client, started: &CallToolResult) {
    let Some(flow_id) = started
        .structured_content
        .as_ref()
        .and_then(|v| v.get("flow_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
    else {
        println!("Flow did not start:");
        println!("{}\n", serde_json::to_string_pretty(started).unwrap());
        return;
    };

    println!("Started flow {flow_id}");
    loop {
        let flow = call(
            client,
            "get_flow",
            &FlowIdRequest {
                flow_id: flow_id.clone(),
            },
        )
        .await;
        let state = flow.structured_content.clone().unwrap_or_default();

        // Completed flows are discarded by the server
        if state.get("error").is_some() {
            println!("Flow {flow_id} completed and was discarded\n");
            return;
        }

        let status = state["status"].as_str().unwrap_or("unknown");
        if status != "running" {
            println!("Flow {flow_id} finished: {status}");
            println!("{}\n", serde_json::to_string_pretty(&state).unwrap());
            return;
        }

        if state["stalled"].as_bool() == Some(true) {
            println!("Confirmation timed out, rechecking");
            call(
                client,
                "recheck_flow",
                &FlowIdRequest {
                    flow_id: flow_id.clone(),
                },
            )
            .await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
