use std::sync::Arc;

use alloy::primitives::U256;
use rmcp::handler::server::wrapper::Parameters;
use tokio::time::{Duration, sleep};

use crate::config::Config;
use crate::context::AppContext;
use crate::flow::tests::{Confirmation, FakeLedger, FakeWallet, Signature, test_context};
use crate::flow::{FlowEngine, FlowId, FlowStatus};
use crate::registry::tests::{TBTC_ADDRESS, TUSDC_ADDRESS};
use crate::service::dex::DexService;
use crate::service::ServiceError;
use crate::service::types::{
    AddLiquidityRequest, FaucetRequest, FlowIdRequest, FlowResponse, GetBalancesRequest,
    QuoteSwapRequest, SwapTokensRequest, ToolResult,
};
use crate::wallet::WalletAdapter;

type Harness = (Arc<FakeWallet>, Arc<FakeLedger>, Arc<FlowEngine>, DexService);

fn service_with(wallet: FakeWallet) -> Harness {
    let wallet = Arc::new(wallet);
    let ledger = Arc::new(FakeLedger::default());
    let engine = Arc::new(FlowEngine::new(test_context(wallet.clone(), ledger.clone())));
    let service = DexService::new(engine.clone());
    (wallet, ledger, engine, service)
}

fn success<T>(result: ToolResult<T>) -> T {
    match result {
        ToolResult::Success(response) => response,
        ToolResult::Error { error } => panic!("Expected success but got error: {}", error),
    }
}

fn failure<T: std::fmt::Debug>(result: ToolResult<T>) -> ServiceError {
    match result {
        ToolResult::Success(response) => panic!("Expected error but got {:?}", response),
        ToolResult::Error { error } => error,
    }
}

fn flow_id_of(response: &FlowResponse) -> Parameters<FlowIdRequest> {
    Parameters(FlowIdRequest {
        flow_id: response.flow_id.clone(),
    })
}

async fn finish(engine: &FlowEngine, response: &FlowResponse) -> FlowStatus {
    let handle = engine.get(response.flow_id.parse::<FlowId>().unwrap()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("flow did not finish")
        .status
}

#[tokio::test]
async fn test_get_balances_reports_tokens_and_pools() {
    let (_wallet, ledger, _engine, service) = service_with(FakeWallet::connected());
    ledger.set_balance(TBTC_ADDRESS, U256::from(150_000_000u64));
    ledger.set_reserves(
        TBTC_ADDRESS,
        TUSDC_ADDRESS,
        U256::from(100_000_000u64),
        U256::from(50_000_000_000u64),
    );

    let response = success(
        service
            .get_balances(Parameters(GetBalancesRequest::default()))
            .await
            .0,
    );

    let tbtc = response
        .tokens
        .iter()
        .find(|t| t.symbol == "TBTC")
        .expect("TBTC listed");
    assert_eq!(tbtc.decimals, 8);
    assert_eq!(tbtc.formatted_balance, "1.5");
    assert_eq!(tbtc.router_allowance, "0");

    assert_eq!(response.pools.len(), 1);
    let pool = &response.pools[0];
    assert_eq!(pool.reserve_a, "1");
    assert_eq!(pool.reserve_b, "50000");
    assert_eq!(pool.price, "50000");
    assert!(pool.pair.is_some());
    assert_eq!(response.epoch, 0);
}

#[tokio::test]
async fn test_get_balances_without_wallet_fails() {
    let (_wallet, _ledger, _engine, service) = service_with(FakeWallet::disconnected());

    let error = failure(
        service
            .get_balances(Parameters(GetBalancesRequest::default()))
            .await
            .0,
    );
    assert_eq!(error, ServiceError::WalletNotConnected);
}

#[tokio::test]
async fn test_quote_swap_applies_slippage() {
    let (_wallet, ledger, _engine, service) = service_with(FakeWallet::connected());
    // 0.00001 TBTC = 1000 units, 0.001 TUSDC = 1000 units
    ledger.set_quote(U256::from(1000u64), U256::from(1000u64), Duration::ZERO);

    let response = success(
        service
            .quote_swap(Parameters(QuoteSwapRequest {
                token_in: "TBTC".to_string(),
                token_out: "tusdc".to_string(),
                amount_in: "0.00001".to_string(),
                slippage_tolerance: Some("1".to_string()),
            }))
            .await
            .0,
    );

    assert_eq!(response.estimated_output, "0.001");
    assert_eq!(response.estimated_output_raw, "1000");
    assert_eq!(response.minimum_output, "0.00099");
    assert_eq!(response.exchange_rate, "100");
    // No pair registered with the fake ledger
    assert_eq!(response.price_impact, "0");
}

#[tokio::test]
async fn test_quote_swap_without_liquidity_is_invalid_request() {
    let (_wallet, _ledger, _engine, service) = service_with(FakeWallet::connected());

    let error = failure(
        service
            .quote_swap(Parameters(QuoteSwapRequest {
                token_in: "TBTC".to_string(),
                token_out: "TUSDC".to_string(),
                amount_in: "1".to_string(),
                slippage_tolerance: None,
            }))
            .await
            .0,
    );
    assert!(matches!(error, ServiceError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_quote_swap_rejects_unknown_token() {
    let (_wallet, _ledger, _engine, service) = service_with(FakeWallet::connected());

    let error = failure(
        service
            .quote_swap(Parameters(QuoteSwapRequest {
                token_in: "DOGE".to_string(),
                token_out: "TUSDC".to_string(),
                amount_in: "1".to_string(),
                slippage_tolerance: None,
            }))
            .await
            .0,
    );
    match error {
        ServiceError::InvalidRequest(msg) => assert!(msg.contains("TBTC")),
        other => panic!("Expected InvalidRequest, got {:?}", other),
    }
}

#[tokio::test]
async fn test_add_liquidity_tool_runs_flow_to_completion() {
    let (wallet, _ledger, engine, service) = service_with(FakeWallet::connected());

    let started = success(
        service
            .add_liquidity(Parameters(AddLiquidityRequest {
                token_a: "TBTC".to_string(),
                token_b: "TUSDC".to_string(),
                amount_a: "1".to_string(),
                amount_b: "50000".to_string(),
            }))
            .await
            .0,
    );

    assert_eq!(started.kind, "add_liquidity");
    assert_eq!(started.status, "running");
    assert_eq!(started.steps.len(), 3);
    assert_eq!(started.steps[0].kind, "approve_token_a");

    assert_eq!(finish(&engine, &started).await, FlowStatus::Complete);
    assert_eq!(wallet.signed().len(), 3);

    // Completed flows are discarded
    assert!(matches!(
        failure(service.get_flow(flow_id_of(&started)).await.0),
        ServiceError::InvalidRequest(_)
    ));
    assert!(service.list_flows().await.0.flows.is_empty());
}

#[tokio::test]
async fn test_failed_flow_is_listed_until_dismissed() {
    let (wallet, _ledger, engine, service) = service_with(FakeWallet::connected());
    wallet.script([Signature::Sign, Signature::Reject("User rejected".into())]);

    let started = success(
        service
            .add_liquidity(Parameters(AddLiquidityRequest {
                token_a: "TBTC".to_string(),
                token_b: "TUSDC".to_string(),
                amount_a: "100".to_string(),
                amount_b: "100000".to_string(),
            }))
            .await
            .0,
    );
    assert_eq!(finish(&engine, &started).await, FlowStatus::Failed);

    let flow = success(service.get_flow(flow_id_of(&started)).await.0);
    assert_eq!(flow.status, "failed");
    let statuses: Vec<&str> = flow.steps.iter().map(|s| s.status.as_str()).collect();
    assert_eq!(statuses, vec!["confirmed", "failed", "pending"]);
    assert!(flow.steps[0].tx_hash.is_some());
    assert_eq!(
        flow.error,
        Some(ServiceError::SignatureRejected("User rejected".into()))
    );
    assert_eq!(service.list_flows().await.0.flows.len(), 1);

    let dismissed = success(service.dismiss_flow(flow_id_of(&started)).await.0);
    assert_eq!(dismissed.flow_id, started.flow_id);
    assert!(service.list_flows().await.0.flows.is_empty());
}

#[tokio::test]
async fn test_zero_amount_swap_is_invalid_without_wallet_access() {
    let (wallet, ledger, _engine, service) = service_with(FakeWallet::disconnected());

    let error = failure(
        service
            .swap_tokens(Parameters(SwapTokensRequest {
                token_in: "TBTC".to_string(),
                token_out: "TUSDC".to_string(),
                amount_in: "0".to_string(),
                min_amount_out: None,
                slippage_tolerance: None,
            }))
            .await
            .0,
    );

    assert!(matches!(error, ServiceError::InvalidRequest(_)), "{error:?}");
    assert_eq!(wallet.account_reads(), 0);
    assert_eq!(ledger.quote_calls(), 0);
    assert!(service.list_flows().await.0.flows.is_empty());
}

#[tokio::test]
async fn test_stalled_flow_reports_confirmation_timeout() {
    let (_wallet, ledger, engine, service) = service_with(FakeWallet::connected());
    ledger.script_confirmations([Confirmation::Timeout]);

    let started = success(
        service
            .faucet(Parameters(FaucetRequest {
                token: "TBTC".to_string(),
                amount: "1".to_string(),
            }))
            .await
            .0,
    );

    let handle = engine.get(started.flow_id.parse::<FlowId>().unwrap()).unwrap();
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.stalled))
        .await
        .expect("flow did not stall")
        .unwrap();

    let flow = success(service.get_flow(flow_id_of(&started)).await.0);
    assert!(flow.stalled);
    assert_eq!(flow.status, "running");
    assert!(matches!(flow.error, Some(ServiceError::ConfirmationTimeout(_))));
    assert!(matches!(
        flow.steps[0].error,
        Some(ServiceError::ConfirmationTimeout(_))
    ));

    let rechecked = success(service.recheck_flow(flow_id_of(&started)).await.0);
    assert!(!rechecked.stalled);
    assert_eq!(rechecked.error, None);

    let snapshot = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("flow did not finish");
    assert_eq!(snapshot.status, FlowStatus::Complete);
}

#[tokio::test]
async fn test_start_without_wallet_is_wallet_not_connected() {
    let (wallet, _ledger, _engine, service) = service_with(FakeWallet::disconnected());

    let error = failure(
        service
            .faucet(Parameters(FaucetRequest {
                token: "TBTC".to_string(),
                amount: "1".to_string(),
            }))
            .await
            .0,
    );
    assert_eq!(error, ServiceError::WalletNotConnected);
    assert!(wallet.signed().is_empty());
}

#[tokio::test]
async fn test_swap_tokens_rejects_bad_slippage() {
    let (_wallet, _ledger, _engine, service) = service_with(FakeWallet::connected());

    let error = failure(
        service
            .swap_tokens(Parameters(SwapTokensRequest {
                token_in: "TBTC".to_string(),
                token_out: "TUSDC".to_string(),
                amount_in: "1".to_string(),
                min_amount_out: None,
                slippage_tolerance: Some("half".to_string()),
            }))
            .await
            .0,
    );
    assert!(matches!(error, ServiceError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_cancel_flow_before_signature() {
    let (wallet, _ledger, engine, service) = service_with(FakeWallet::connected());
    wallet.script([Signature::Hold]);

    let started = success(
        service
            .faucet(Parameters(FaucetRequest {
                token: "TBTC".to_string(),
                amount: "1".to_string(),
            }))
            .await
            .0,
    );

    let cancelled = success(service.cancel_flow(flow_id_of(&started)).await.0);
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(finish(&engine, &started).await, FlowStatus::Cancelled);

    // Cancelling twice is a state error, not a silent success
    let error = failure(service.cancel_flow(flow_id_of(&started)).await.0);
    assert!(matches!(error, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn test_recheck_flow_requires_stalled_flow() {
    let (_wallet, _ledger, engine, service) = service_with(FakeWallet::connected());

    let started = success(
        service
            .faucet(Parameters(FaucetRequest {
                token: "TBTC".to_string(),
                amount: "1".to_string(),
            }))
            .await
            .0,
    );
    finish(&engine, &started).await;

    let error = failure(service.recheck_flow(flow_id_of(&started)).await.0);
    assert!(matches!(error, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn test_flow_tools_reject_unknown_ids() {
    let (_wallet, _ledger, _engine, service) = service_with(FakeWallet::connected());

    let malformed = Parameters(FlowIdRequest {
        flow_id: "not-a-flow".to_string(),
    });
    assert!(matches!(
        failure(service.get_flow(malformed).await.0),
        ServiceError::InvalidRequest(_)
    ));

    let unknown = Parameters(FlowIdRequest {
        flow_id: FlowId::new().to_string(),
    });
    assert!(matches!(
        failure(service.cancel_flow(unknown).await.0),
        ServiceError::InvalidRequest(_)
    ));
}

#[tokio::test]
async fn test_wallet_connection_tools() {
    let (wallet, _ledger, _engine, service) = service_with(FakeWallet::disconnected());

    let connected = success(service.connect_wallet().await.0);
    assert_eq!(connected.accounts.len(), 1);
    assert_eq!(wallet.accounts().len(), 1);

    let disconnected = service.disconnect_wallet().await.0;
    assert!(disconnected.accounts.is_empty());
    assert!(wallet.accounts().is_empty());
}

// Live tests against the regtest node; run with `--ignored`.

/// Helper function to load test configuration
async fn get_test_config() -> Config {
    Config::from_yaml("config/test.yaml")
        .await
        .expect("failed to load config/test.yaml")
}

/// Add delay between tests to avoid rate limiting
async fn avoid_rate_limit() {
    sleep(Duration::from_millis(500)).await;
}

#[tokio::test]
#[serial_test::serial]
#[ignore]
async fn test_quote_swap_against_regtest_should_work() {
    avoid_rate_limit().await;
    let config = get_test_config().await;
    let ctx = AppContext::initialize(&config).expect("failed to initialize context");
    let service = DexService::new(Arc::new(FlowEngine::new(ctx)));

    let result = service
        .quote_swap(Parameters(QuoteSwapRequest {
            token_in: "WBTC".to_string(),
            token_out: "TBTC".to_string(),
            amount_in: "0.001".to_string(),
            slippage_tolerance: Some("0.5".to_string()),
        }))
        .await
        .0;

    match result {
        ToolResult::Success(resp) => {
            println!("✅ Quote Response:");
            println!("   Estimated output: {} TBTC", resp.estimated_output);
            println!("   Minimum output: {} TBTC", resp.minimum_output);
            println!("   Exchange rate: {}", resp.exchange_rate);
            println!("   Price impact: {}%", resp.price_impact);
            assert!(!resp.estimated_output_raw.is_empty());
        }
        // An empty regtest pool is a valid answer too
        ToolResult::Error { error } => {
            println!("⚠️  Quote unavailable: {}", error);
            assert!(matches!(error, ServiceError::InvalidRequest(_)));
        }
    }
}

#[tokio::test]
#[serial_test::serial]
#[ignore]
async fn test_read_only_mode_refuses_flows() {
    avoid_rate_limit().await;
    let config = get_test_config().await;
    let ctx = AppContext::initialize(&config).expect("failed to initialize context");
    let service = DexService::new(Arc::new(FlowEngine::new(ctx)));

    let result = service
        .faucet(Parameters(FaucetRequest {
            token: "TBTC".to_string(),
            amount: "1".to_string(),
        }))
        .await
        .0;

    assert!(matches!(
        result,
        ToolResult::Error {
            error: ServiceError::WalletNotConnected
        }
    ));
}
