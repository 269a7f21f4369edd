mod common;

use alloy::signers::local::PrivateKeySigner;
use serde_json::json;
use std::sync::Arc;

use common::{MockChain, SharedConnector, TestDevice, CHAIN_ID, RECIPIENT};
use wireless_relay::blockchain::{GasEstimateRequest, DEFAULT_GAS_LIMIT};
use wireless_relay::config::RelayConfig;
use wireless_relay::intake::Rejection;
use wireless_relay::RelayContext;

async fn authenticated(config: RelayConfig, chain: Arc<MockChain>, device_id: &str) -> RelayContext {
    let ctx = common::build_context(config, Arc::new(SharedConnector::new(chain)));
    TestDevice::new(device_id).authenticate(&ctx.sessions).await;
    ctx
}

#[tokio::test]
async fn test_unauthenticated_device_is_refused() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = common::build_context(common::test_config(), Arc::new(SharedConnector::new(chain.clone())));

    let signer = PrivateKeySigner::random();
    let (signed, _) = common::signed_transfer(&signer, 0, common::one_and_a_half_eth());
    let outcome = ctx.gate.submit("stranger", &common::transaction_data("tx-1", &signed)).await;

    assert_eq!(outcome.rejection(), Some(Rejection::RequiresAuth));
    let body = serde_json::to_value(&outcome).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["requiresAuth"], true);
    assert_eq!(chain.sent(), 0);
}

#[tokio::test]
async fn test_relays_valid_transaction() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = authenticated(common::test_config(), chain.clone(), "pos-1").await;

    let signer = PrivateKeySigner::random();
    let (signed, hash) = common::signed_transfer(&signer, 0, common::one_and_a_half_eth());
    let outcome = ctx.gate.submit("pos-1", &common::transaction_data("tx-1", &signed)).await;

    assert!(outcome.is_success(), "{:?}", outcome);
    let body = serde_json::to_value(&outcome).unwrap();
    assert_eq!(body["hash"], hash.to_string());
    assert_eq!(body["blockNumber"], 100);
    assert_eq!(body["gasUsed"], 21_000);
    assert_eq!(chain.sent(), 1);

    let saved = ctx.registry.cached_count();
    assert_eq!(saved, 1);
}

#[tokio::test]
async fn test_eleventh_transaction_in_a_minute_is_rate_limited() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = authenticated(common::test_config(), chain.clone(), "pos-2").await;

    // Rejected payloads still count against the window.
    for i in 0..10 {
        let outcome = ctx.gate.submit("pos-2", &json!({ "id": format!("tx-{}", i) })).await;
        assert_eq!(outcome.rejection(), Some(Rejection::InvalidFormat));
    }

    let signer = PrivateKeySigner::random();
    let (signed, _) = common::signed_transfer(&signer, 0, common::one_and_a_half_eth());
    let outcome = ctx.gate.submit("pos-2", &common::transaction_data("tx-10", &signed)).await;
    assert_eq!(outcome.rejection(), Some(Rejection::RateLimited));
    assert_eq!(serde_json::to_value(&outcome).unwrap()["rateLimited"], true);
    assert_eq!(chain.sent(), 0);
}

#[tokio::test]
async fn test_already_mined_transaction_is_not_rebroadcast() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = authenticated(common::test_config(), chain.clone(), "pos-3").await;

    let signer = PrivateKeySigner::random();
    let (signed, hash) = common::signed_transfer(&signer, 0, common::one_and_a_half_eth());
    chain.insert_receipt(hash);

    let outcome = ctx.gate.submit("pos-3", &common::transaction_data("tx-1", &signed)).await;
    assert_eq!(outcome.rejection(), Some(Rejection::ValidationFailed));
    assert!(outcome.error().unwrap().contains("already mined"));
    assert_eq!(outcome.hash(), Some(hash));
    assert_eq!(chain.sent(), 0);
}

#[tokio::test]
async fn test_stale_nonce_is_rejected() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = authenticated(common::test_config(), chain.clone(), "pos-4").await;

    let signer = PrivateKeySigner::random();
    chain.set_nonce(signer.address(), 5);
    let (signed, _) = common::signed_transfer(&signer, 3, common::one_and_a_half_eth());

    let outcome = ctx.gate.submit("pos-4", &common::transaction_data("tx-1", &signed)).await;
    assert_eq!(outcome.rejection(), Some(Rejection::ValidationFailed));
    assert!(outcome.error().unwrap().contains("Nonce too low"));
    assert_eq!(chain.sent(), 0);
}

#[tokio::test]
async fn test_declared_amount_must_match_signed_value() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = authenticated(common::test_config(), chain.clone(), "pos-5").await;

    let signer = PrivateKeySigner::random();
    let (signed, _) = common::signed_transfer(&signer, 0, alloy::primitives::U256::from(1u64));
    let outcome = ctx.gate.submit("pos-5", &common::transaction_data("tx-1", &signed)).await;

    assert_eq!(outcome.rejection(), Some(Rejection::ValidationFailed));
    assert_eq!(chain.sent(), 0);
}

#[tokio::test]
async fn test_metadata_device_must_be_sender() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = authenticated(common::test_config(), chain.clone(), "pos-6").await;

    let signer = PrivateKeySigner::random();
    let (signed, _) = common::signed_transfer(&signer, 0, common::one_and_a_half_eth());
    let mut data = common::transaction_data("tx-1", &signed);
    data["metadata"] = json!({ "deviceId": "someone-else" });

    let outcome = ctx.gate.submit("pos-6", &data).await;
    assert_eq!(outcome.rejection(), Some(Rejection::ValidationFailed));
    assert_eq!(chain.sent(), 0);
}

#[tokio::test]
async fn test_malformed_signed_transaction_is_invalid_format() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let ctx = authenticated(common::test_config(), chain.clone(), "pos-7").await;

    let outcome = ctx
        .gate
        .submit("pos-7", &common::transaction_data("tx-1", "0xdeadbeef"))
        .await;
    assert_eq!(outcome.rejection(), Some(Rejection::InvalidFormat));

    let mut data = common::transaction_data("tx-2", "0xdeadbeef");
    data.as_object_mut().unwrap().remove("chainId");
    let outcome = ctx.gate.submit("pos-7", &data).await;
    assert_eq!(outcome.rejection(), Some(Rejection::InvalidFormat));
    assert_eq!(outcome.error(), Some("Missing chainId"));
}

#[tokio::test]
async fn test_gas_estimate_falls_back_to_default() {
    let mut failing = MockChain::new(CHAIN_ID);
    failing.estimate = None;
    let ctx = common::build_context(common::test_config(), Arc::new(SharedConnector::new(Arc::new(failing))));

    let estimate = ctx
        .relay
        .estimate_gas(
            CHAIN_ID,
            GasEstimateRequest::Native {
                from: None,
                to: RECIPIENT,
                value: common::one_and_a_half_eth(),
            },
        )
        .await;
    assert_eq!(estimate.gas_limit, DEFAULT_GAS_LIMIT);
    assert_eq!(estimate.gas_limit, 21_000);
    assert!(estimate.error.is_some());

    let unsupported = ctx
        .relay
        .estimate_gas(
            1,
            GasEstimateRequest::Native {
                from: None,
                to: RECIPIENT,
                value: common::one_and_a_half_eth(),
            },
        )
        .await;
    assert_eq!(unsupported.gas_limit, DEFAULT_GAS_LIMIT);
}

#[tokio::test]
async fn test_concurrent_first_use_builds_one_client() {
    let chain = Arc::new(MockChain::new(CHAIN_ID));
    let connector = Arc::new(SharedConnector::new(chain));
    let ctx = Arc::new(common::build_context(common::test_config(), connector.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let ctx = ctx.clone();
            tokio::task::spawn_blocking(move || ctx.registry.get_provider(CHAIN_ID).is_ok())
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap());
    }

    assert_eq!(connector.built(), 1);
    assert_eq!(ctx.registry.cached_count(), 1);
}
