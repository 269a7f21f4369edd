//! Shared fixtures for integration tests.
#![allow(dead_code)]

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{address, keccak256, Address, TxKind, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use ed25519_dalek::{Signer, SigningKey};
use futures_util::future::BoxFuture;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use wireless_relay::blockchain::{
    BlockchainError, BlockchainResult, ChainRpc, FeeData, ReceiptSummary, RpcConnector,
};
use wireless_relay::config::{ChainConfig, RelayConfig};
use wireless_relay::crypto::kdf::derive_session_key;
use wireless_relay::crypto::{aead, EphemeralKeyPair, PeerPublicKey, RelayIdentity, SessionKey};
use wireless_relay::session::messages::{self, AuthChallenge, AuthResponse, KeyExchangeInit, KeyExchangeResponse};
use wireless_relay::session::SessionManager;
use wireless_relay::store::MemoryStore;
use wireless_relay::RelayContext;

pub const CHAIN_ID: u64 = 84532;
pub const KDF_ITERATIONS: u32 = 1_000;
pub const RECIPIENT: Address = address!("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

/// Scriptable chain. Broadcasts are "mined" immediately unless told otherwise.
pub struct MockChain {
    pub chain_id: u64,
    pub receipts: Mutex<HashMap<B256, ReceiptSummary>>,
    pub nonces: Mutex<HashMap<Address, u64>>,
    pub gas_price: u128,
    pub estimate: Option<u64>,
    pub mine: bool,
    pub sent: AtomicUsize,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            receipts: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            gas_price: 1_000_000_000,
            estimate: Some(50_000),
            mine: true,
            sent: AtomicUsize::new(0),
        }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.nonces.lock().unwrap().insert(address, nonce);
    }

    pub fn insert_receipt(&self, hash: B256) {
        self.receipts.lock().unwrap().insert(
            hash,
            ReceiptSummary {
                success: true,
                block_number: Some(99),
                gas_used: 21_000,
            },
        );
    }
}

impl ChainRpc for MockChain {
    fn send_raw_transaction<'a>(&'a self, raw: &'a [u8]) -> BoxFuture<'a, BlockchainResult<B256>> {
        Box::pin(async move {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let hash = keccak256(raw);
            if self.mine {
                self.receipts.lock().unwrap().insert(
                    hash,
                    ReceiptSummary {
                        success: true,
                        block_number: Some(100),
                        gas_used: 21_000,
                    },
                );
            }
            Ok(hash)
        })
    }

    fn get_transaction_receipt(&self, hash: B256) -> BoxFuture<'_, BlockchainResult<Option<ReceiptSummary>>> {
        Box::pin(async move { Ok(self.receipts.lock().unwrap().get(&hash).copied()) })
    }

    fn get_transaction_count(&self, address: Address) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(async move { Ok(self.nonces.lock().unwrap().get(&address).copied().unwrap_or(0)) })
    }

    fn get_fee_data(&self) -> BoxFuture<'_, BlockchainResult<FeeData>> {
        Box::pin(async move {
            Ok(FeeData {
                gas_price: self.gas_price,
                max_priority_fee_per_gas: None,
            })
        })
    }

    fn estimate_gas(&self, _request: TransactionRequest) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(async move {
            self.estimate
                .ok_or_else(|| BlockchainError::Rpc("execution reverted".to_string()))
        })
    }

    fn get_chain_id(&self) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(async move { Ok(self.chain_id) })
    }
}

/// Hands out one shared chain and counts how often it was asked to.
pub struct SharedConnector {
    pub chain: Arc<MockChain>,
    pub built: AtomicUsize,
}

impl SharedConnector {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            built: AtomicUsize::new(0),
        }
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl RpcConnector for SharedConnector {
    fn connect(&self, _chain: &ChainConfig) -> BlockchainResult<Arc<dyn ChainRpc>> {
        self.built.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        Ok(self.chain.clone())
    }
}

pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.session.kdf_iterations = KDF_ITERATIONS;
    config.relay.poll_interval_ms = 10;
    config.relay.confirmation_timeout_secs = 2;
    config.chains = vec![ChainConfig {
        chain_id: CHAIN_ID,
        name: "base-sepolia".to_string(),
        rpc_url: "http://127.0.0.1:8545".to_string(),
        failover_urls: Vec::new(),
        contract_address: None,
    }];
    config
}

pub fn build_context(config: RelayConfig, connector: Arc<SharedConnector>) -> RelayContext {
    RelayContext::build(
        config,
        RelayIdentity::generate(),
        connector,
        Arc::new(MemoryStore::new()),
    )
}

/// The device side of the handshake.
pub struct TestDevice {
    pub id: String,
    pub identity: SigningKey,
    ephemeral: Option<(EphemeralKeyPair, KeyExchangeInit)>,
    pub key: Option<SessionKey>,
}

impl TestDevice {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            identity: SigningKey::generate(&mut OsRng),
            ephemeral: None,
            key: None,
        }
    }

    /// Answer an init with a valid response and remember what is needed to
    /// derive the session key.
    pub fn respond(&mut self, init: &KeyExchangeInit) -> KeyExchangeResponse {
        let ephemeral = EphemeralKeyPair::generate();
        let relay_key = messages::decode("publicKey", &init.public_key).unwrap();
        let nonce = messages::decode("nonce", &init.nonce).unwrap();
        let device_key = ephemeral.public_key_bytes();
        let transcript = messages::response_transcript(&self.id, &nonce, &relay_key, &device_key);
        let response = KeyExchangeResponse {
            public_key: messages::encode(&device_key),
            signature: messages::encode(&ephemeral.sign(&transcript)),
        };
        self.ephemeral = Some((ephemeral, init.clone()));
        response
    }

    /// A response whose signature does not cover this device's transcript.
    pub fn respond_badly(&self, init: &KeyExchangeInit) -> KeyExchangeResponse {
        let ephemeral = EphemeralKeyPair::generate();
        KeyExchangeResponse {
            public_key: messages::encode(&ephemeral.public_key_bytes()),
            signature: messages::encode(&ephemeral.sign(init.nonce.as_bytes())),
        }
    }

    /// Derive the session key from the last answered init.
    pub fn derive_key(&mut self) {
        let (ephemeral, init) = self.ephemeral.take().expect("respond first");
        let relay_key = messages::decode("publicKey", &init.public_key).unwrap();
        let nonce = messages::decode("nonce", &init.nonce).unwrap();
        let peer = PeerPublicKey::from_sec1_bytes(&relay_key).unwrap();
        let shared = ephemeral.diffie_hellman(&peer);
        self.key = Some(derive_session_key(&shared, &self.id, &nonce, KDF_ITERATIONS));
    }

    pub fn answer_challenge(&self, challenge: &AuthChallenge) -> AuthResponse {
        self.answer_with(&self.identity, challenge)
    }

    pub fn answer_with(&self, identity: &SigningKey, challenge: &AuthChallenge) -> AuthResponse {
        let raw = messages::decode("challenge", &challenge.challenge).unwrap();
        let signature = identity.sign(&messages::auth_transcript(&self.id, &raw));
        AuthResponse {
            signature: messages::encode(&signature.to_bytes()),
            public_key: Some(messages::encode(identity.verifying_key().as_bytes())),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        aead::seal(self.key.as_ref().expect("no session key"), plaintext).unwrap()
    }

    pub fn open(&self, sealed: &[u8]) -> Vec<u8> {
        aead::open(self.key.as_ref().expect("no session key"), sealed).unwrap()
    }

    /// Run exchange and authentication directly against the manager.
    pub async fn authenticate(&mut self, sessions: &SessionManager) {
        let init = sessions.initiate(&self.id).await.unwrap();
        let response = self.respond(&init);
        sessions.complete_exchange(&self.id, &response).await.unwrap();
        self.derive_key();
        let challenge = sessions.issue_challenge(&self.id).await.unwrap();
        sessions
            .verify_auth_response(&self.id, &self.answer_challenge(&challenge))
            .await
            .unwrap();
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Sign a plain value transfer of `value` wei to [`RECIPIENT`].
pub fn signed_transfer(signer: &PrivateKeySigner, nonce: u64, value: U256) -> (String, B256) {
    let mut tx = TxEip1559 {
        chain_id: CHAIN_ID,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas: 2_000_000_000,
        max_priority_fee_per_gas: 1_000_000_000,
        to: TxKind::Call(RECIPIENT),
        value,
        ..Default::default()
    };
    let signature = signer.sign_transaction_sync(&mut tx).unwrap();
    let envelope = TxEnvelope::from(tx.into_signed(signature));
    (
        format!("0x{}", hex::encode(envelope.encoded_2718())),
        *envelope.tx_hash(),
    )
}

/// Intake payload for a 1.5 ETH transfer.
pub fn transaction_data(id: &str, signed: &str) -> Value {
    json!({
        "id": id,
        "to": RECIPIENT.to_string(),
        "amount": "1.5",
        "chainId": CHAIN_ID,
        "timestamp": now_ms(),
        "status": "pending",
        "signedTransaction": signed,
    })
}

pub fn one_and_a_half_eth() -> U256 {
    U256::from(1_500_000_000_000_000_000u128)
}
