//! Shared test infrastructure for engine integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use tokio::sync::Notify;

use hindsight_dns::agent::Agent;
use hindsight_dns::config::AgentConfig;
use hindsight_dns::error::AgentError;
use hindsight_dns::ingest::Observation;
use hindsight_dns::store::Seconds;
use hindsight_dns::update::{UpdateClient, UpdateOutcome};

/// How the mock zone master answers update transactions.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Answer immediately with the given response code.
    Respond(ResponseCode),
    /// Fail at the transport layer (no response at all).
    Fail(String),
    /// Block until released via [`MockUpdateClient::release`], then answer.
    GateThenRespond(ResponseCode),
}

struct MockState {
    behavior: Mutex<MockBehavior>,
    requests: Mutex<Vec<Message>>,
    gate: Notify,
}

/// An in-memory stand-in for the zone master. Records every transaction it
/// receives; clones share state so tests can inspect what the agent sent.
#[derive(Clone)]
pub struct MockUpdateClient {
    state: Arc<MockState>,
}

impl MockUpdateClient {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            state: Arc::new(MockState {
                behavior: Mutex::new(behavior),
                requests: Mutex::new(Vec::new()),
                gate: Notify::new(),
            }),
        }
    }

    pub fn noerror() -> Self {
        Self::new(MockBehavior::Respond(ResponseCode::NoError))
    }

    pub fn servfail() -> Self {
        Self::new(MockBehavior::Respond(ResponseCode::ServFail))
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(MockBehavior::Fail(reason.to_string()))
    }

    pub fn gated(rcode: ResponseCode) -> Self {
        Self::new(MockBehavior::GateThenRespond(rcode))
    }

    /// Release one gated transaction.
    pub fn release(&self) {
        self.state.gate.notify_one();
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    /// Transactions received so far.
    pub fn requests(&self) -> Vec<Message> {
        self.state.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateClient for MockUpdateClient {
    async fn send_update(&self, request: Message) -> Result<UpdateOutcome, AgentError> {
        let request_bytes = request.to_vec()?.len();
        let behavior = self.state.behavior.lock().unwrap().clone();
        self.state.requests.lock().unwrap().push(request);
        match behavior {
            MockBehavior::Respond(rcode) => Ok(UpdateOutcome {
                rcode,
                request_bytes,
                response_bytes: 24,
            }),
            MockBehavior::Fail(reason) => Err(AgentError::UpdateTransport(reason)),
            MockBehavior::GateThenRespond(rcode) => {
                self.state.gate.notified().await;
                Ok(UpdateOutcome {
                    rcode,
                    request_bytes,
                    response_bytes: 24,
                })
            }
        }
    }
}

/// A config suitable for driving the engine with a logical clock: the
/// batcher writes any non-empty batch at the first tick.
pub fn eager_config(cache_size: usize) -> AgentConfig {
    AgentConfig {
        zone_name: "rpz.example.com".to_string(),
        update_target: "127.0.0.1:53".parse().unwrap(),
        zone_file: None,
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        console_addr: None,
        cache_size,
        batch_update_size: 32,
        batch_update_frequency: 0,
        batch_threshold: 0.0,
        eviction_log_size: 10,
        refresh_log_size: 10,
        trending_alpha: 0.1,
        update_timeout: 5,
        ttl: 600,
        log_garbage: true,
    }
}

pub fn build_agent(config: AgentConfig, client: MockUpdateClient) -> Agent {
    Agent::with_update_client(config, Box::new(client)).expect("agent construction failed")
}

/// Build an observation; the chain is given in internal order, terminal
/// name last.
pub fn observation(address: &str, chain: &[&str]) -> Observation {
    Observation {
        address: address.parse().expect("bad test address"),
        chain: chain.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn observe(agent: &Agent, address: &str, chain: &[&str], now: Seconds) {
    agent
        .observe(observation(address, chain), now)
        .expect("observe failed");
}
