//! AI Provider Gateway: registered connectors behind a shared rate-limit → boost → retry →
//! heal → telemetry → persist pipeline.

pub mod connector;
pub mod connectors;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::pantheon::dual_store::{ConversationRecord, DualStore};
use crate::pantheon::error::PantheonError;
use crate::pantheon::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::pantheon::resilience::breaker::defaults::OUTBOUND_PROVIDER;
use crate::pantheon::resilience::{BreakerSet, Magic, TokenBudgetConfig};
use crate::pantheon::telemetry::Telemetry;

pub use connector::{
    ConnectorBudget, ConnectorError, ConnectorMessage, ConnectorResponse, ConnectorRole,
    ConnectorUsage, ProviderConnector,
};

/// How many historical records are pulled from the store to give a connector conversational
/// context.
const HISTORY_CONTEXT_CAP: usize = 100;

/// Default wall-clock budget for rate-limit acquisition before surfacing `RateLimited`.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

/// Backoff delays between the three outbound call attempts (two gaps: 1s, then 2s).
const RETRY_DELAYS_SECS: [u64; 2] = [1, 2];
/// Exactly three attempts on transient errors, per the retry contract; a successful auto-heal
/// buys exactly one more attempt on top of this.
const MAX_ATTEMPTS: u32 = 3;

/// How token usage is debited when a connector under-reports.
#[derive(Debug, Clone, Copy)]
pub enum TokenAccounting {
    /// Trust whatever the connector reports (including zero, as `EchoConnector` always does).
    ProviderReported,
    /// When a connector reports zero total usage, estimate tokens from character count instead.
    CharacterEstimate { chars_per_token: f64 },
}

impl Default for TokenAccounting {
    fn default() -> Self {
        TokenAccounting::ProviderReported
    }
}

/// A registered connector plus its default token budget.
struct Registration {
    connector: Arc<dyn ProviderConnector>,
    default_budget: ConnectorBudget,
}

/// Snapshot of one registered provider, for `list`/`status`.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub default_max_tokens: u64,
}

/// Outcome of a single `send`, mirroring the Conversation record persisted to the store.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub record: ConversationRecord,
}

pub struct Gateway {
    providers: Mutex<HashMap<String, Registration>>,
    rate_limiter: RateLimiter,
    breakers: BreakerSet,
    magic: Magic,
    telemetry: Telemetry,
    store: DualStore,
    token_accounting: TokenAccounting,
    rate_limit_wait: Duration,
}

impl Gateway {
    pub fn new(store: DualStore) -> Self {
        Gateway {
            providers: Mutex::new(HashMap::new()),
            rate_limiter: RateLimiter::default(),
            breakers: BreakerSet::with_defaults(),
            magic: Magic::default(),
            telemetry: Telemetry::new(),
            store,
            token_accounting: TokenAccounting::default(),
            rate_limit_wait: DEFAULT_RATE_LIMIT_WAIT,
        }
    }

    pub fn with_token_accounting(mut self, accounting: TokenAccounting) -> Self {
        self.token_accounting = accounting;
        self
    }

    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    /// Access the underlying store, e.g. to query conversation history outside a `send` call.
    pub fn store(&self) -> &DualStore {
        &self.store
    }

    /// Access the magic state, e.g. to grant acorns or raise the shield from policy code.
    pub fn magic(&self) -> &Magic {
        &self.magic
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Register `connector` with its default per-call token budget, applying the configured
    /// rate-limit tiers if supplied.
    pub fn register(
        &self,
        connector: Arc<dyn ProviderConnector>,
        default_budget: ConnectorBudget,
        rate_limit: Option<RateLimitConfig>,
    ) {
        let name = connector.name().to_string();
        if let Some(config) = rate_limit {
            self.rate_limiter.configure(&name, config);
        }
        let mut providers = self.providers.lock().expect("gateway lock poisoned");
        providers.insert(name, Registration { connector, default_budget });
    }

    /// Descriptors for every registered provider.
    pub fn list(&self) -> Vec<ProviderDescriptor> {
        let providers = self.providers.lock().expect("gateway lock poisoned");
        providers
            .iter()
            .map(|(name, reg)| ProviderDescriptor {
                name: name.clone(),
                default_max_tokens: reg.default_budget.max_tokens,
            })
            .collect()
    }

    fn classify(err: &ConnectorError) -> &'static str {
        match err {
            ConnectorError::Transient(_) => "transient",
            ConnectorError::Permanent(_) => "permanent",
        }
    }

    /// Run the full send pipeline for `content` against `provider_name` within
    /// `conversation_id`, returning the persisted [`ConversationRecord`].
    pub async fn send(
        &self,
        content: &str,
        provider_name: &str,
        conversation_id: &str,
        sender: &str,
    ) -> Result<SendOutcome, PantheonError> {
        // 1. Admission.
        let default_budget = {
            let providers = self.providers.lock().expect("gateway lock poisoned");
            let reg = providers
                .get(provider_name)
                .ok_or_else(|| PantheonError::ProviderNotFound(provider_name.to_string()))?;
            reg.default_budget
        };

        // 2. Rate-limit acquire.
        if !self.rate_limiter.acquire(provider_name, self.rate_limit_wait).await {
            return Err(PantheonError::RateLimited { provider: provider_name.to_string() });
        }

        // 3. Shield check — advisory only.
        if self.magic.shield_raised() {
            log::info!("gateway: shield raised while calling {provider_name}, proceeding anyway");
        }

        // 4. Vitality boost.
        let (multiplier, budget, acorns_remaining) =
            self.magic.acorn_boost(provider_name, &TokenBudgetConfig { max_tokens: default_budget.max_tokens });
        if multiplier > 1.0 {
            log::debug!("gateway: boosted {provider_name} by {multiplier:.2}x, {acorns_remaining} acorns left");
        }
        let budget = ConnectorBudget { max_tokens: budget.max_tokens };

        let history = self.store.tail(conversation_id, HISTORY_CONTEXT_CAP).await?;
        let messages = Self::build_messages(&history, content);

        let start = Instant::now();
        let mut last_error: Option<ConnectorError> = None;
        let mut response: Option<ConnectorResponse> = None;

        // 5. Call with retry (exponential backoff, transient only).
        for attempt in 0..MAX_ATTEMPTS {
            let call_result = self
                .breakers
                .call(OUTBOUND_PROVIDER, || self.call_connector(provider_name, &messages, budget))
                .await;

            match call_result {
                Ok(resp) => {
                    response = Some(resp);
                    break;
                }
                Err(PantheonError::BreakerOpen { .. }) => {
                    last_error = Some(ConnectorError::Transient("breaker open".to_string()));
                    break;
                }
                Err(PantheonError::ProviderUnavailable { reason, .. }) => {
                    let transient_err = ConnectorError::Transient(reason);
                    let should_retry = attempt + 1 < MAX_ATTEMPTS;
                    last_error = Some(transient_err);
                    if should_retry {
                        tokio::time::sleep(Duration::from_secs(RETRY_DELAYS_SECS[attempt as usize])).await;
                    }
                }
                Err(PantheonError::ProviderMalformed { reason, .. }) => {
                    last_error = Some(ConnectorError::Permanent(reason));
                    break;
                }
                Err(other) => return Err(other),
            }
        }

        // 6. On exception, invoke auto-heal; a successful heal buys exactly one more attempt.
        if response.is_none() {
            if let Some(err) = &last_error {
                if err.is_transient() {
                    let error_class = Self::error_class(err);
                    if self.magic.auto_heal(&self.breakers, provider_name, error_class) {
                        match self
                            .breakers
                            .call(OUTBOUND_PROVIDER, || self.call_connector(provider_name, &messages, budget))
                            .await
                        {
                            Ok(resp) => response = Some(resp),
                            Err(e) => last_error = Some(Self::to_connector_error(e)),
                        }
                    }
                }
            }
        }

        let elapsed = start.elapsed();

        match response {
            Some(resp) => {
                self.telemetry.record(provider_name, elapsed, true, None);
                let record = self
                    .persist(conversation_id, content, sender, provider_name, &resp.content, elapsed, None)
                    .await?;
                let _ = self.debit_tokens(&resp, content);
                Ok(SendOutcome { record })
            }
            None => {
                let err = last_error.unwrap_or_else(|| ConnectorError::Transient("unknown failure".to_string()));
                self.telemetry.record(provider_name, elapsed, false, Some(Self::classify(&err)));
                let _ = self
                    .persist(conversation_id, content, sender, provider_name, "", elapsed, Some(err.to_string()))
                    .await;
                Err(match err {
                    ConnectorError::Transient(reason) => {
                        PantheonError::ProviderUnavailable { provider: provider_name.to_string(), reason }
                    }
                    ConnectorError::Permanent(reason) => {
                        PantheonError::ProviderMalformed { provider: provider_name.to_string(), reason }
                    }
                })
            }
        }
    }

    async fn call_connector(
        &self,
        provider_name: &str,
        messages: &[ConnectorMessage],
        budget: ConnectorBudget,
    ) -> Result<ConnectorResponse, PantheonError> {
        let connector = {
            let providers = self.providers.lock().expect("gateway lock poisoned");
            providers
                .get(provider_name)
                .map(|reg| reg.connector.clone())
                .ok_or_else(|| PantheonError::ProviderNotFound(provider_name.to_string()))?
        };

        connector.send(messages, budget).await.map_err(|err| match err {
            ConnectorError::Transient(reason) => {
                PantheonError::ProviderUnavailable { provider: provider_name.to_string(), reason }
            }
            ConnectorError::Permanent(reason) => {
                PantheonError::ProviderMalformed { provider: provider_name.to_string(), reason }
            }
        })
    }

    fn error_class(err: &ConnectorError) -> &'static str {
        match err {
            ConnectorError::Transient(_) => "transient",
            ConnectorError::Permanent(_) => "permanent",
        }
    }

    fn to_connector_error(err: PantheonError) -> ConnectorError {
        match err {
            PantheonError::ProviderUnavailable { reason, .. } => ConnectorError::Transient(reason),
            PantheonError::ProviderMalformed { reason, .. } => ConnectorError::Permanent(reason),
            other => ConnectorError::Transient(other.to_string()),
        }
    }

    fn build_messages(history: &[ConversationRecord], content: &str) -> Vec<ConnectorMessage> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 1);
        for record in history {
            messages.push(ConnectorMessage { role: ConnectorRole::User, content: record.content.clone() });
            if !record.response.is_empty() {
                messages.push(ConnectorMessage { role: ConnectorRole::Assistant, content: record.response.clone() });
            }
        }
        messages.push(ConnectorMessage { role: ConnectorRole::User, content: content.to_string() });
        messages
    }

    fn debit_tokens(&self, response: &ConnectorResponse, content: &str) -> u64 {
        match self.token_accounting {
            TokenAccounting::ProviderReported => response.usage.total(),
            TokenAccounting::CharacterEstimate { chars_per_token } => {
                if response.usage.total() > 0 {
                    response.usage.total()
                } else {
                    (content.chars().count() as f64 / chars_per_token).ceil() as u64
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        conversation_id: &str,
        content: &str,
        sender: &str,
        provider_name: &str,
        response: &str,
        elapsed: Duration,
        error: Option<String>,
    ) -> Result<ConversationRecord, PantheonError> {
        let record = ConversationRecord::new(
            conversation_id,
            content,
            sender,
            provider_name,
            response,
            elapsed.as_secs_f64(),
            error,
        );
        self.store.append(record.clone()).await?;
        Ok(record)
    }
}
