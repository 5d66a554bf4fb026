//! Service layer for the external payment gateway.
//!
//! Key pieces:
//! 1.  **CircuitBreaker**: stops hammering the gateway while it is down;
//!     requests are blocked in the Open state and a single probe is let
//!     through after the timeout (HalfOpen).
//! 2.  **PaymentGatewayClient**: checkout-session client. Creates a session
//!     for a booking amount and polls session status by id; the gateway's
//!     answer is the sole source of truth for "paid". Every network call
//!     goes through the circuit breaker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};

/// Circuit breaker states.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,
    /// Blocking requests after repeated failures.
    Open,
    /// One probe request allowed to check whether the gateway recovered.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: std::sync::RwLock<CircuitState>,
    /// Consecutive failure counter.
    failure_count: AtomicU32,
    /// Unix seconds of the last failure.
    last_failure_time: AtomicU64,
    failure_threshold: u32,
    timeout_duration: Duration,
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: std::sync::RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_time: AtomicU64::new(0),
            failure_threshold,
            timeout_duration: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn can_execute(&self) -> bool {
        let state = self.state.read().unwrap();

        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = epoch_seconds();
                let last_failure = self.last_failure_time.load(Ordering::Relaxed);

                if now.saturating_sub(last_failure) >= self.timeout_duration.as_secs() {
                    drop(state); // release the read lock before writing
                    *self.state.write().unwrap() = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();

        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                info!("Circuit breaker recovered - transitioning to Closed state");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_time.store(epoch_seconds(), Ordering::Relaxed);

        let mut state = self.state.write().unwrap();

        match *state {
            CircuitState::Closed => {
                if failure_count >= self.failure_threshold {
                    *state = CircuitState::Open;
                    error!(
                        "Circuit breaker OPENED - {} failures reached threshold {}",
                        failure_count, self.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn get_state(&self) -> CircuitState {
        self.state.read().unwrap().clone()
    }
}

/// Errors surfaced by gateway calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The circuit breaker is open and blocked the request.
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,
    /// The HTTP request itself failed.
    #[error("payment gateway error: {0}")]
    Request(#[from] reqwest::Error),
    /// The gateway answered but refused the operation.
    #[error("payment gateway declined: {0}")]
    Declined(String),
}

// --- Gateway API data models ---

#[derive(Debug, Serialize)]
struct SessionCreateRequest {
    #[serde(rename = "merchantId")]
    merchant_id: String,
    token: String,
    amount: i64,
    currency: String,
    #[serde(rename = "orderId")]
    order_id: String,
    description: String,
    #[serde(rename = "successURL")]
    success_url: String,
    #[serde(rename = "cancelURL")]
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionCreateResponse {
    success: bool,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "paymentURL")]
    payment_url: Option<String>,
    #[serde(rename = "expiresAt")]
    expires_at: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionStatusRequest {
    #[serde(rename = "merchantId")]
    merchant_id: String,
    token: String,
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionStatusResponse {
    success: bool,
    /// NEW | PAID | CANCELLED | EXPIRED
    status: Option<String>,
    #[serde(rename = "paymentRef")]
    payment_ref: Option<String>,
    message: Option<String>,
}

/// A checkout session the customer is redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub payment_url: String,
    pub expires_at: Option<String>,
}

/// Result of a status poll.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub paid: bool,
    pub payment_ref: Option<String>,
}

/// Client for the payment gateway API.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    merchant_id: String,
    password: String,
    base_url: String,
    currency: String,
    success_url: String,
    cancel_url: String,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl PaymentGatewayClient {
    pub fn from_config(payment: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Self {
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            breaker.failure_threshold,
            breaker.timeout_seconds,
        ));

        Self {
            merchant_id: payment.merchant_id.clone(),
            password: payment.merchant_password.clone(),
            base_url: payment.gateway_url.trim_end_matches('/').to_string(),
            currency: payment.currency.clone(),
            success_url: payment.success_url.clone(),
            cancel_url: payment.cancel_url.clone(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            circuit_breaker,
        }
    }

    /// Runs one gateway operation through the circuit breaker.
    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(GatewayError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                error!("Payment gateway request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                Err(GatewayError::Request(e))
            }
        }
    }

    /// Request token for session creation.
    fn session_token(&self, amount: i64, order_id: &str) -> String {
        let token_string = format!(
            "{}{}{}{}{}",
            amount, self.currency, order_id, self.password, self.merchant_id
        );
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Request token for a status poll.
    fn status_token(&self, session_id: &str) -> String {
        let token_string = format!("{}{}{}", session_id, self.password, self.merchant_id);
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Creates a checkout session scoped to the given amount (minor units).
    pub async fn create_session(
        &self,
        amount: i64,
        order_id: &str,
        description: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let request = SessionCreateRequest {
            merchant_id: self.merchant_id.clone(),
            token: self.session_token(amount, order_id),
            amount,
            currency: self.currency.clone(),
            order_id: order_id.to_string(),
            description: description.to_string(),
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
        };

        info!(
            "Creating checkout session: order_id={}, amount={} {}",
            order_id, amount, self.currency
        );

        let operation = async {
            self.http_client
                .post(format!("{}/api/v1/sessions", self.base_url))
                .json(&request)
                .send()
                .await?
                .json::<SessionCreateResponse>()
                .await
        };

        let response = self.execute_with_circuit_breaker(operation).await?;

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "unknown gateway error".to_string());
            return Err(GatewayError::Declined(message));
        }

        match (response.session_id, response.payment_url) {
            (Some(session_id), Some(payment_url)) => Ok(CheckoutSession {
                session_id,
                payment_url,
                expires_at: response.expires_at,
            }),
            _ => Err(GatewayError::Declined(
                "gateway response missing session id or payment URL".to_string(),
            )),
        }
    }

    /// Polls the session status. Idempotent; safe to call on every page
    /// refresh of the success URL.
    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatus, GatewayError> {
        let request = SessionStatusRequest {
            merchant_id: self.merchant_id.clone(),
            token: self.status_token(session_id),
            session_id: session_id.to_string(),
        };

        info!("Checking checkout session status: session_id={}", session_id);

        let operation = async {
            self.http_client
                .post(format!("{}/api/v1/sessions/status", self.base_url))
                .json(&request)
                .send()
                .await?
                .json::<SessionStatusResponse>()
                .await
        };

        let response = self.execute_with_circuit_breaker(operation).await?;

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "unknown gateway error".to_string());
            return Err(GatewayError::Declined(message));
        }

        let paid = response.status.as_deref() == Some("PAID");
        Ok(SessionStatus {
            paid,
            payment_ref: response.payment_ref,
        })
    }

    /// Breaker state and failure count, for monitoring.
    pub fn circuit_breaker_status(&self) -> (CircuitState, u32) {
        (
            self.circuit_breaker.get_state(),
            self.circuit_breaker.failure_count.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, PaymentConfig};

    fn test_client(gateway_url: &str) -> PaymentGatewayClient {
        PaymentGatewayClient::from_config(
            &PaymentConfig {
                merchant_id: "cinebooker-test".to_string(),
                merchant_password: "secret".to_string(),
                gateway_url: gateway_url.to_string(),
                success_url: "http://localhost/success".to_string(),
                cancel_url: "http://localhost/cancel".to_string(),
                currency: "EGP".to_string(),
            },
            &CircuitBreakerConfig {
                failure_threshold: 3,
                timeout_seconds: 60,
            },
        )
    }

    #[test]
    fn breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, 60);
        assert_eq!(breaker.get_state(), CircuitState::Closed);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn breaker_probes_after_timeout_and_recovers() {
        // zero timeout: the next can_execute is already a probe
        let breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);

        assert!(breaker.can_execute());
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[test]
    fn breaker_reopens_on_failed_probe() {
        let breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert!(breaker.can_execute()); // half-open probe
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, 60);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[test]
    fn tokens_are_deterministic_and_distinct() {
        let client = test_client("http://localhost:0");
        let a = client.session_token(5000, "booking-1-100");
        let b = client.session_token(5000, "booking-1-100");
        let c = client.session_token(5000, "booking-2-100");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64); // sha256 hex
    }
}
