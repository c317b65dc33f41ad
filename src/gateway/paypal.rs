//! PayPal REST boundary adapter.
//!
//! Translates between the checkout core and the provider's payments API:
//! `create_session` maps to payment creation (returning the shopper approval
//! link), `capture` maps to payment execution with the payer token the
//! provider hands back on the return redirect.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{CaptureOutcome, GatewayError, PaymentGateway, PaymentSession};
use crate::config::GatewayConfig;
use crate::entities::{order, order_item};

const APPROVAL_LINK_REL: &str = "approval_url";
const DECLINE_ERROR_NAME: &str = "INSTRUMENT_DECLINED";
// Refresh slightly before the provider-reported expiry to avoid using a
// token that dies mid-request.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    #[serde(default)]
    related_resources: Vec<RelatedResource>,
}

#[derive(Debug, Deserialize)]
struct RelatedResource {
    #[serde(default)]
    sale: Option<Sale>,
}

#[derive(Debug, Deserialize)]
struct Sale {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct PayPalGateway {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    return_url: String,
    cancel_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, anyhow::Error> {
        let http = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            return_url: config.return_url.clone(),
            cancel_url: config.cancel_url.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("requesting fresh provider access token");
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Rejected(format!("malformed token response: {}", e)))?;

        let expires_at = Utc::now()
            + ChronoDuration::seconds((token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip(self, order, items), fields(order_id = %order.id))]
    async fn create_session(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<PaymentSession, GatewayError> {
        let token = self.access_token().await?;

        // The return URL carries our own correlation tokens so the reconciler
        // never has to key off provider-scoped references alone.
        let return_url = format!(
            "{}?orderId={}&userId={}",
            self.return_url, order.id, order.user_id
        );

        let body = json!({
            "intent": "sale",
            "payer": { "payment_method": "paypal" },
            "transactions": [{
                "amount": {
                    "total": order.total_amount.to_string(),
                    "currency": order.currency,
                },
                "item_list": {
                    "items": items.iter().map(|item| json!({
                        "name": item.product_id.to_string(),
                        "quantity": item.quantity.to_string(),
                        "price": item.unit_price.to_string(),
                        "currency": order.currency,
                    })).collect::<Vec<_>>(),
                },
                "invoice_number": order.id.to_string(),
            }],
            "redirect_urls": {
                "return_url": return_url,
                "cancel_url": self.cancel_url,
            },
        });

        let response = self
            .http
            .post(format!("{}/v1/payments/payment", self.base_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        let payment: PaymentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Rejected(format!("malformed payment response: {}", e)))?;

        let redirect_url = payment
            .links
            .iter()
            .find(|link| link.rel == APPROVAL_LINK_REL)
            .map(|link| link.href.clone())
            .ok_or_else(|| {
                GatewayError::Rejected("approval link missing from provider response".into())
            })?;

        Ok(PaymentSession {
            session_ref: payment.id,
            redirect_url,
        })
    }

    #[instrument(skip(self))]
    async fn capture(
        &self,
        session_ref: &str,
        payer_ref: &str,
    ) -> Result<CaptureOutcome, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .http
            .post(format!(
                "{}/v1/payments/payment/{}/execute",
                self.base_url, session_ref
            ))
            .bearer_auth(&token)
            .json(&json!({ "payer_id": payer_ref }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            // A declined instrument comes back as a client error; that is a
            // definitive answer, not a fault to retry.
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
                let error = response.json::<ProviderError>().await.unwrap_or(ProviderError {
                    name: None,
                    message: None,
                });
                if error.name.as_deref() == Some(DECLINE_ERROR_NAME) {
                    return Ok(CaptureOutcome {
                        success: false,
                        transaction_id: None,
                        decline_reason: Some(
                            error
                                .message
                                .unwrap_or_else(|| DECLINE_ERROR_NAME.to_string()),
                        ),
                    });
                }
                return Err(GatewayError::Rejected(provider_error_message(
                    status, error,
                )));
            }
            return Err(classify_status(status, None));
        }

        let payment: PaymentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Rejected(format!("malformed execute response: {}", e)))?;

        let success = payment.state.as_deref() == Some("approved");
        let transaction_id = payment
            .transactions
            .iter()
            .flat_map(|t| t.related_resources.iter())
            .find_map(|r| r.sale.as_ref().map(|sale| sale.id.clone()))
            .or_else(|| Some(payment.id.clone()));

        Ok(CaptureOutcome {
            success,
            transaction_id: if success { transaction_id } else { None },
            decline_reason: if success { None } else { payment.state },
        })
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

fn classify_status(status: StatusCode, detail: Option<String>) -> GatewayError {
    let message = detail.unwrap_or_else(|| format!("provider returned {}", status));
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::Unavailable(message)
    } else {
        GatewayError::Rejected(message)
    }
}

async fn classify_failure(response: Response) -> GatewayError {
    let status = response.status();
    let detail = response
        .json::<ProviderError>()
        .await
        .ok()
        .map(|error| provider_error_message(status, error));
    classify_status(status, detail)
}

fn provider_error_message(status: StatusCode, error: ProviderError) -> String {
    match (error.name, error.message) {
        (Some(name), Some(message)) => format!("{}: {}", name, message),
        (Some(name), None) => name,
        (None, Some(message)) => message,
        (None, None) => format!("provider returned {}", status),
    }
}
