use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha512;
use tracing::warn;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::payment::PaymentMethod;
use crate::errors::ServiceError;
use crate::services::payments::{CallbackDetails, CallbackOutcome, PaymentStrategy, PaymentUrlRequest};

type HmacSha512 = Hmac<Sha512>;

const VNP_VERSION: &str = "2.1.0";
const VNP_COMMAND_PAY: &str = "pay";
const VNP_LOCALE: &str = "vn";
const VNP_CURRENCY: &str = "VND";
/// VNPay merchant category for "other goods"
const VNP_ORDER_TYPE: &str = "150000";
const RESPONSE_SUCCESS: &str = "00";

/// VNPay hosted-checkout integration.
///
/// The gateway contract: request parameters are sorted by name, URL-encoded
/// with spaces as `+`, joined as a query string, and signed with
/// HMAC-SHA512 over the merchant secret. Amounts travel in minor units
/// (VND x 100). Callbacks carry the same signature scheme back and are
/// rejected outright when it does not verify.
#[derive(Debug, Clone)]
pub struct VnpayStrategy {
    tmn_code: String,
    hash_secret: String,
    payment_url: String,
    return_url: String,
}

impl VnpayStrategy {
    pub fn new(tmn_code: &str, hash_secret: &str, payment_url: &str, return_url: &str) -> Self {
        Self {
            tmn_code: tmn_code.to_string(),
            hash_secret: hash_secret.to_string(),
            payment_url: payment_url.to_string(),
            return_url: return_url.to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.vnpay_tmn_code,
            &config.vnpay_hash_secret,
            &config.vnpay_payment_url,
            &config.vnpay_return_url(),
        )
    }

    fn build_params(&self, req: &PaymentUrlRequest, now: DateTime<Utc>) -> BTreeMap<String, String> {
        let amount_minor = req.amount * Decimal::from(100);
        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), VNP_VERSION.to_string());
        params.insert("vnp_Command".to_string(), VNP_COMMAND_PAY.to_string());
        params.insert("vnp_TmnCode".to_string(), self.tmn_code.clone());
        params.insert("vnp_Locale".to_string(), VNP_LOCALE.to_string());
        params.insert("vnp_CurrCode".to_string(), VNP_CURRENCY.to_string());
        params.insert("vnp_TxnRef".to_string(), req.order_id.to_string());
        params.insert(
            "vnp_OrderInfo".to_string(),
            format!("Thanh toan cho ma GD: {}", req.order_id),
        );
        params.insert("vnp_OrderType".to_string(), VNP_ORDER_TYPE.to_string());
        params.insert("vnp_Amount".to_string(), amount_minor.normalize().to_string());
        params.insert("vnp_ReturnUrl".to_string(), self.return_url.clone());
        params.insert("vnp_IpAddr".to_string(), req.client_ip.clone());
        params.insert(
            "vnp_CreateDate".to_string(),
            now.format("%Y%m%d%H%M%S").to_string(),
        );
        params
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let hash_data = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let mut mac = HmacSha512::new_from_slice(self.hash_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(hash_data.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Builds the signed redirect URL for a fixed timestamp.
    /// `create_payment_url` is the production entry point.
    pub fn payment_url_at(&self, req: &PaymentUrlRequest, now: DateTime<Utc>) -> String {
        let params = self.build_params(req, now);
        let signature = self.sign(&params);

        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        query.push_str("&vnp_SecureHash=");
        query.push_str(&signature);

        format!("{}?{}", self.payment_url, query)
    }

    fn verify_signature(&self, params: &HashMap<String, String>) -> bool {
        let Some(received) = params.get("vnp_SecureHash") else {
            return false;
        };

        let signable: BTreeMap<String, String> = params
            .iter()
            .filter(|(k, _)| k.as_str() != "vnp_SecureHash" && k.as_str() != "vnp_SecureHashType")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        constant_time_eq(self.sign(&signable).as_bytes(), received.as_bytes())
    }
}

impl PaymentStrategy for VnpayStrategy {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Vnpay
    }

    fn display_name(&self) -> &'static str {
        "VNPay"
    }

    fn create_payment_url(&self, req: &PaymentUrlRequest) -> Result<String, ServiceError> {
        Ok(self.payment_url_at(req, Utc::now()))
    }

    /// Classifies a gateway callback.
    ///
    /// An unverifiable signature short-circuits before any field is
    /// trusted. Only a verified callback with response code `00` counts
    /// as a completed payment.
    fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        if !self.verify_signature(params) {
            warn!("vnpay callback failed signature verification");
            return Ok(CallbackOutcome::SignatureMismatch);
        }

        let order_id = params
            .get("vnp_TxnRef")
            .ok_or_else(|| ServiceError::InvalidInput("vnp_TxnRef is missing".to_string()))
            .and_then(|raw| {
                Uuid::parse_str(raw).map_err(|_| {
                    ServiceError::InvalidInput(format!("'{}' is not a valid order reference", raw))
                })
            })?;

        let response_code = params
            .get("vnp_ResponseCode")
            .cloned()
            .unwrap_or_else(|| "99".to_string());
        let transaction_ok = params
            .get("vnp_TransactionStatus")
            .map(|s| s == RESPONSE_SUCCESS)
            .unwrap_or(true);

        if response_code != RESPONSE_SUCCESS || !transaction_ok {
            return Ok(CallbackOutcome::Declined {
                order_id,
                response_code,
            });
        }

        let amount_minor: Decimal = params
            .get("vnp_Amount")
            .ok_or_else(|| ServiceError::InvalidInput("vnp_Amount is missing".to_string()))
            .and_then(|raw| {
                raw.parse().map_err(|_| {
                    ServiceError::InvalidInput(format!("'{}' is not a valid amount", raw))
                })
            })?;

        Ok(CallbackOutcome::Completed(CallbackDetails {
            order_id,
            amount: amount_minor / Decimal::from(100),
            transaction_id: params
                .get("vnp_TransactionNo")
                .cloned()
                .unwrap_or_default(),
            order_info: params.get("vnp_OrderInfo").cloned(),
            bank_code: params.get("vnp_BankCode").cloned(),
            card_type: params.get("vnp_CardType").cloned(),
            response_code,
            pay_date: params.get("vnp_PayDate").cloned(),
            raw: params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }))
    }
}

/// Percent-encodes per the gateway's convention: spaces become `+`
fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
