use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::OnceLock;

use crate::error::ValidationError;

/// Reference sent to the gateway with each STK push, `<prefix>-<order_id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReference(String);

impl AccountReference {
    pub fn new(prefix: &str, order_id: i32) -> Self {
        Self(format!("{}-{}", prefix, order_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Order id after the last `-`. The prefix itself may contain dashes.
    pub fn parse_order_id(reference: &str) -> Option<i32> {
        let (_, id) = reference.rsplit_once('-')?;
        id.parse::<i32>().ok().filter(|id| *id > 0)
    }
}

impl fmt::Display for AccountReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kenyan mobile number in `2547XXXXXXXX` / `2541XXXXXXXX` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

fn msisdn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^254[17]\d{8}$").expect("static regex is valid"))
}

impl PhoneNumber {
    pub fn normalize(raw: &str) -> Result<Self, ValidationError> {
        let compact: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .collect();
        let digits = compact.strip_prefix('+').unwrap_or(&compact);

        if digits.is_empty() {
            return Err(ValidationError::MissingField {
                field: "phone".to_string(),
            });
        }

        let international = if let Some(local) = digits.strip_prefix('0') {
            format!("254{}", local)
        } else if digits.starts_with("254") {
            digits.to_string()
        } else if digits.len() == 9 && (digits.starts_with('7') || digits.starts_with('1')) {
            format!("254{}", digits)
        } else {
            digits.to_string()
        };

        if !msisdn_pattern().is_match(&international) {
            return Err(ValidationError::InvalidPhoneNumber {
                reason: "expected a Kenyan mobile number such as 0712345678".to_string(),
            });
        }

        Ok(Self(international))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payment prompt submitted to the gateway
#[derive(Debug, Clone)]
pub struct StkPushRequest {
    /// Whole currency units
    pub amount: i64,
    pub phone: PhoneNumber,
    pub account_reference: AccountReference,
    pub callback_url: String,
    pub description: String,
}

/// Gateway acknowledgement of an STK push
#[derive(Debug, Clone, PartialEq)]
pub struct StkPushResponse {
    pub checkout_request_id: Option<String>,
    pub response_code: Option<String>,
    pub response_description: Option<String>,
    /// Body exactly as the gateway returned it
    pub raw: JsonValue,
}

impl StkPushResponse {
    pub fn from_raw(raw: JsonValue) -> Self {
        let field = |name: &str| raw.get(name).and_then(JsonValue::as_str).map(str::to_string);
        Self {
            checkout_request_id: field("CheckoutRequestID"),
            response_code: field("ResponseCode"),
            response_description: field("ResponseDescription"),
            raw,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.response_code.as_deref() == Some("0")
    }
}

/// `{"Body": {"stkCallback": {...}}}` as posted by the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<JsonValue>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }

    /// Metadata value by item name, rendered as text
    pub fn metadata_value(&self, name: &str) -> Option<String> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| match item.value.as_ref()? {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Null => None,
                other => Some(other.to_string()),
            })
    }

    pub fn receipt(&self) -> Option<String> {
        self.metadata_value("MpesaReceiptNumber")
            .filter(|receipt| !receipt.is_empty())
    }
}

/// Reply the gateway expects from the callback endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    /// Acknowledged but not understood
    pub fn malformed() -> Self {
        Self {
            result_code: 1,
            result_desc: "Accepted".to_string(),
        }
    }
}
