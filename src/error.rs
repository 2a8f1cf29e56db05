//! Unified error handling for the FarmConnect backend
//!
//! Every handler returns `AppError`, which carries the HTTP status, a stable
//! machine-readable code, a user-facing message and a retry hint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by API clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PRODUCE_NOT_FOUND")]
    ProduceNotFound,
    #[serde(rename = "PAYOUT_NOT_FOUND")]
    PayoutNotFound,
    #[serde(rename = "REFUND_NOT_FOUND")]
    RefundNotFound,
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "DUPLICATE_REFUND_REQUEST")]
    DuplicateRefundRequest,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "INVALID_PHONE_NUMBER")]
    InvalidPhoneNumber,

    // Access errors
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "PAYMENT_INITIATION_FAILED")]
    PaymentInitiationFailed,
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,

    // Generic
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Missing order, or an order the caller does not own. The two are
    /// deliberately indistinguishable.
    OrderNotFound { order_id: String },
    ProduceNotFound { produce_id: String },
    /// No pending payout with this id
    PayoutNotFound { payout_id: String },
    /// No pending refund request with this id
    RefundNotFound { request_id: String },
    /// The buyer has no paid or delivered order with this id
    NoRefundableOrder { order_id: String },
    /// Requested payout exceeds the withdrawable balance
    InsufficientFunds { available: String },
    InvalidStatusTransition { from: String, to: String },
    DuplicateRefundRequest { order_id: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Payment gateway errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Token or STK push failure. The cause is logged, never shown to the caller.
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Caller identity and role errors
#[derive(Debug, Clone)]
pub enum AccessError {
    Unauthenticated,
    Forbidden { required_role: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    InvalidPhoneNumber { reason: String },
    InvalidStatus { status: String },
    MissingField { field: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Access(AccessError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn order_not_found(order_id: impl ToString) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::OrderNotFound {
            order_id: order_id.to_string(),
        }))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::ProduceNotFound { .. } => 404,
                DomainError::PayoutNotFound { .. } => 404,
                DomainError::RefundNotFound { .. } => 404,
                DomainError::NoRefundableOrder { .. } => 404,
                DomainError::InsufficientFunds { .. } => 400,
                DomainError::InvalidStatusTransition { .. } => 409, // Conflict
                DomainError::DuplicateRefundRequest { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::Timeout { .. } => 504,         // Gateway Timeout
            },
            AppErrorKind::Access(err) => match err {
                AccessError::Unauthenticated => 401,
                AccessError::Forbidden { .. } => 403,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::ProduceNotFound { .. } => ErrorCode::ProduceNotFound,
                DomainError::PayoutNotFound { .. } => ErrorCode::PayoutNotFound,
                DomainError::RefundNotFound { .. } => ErrorCode::RefundNotFound,
                DomainError::NoRefundableOrder { .. } => ErrorCode::OrderNotFound,
                DomainError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::DuplicateRefundRequest { .. } => ErrorCode::DuplicateRefundRequest,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentInitiationFailed,
                ExternalError::Timeout { .. } => ErrorCode::GatewayTimeout,
            },
            AppErrorKind::Access(err) => match err {
                AccessError::Unauthenticated => ErrorCode::Unauthorized,
                AccessError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                ValidationError::InvalidPhoneNumber { .. } => ErrorCode::InvalidPhoneNumber,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => "Order not found".to_string(),
                DomainError::ProduceNotFound { .. } => "Produce not found".to_string(),
                DomainError::PayoutNotFound { .. } => "Pending payout not found".to_string(),
                DomainError::RefundNotFound { .. } => {
                    "Pending refund request not found".to_string()
                }
                DomainError::NoRefundableOrder { .. } => {
                    "A valid, paid-for order was not found.".to_string()
                }
                DomainError::InsufficientFunds { available } => {
                    format!("Insufficient funds. Your available balance is {}", available)
                }
                DomainError::InvalidStatusTransition { from, to } => {
                    format!("Cannot change order status from '{}' to '{}'", from, to)
                }
                DomainError::DuplicateRefundRequest { .. } => {
                    "A refund request for this order already exists.".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => "Payment initiation failed".to_string(),
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Access(err) => match err {
                AccessError::Unauthenticated => "Not authorized, no identity provided".to_string(),
                AccessError::Forbidden { required_role } => {
                    format!("Not authorized, {} access required", required_role)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidPhoneNumber { reason } => {
                    format!("Invalid phone number: {}", reason)
                }
                ValidationError::InvalidStatus { status } => {
                    format!("Invalid status '{}'", status)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Access(_) => false,
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
