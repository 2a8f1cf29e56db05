//! Farmer payouts: dashboard reads, withdrawal requests and admin completion

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::payout_repository::{Payout, PayoutDecision, PendingPayout};
use crate::database::repository::PayoutStore;
use crate::error::{AccessError, AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::logging::mask_phone_number;
use crate::payments::types::PhoneNumber;
use crate::services::ledger::{
    earnings_summary, format_money, is_whole_cents, EarningsSummaryView, FeePolicy,
};

pub struct PayoutService {
    store: Arc<dyn PayoutStore>,
    fees: FeePolicy,
}

impl PayoutService {
    pub fn new(store: Arc<dyn PayoutStore>, fees: FeePolicy) -> Self {
        Self { store, fees }
    }

    pub async fn earnings_summary(&self, farmer_id: i32) -> AppResult<EarningsSummaryView> {
        let totals = self.store.ledger_totals(farmer_id).await?;
        Ok(earnings_summary(&totals, &self.fees).into())
    }

    /// File a withdrawal request against the farmer's available balance.
    ///
    /// The amount and phone are validated before anything is written. The
    /// balance check and the insert then run under one lock per farmer, so
    /// concurrent requests cannot both spend the same balance.
    pub async fn request_payout(
        &self,
        farmer_id: i32,
        amount: Decimal,
        phone_number: &str,
    ) -> AppResult<Payout> {
        if amount <= Decimal::ZERO {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "amount must be greater than zero".to_string(),
            }));
        }
        if !is_whole_cents(amount) {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "amount cannot have more than two decimal places".to_string(),
            }));
        }
        let phone = PhoneNumber::normalize(phone_number).map_err(AppError::validation)?;

        let decision = self
            .store
            .request_payout(farmer_id, amount, phone.as_str(), &self.fees)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    AppError::new(AppErrorKind::Access(AccessError::Unauthenticated))
                        .with_context(format!("farmer {} does not exist", farmer_id))
                } else {
                    AppError::from(e)
                }
            })?;

        match decision {
            PayoutDecision::Accepted(payout) => {
                info!(
                    farmer_id = farmer_id,
                    payout_id = payout.payout_id,
                    amount = %payout.amount,
                    phone = %mask_phone_number(phone.as_str()),
                    "payout requested"
                );
                Ok(payout)
            }
            PayoutDecision::Insufficient { available } => {
                let available = format_money(available);
                warn!(
                    farmer_id = farmer_id,
                    requested = %amount,
                    available = %available,
                    "payout refused: insufficient funds"
                );
                Err(AppError::new(AppErrorKind::Domain(
                    DomainError::InsufficientFunds { available },
                )))
            }
        }
    }

    pub async fn payout_history(&self, farmer_id: i32) -> AppResult<Vec<Payout>> {
        Ok(self.store.payout_history(farmer_id).await?)
    }

    pub async fn pending_payouts(&self) -> AppResult<Vec<PendingPayout>> {
        Ok(self.store.pending_payouts().await?)
    }

    pub async fn complete_payout(&self, payout_id: i32) -> AppResult<Payout> {
        let payout = self.store.complete_payout(payout_id).await?.ok_or_else(|| {
            AppError::new(AppErrorKind::Domain(DomainError::PayoutNotFound {
                payout_id: payout_id.to_string(),
            }))
        })?;

        info!(payout_id = payout_id, farmer_id = payout.farmer_id, "payout completed");
        Ok(payout)
    }
}
