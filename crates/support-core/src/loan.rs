/// Fixed-rate loan payment calculation.
///
/// Amounts are rounded to kopecks with `f64::round`, i.e. half away from zero.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::LoanError;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, JsonSchema)]
pub struct LoanRequest {
    /// Loan amount in rubles.
    pub amount: f64,
    /// Annual interest rate in percent (15 means 15%).
    pub rate: f64,
    /// Loan term in months.
    pub months: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoanResult {
    pub monthly_payment: f64,
    pub total_payment: f64,
    pub overpayment: f64,
}

impl LoanRequest {
    pub fn calculate(&self) -> Result<LoanResult, LoanError> {
        calculate_loan(self.amount, self.rate, self.months)
    }
}

pub fn calculate_loan(amount: f64, rate: f64, months: i64) -> Result<LoanResult, LoanError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LoanError::InvalidAmount(amount));
    }
    if !rate.is_finite() || rate < 0.0 {
        return Err(LoanError::InvalidRate(rate));
    }
    if months <= 0 {
        return Err(LoanError::InvalidMonths(months));
    }
    let periods = i32::try_from(months).map_err(|_| LoanError::TermTooLong(months))?;

    let monthly_rate = rate / 12.0 / 100.0;
    // growth - 1 via exp_m1/ln_1p keeps its digits when the monthly rate is tiny.
    let growth_minus_one = (f64::from(periods) * monthly_rate.ln_1p()).exp_m1();
    let payment = if growth_minus_one == 0.0 {
        amount / months as f64
    } else {
        amount * monthly_rate * (growth_minus_one + 1.0) / growth_minus_one
    };
    if !payment.is_finite() {
        return Err(LoanError::Overflow {
            amount,
            rate,
            months,
        });
    }

    let total_payment = round2(payment * months as f64);
    Ok(LoanResult {
        monthly_payment: round2(payment),
        total_payment,
        overpayment: round2(total_payment - amount),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
