//! # Receipt Compositor
//!
//! Pure `(SaleRecord, BusinessProfile) → Receipt`. Always produces a
//! document: missing optional data just drops the corresponding section.
//!
//! ## Layout (40 columns)
//! ```text
//! ┌────────────────────────────────────────┐
//! │               SOKO MART                │  header (centered)
//! │            Moi Avenue, Nbi             │
//! │ Receipt: 260314-092653-1234            │
//! │ Date:    2026-03-14 09:26              │
//! │----------------------------------------│
//! │ Soda 500ml                             │  one block per line
//! │   2 x 50.00                     100.00 │
//! │----------------------------------------│
//! │ Subtotal                        100.00 │
//! │ TOTAL                     KES   116.00 │
//! │ Mobile Money                    116.00 │  payment section
//! │ Points earned                        1 │  loyalty (optional)
//! └────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{PaymentMethod, SaleRecord, TaxRate};

/// Default thermal printer width.
pub const DEFAULT_RECEIPT_WIDTH: usize = 40;

/// Business details printed on every receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    /// Tax registration number, printed when present.
    pub tax_pin: Option<String>,
    pub currency: String,
    pub tax_rate: TaxRate,
    pub footer: Option<String>,
}

impl Default for BusinessProfile {
    fn default() -> Self {
        BusinessProfile {
            name: "Soko POS".to_string(),
            address: None,
            phone: None,
            tax_pin: None,
            currency: "KES".to_string(),
            tax_rate: TaxRate::from_bps(1600),
            footer: Some("Thank you for shopping with us!".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Payment section of the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptPayment {
    pub method: PaymentMethod,
    pub amount: Money,
    pub tendered: Option<Money>,
    pub change: Option<Money>,
    /// Gateway receipt reference (mobile money).
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLoyalty {
    pub customer_phone: Option<String>,
    pub points_earned: i64,
    pub points_redeemed: i64,
}

/// A composed receipt, ready to print or serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub business: BusinessProfile,
    pub receipt_number: String,
    pub issued_at: DateTime<Utc>,
    pub lines: Vec<ReceiptLine>,
    pub subtotal: Money,
    pub loyalty_discount: Money,
    pub tax: Money,
    pub total: Money,
    pub payment: ReceiptPayment,
    pub loyalty: Option<ReceiptLoyalty>,
}

/// Composes the receipt for a settled sale.
pub fn compose_receipt(sale: &SaleRecord, profile: &BusinessProfile) -> Receipt {
    let lines = sale
        .lines
        .iter()
        .map(|l| ReceiptLine {
            name: l.name.clone(),
            quantity: l.quantity,
            unit_price: l.unit_price(),
            line_total: l.line_total(),
        })
        .collect();

    let loyalty = sale.loyalty_account_id.as_ref().map(|_| ReceiptLoyalty {
        customer_phone: sale.customer_phone.as_deref().map(mask_phone),
        points_earned: sale.points_earned,
        points_redeemed: sale.points_redeemed,
    });

    Receipt {
        business: profile.clone(),
        receipt_number: sale.receipt_number.clone(),
        issued_at: sale.created_at,
        lines,
        subtotal: Money::from_cents(sale.subtotal_cents),
        loyalty_discount: Money::from_cents(sale.loyalty_discount_cents),
        tax: Money::from_cents(sale.tax_cents),
        total: sale.total(),
        payment: ReceiptPayment {
            method: sale.payment_method,
            amount: sale
                .settled_amount_cents
                .map(Money::from_cents)
                .unwrap_or_else(|| sale.total()),
            tendered: sale.amount_tendered_cents.map(Money::from_cents),
            change: sale.change_cents.map(Money::from_cents),
            reference: sale.external_receipt_ref.clone(),
        },
        loyalty,
    }
}

/// Keeps the last three digits: `254712345678` → `*********678`.
fn mask_phone(phone: &str) -> String {
    let keep = phone.len().saturating_sub(3);
    phone
        .chars()
        .enumerate()
        .map(|(i, c)| if i < keep { '*' } else { c })
        .collect()
}

impl Receipt {
    /// Renders fixed-width text for a thermal printer.
    pub fn render_text(&self, width: usize) -> String {
        let width = width.max(24);
        let rule = "-".repeat(width);
        let mut out = Vec::new();

        out.push(center(&self.business.name.to_uppercase(), width));
        for extra in [&self.business.address, &self.business.phone]
            .into_iter()
            .flatten()
        {
            out.push(center(extra, width));
        }
        if let Some(pin) = &self.business.tax_pin {
            out.push(center(&format!("PIN: {}", pin), width));
        }

        out.push(format!("Receipt: {}", self.receipt_number));
        out.push(format!("Date:    {}", self.issued_at.format("%Y-%m-%d %H:%M")));
        out.push(rule.clone());

        for line in &self.lines {
            out.push(truncate(&line.name, width));
            out.push(columns(
                &format!("  {} x {}", line.quantity, line.unit_price),
                &line.line_total.to_string(),
                width,
            ));
        }
        out.push(rule.clone());

        out.push(columns("Subtotal", &self.subtotal.to_string(), width));
        if self.loyalty_discount.is_positive() {
            out.push(columns(
                "Points discount",
                &format!("-{}", self.loyalty_discount),
                width,
            ));
        }
        if self.tax.is_positive() {
            let label = format!("VAT {}%", self.business.tax_rate.percentage());
            out.push(columns(&label, &self.tax.to_string(), width));
        }
        out.push(columns(
            "TOTAL",
            &format!("{} {}", self.business.currency, self.total),
            width,
        ));
        out.push(rule.clone());

        out.push(columns(
            self.payment.method.label(),
            &self.payment.amount.to_string(),
            width,
        ));
        if let Some(tendered) = self.payment.tendered {
            out.push(columns("Cash received", &tendered.to_string(), width));
        }
        if let Some(change) = self.payment.change {
            out.push(columns("Change", &change.to_string(), width));
        }
        if let Some(reference) = &self.payment.reference {
            out.push(columns("Ref", reference, width));
        }

        if let Some(loyalty) = &self.loyalty {
            out.push(rule.clone());
            if let Some(phone) = &loyalty.customer_phone {
                out.push(columns("Customer", phone, width));
            }
            if loyalty.points_redeemed > 0 {
                out.push(columns(
                    "Points redeemed",
                    &loyalty.points_redeemed.to_string(),
                    width,
                ));
            }
            out.push(columns(
                "Points earned",
                &loyalty.points_earned.to_string(),
                width,
            ));
        }

        if let Some(footer) = &self.business.footer {
            out.push(rule);
            out.push(center(footer, width));
        }

        let mut text = out.join("\n");
        text.push('\n');
        text
    }
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

fn center(text: &str, width: usize) -> String {
    let text = truncate(text, width);
    let pad = (width - text.chars().count()) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

/// Left label, right-aligned value. The label is cut if both do not fit.
fn columns(left: &str, right: &str, width: usize) -> String {
    let right_len = right.chars().count();
    let room = width.saturating_sub(right_len + 1);
    let left = truncate(left, room);
    let gap = width.saturating_sub(left.chars().count() + right_len).max(1);
    format!("{}{}{}", left, " ".repeat(gap), right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SaleLine;
    use chrono::TimeZone;

    fn sale(method: PaymentMethod) -> SaleRecord {
        SaleRecord {
            id: "sale-1".into(),
            payment_attempt_id: "att-1".into(),
            receipt_number: "260314-092653-0042".into(),
            lines: vec![SaleLine {
                product_id: "p1".into(),
                sku: "SODA-500".into(),
                name: "Soda 500ml".into(),
                unit_price_cents: 50_000,
                quantity: 2,
                line_total_cents: 100_000,
            }],
            subtotal_cents: 100_000,
            loyalty_discount_cents: 20_000,
            tax_cents: 12_800,
            total_cents: 92_800,
            payment_method: method,
            amount_tendered_cents: None,
            change_cents: None,
            settled_amount_cents: Some(92_800),
            amount_mismatch: false,
            customer_phone: Some("254712345678".into()),
            loyalty_account_id: Some("acc-1".into()),
            points_earned: 8,
            points_redeemed: 200,
            external_receipt_ref: Some("QGH7XK2L".into()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[test]
    fn test_compose_mobile_money_receipt() {
        let receipt = compose_receipt(&sale(PaymentMethod::MobileMoney), &BusinessProfile::default());

        assert_eq!(receipt.total, Money::from_major(928));
        assert_eq!(receipt.payment.reference.as_deref(), Some("QGH7XK2L"));
        let loyalty = receipt.loyalty.unwrap();
        assert_eq!(loyalty.points_earned, 8);
        assert_eq!(loyalty.customer_phone.as_deref(), Some("*********678"));
    }

    #[test]
    fn test_compose_with_partial_data() {
        let mut record = sale(PaymentMethod::Cash);
        record.loyalty_account_id = None;
        record.customer_phone = None;
        record.external_receipt_ref = None;
        record.settled_amount_cents = None;
        record.amount_tendered_cents = Some(100_000);
        record.change_cents = Some(7_200);

        let receipt = compose_receipt(&record, &BusinessProfile::default());

        assert!(receipt.loyalty.is_none());
        assert_eq!(receipt.payment.amount, Money::from_major(928));
        assert_eq!(receipt.payment.change, Some(Money::from_major(72)));
    }

    #[test]
    fn test_render_text_fits_width() {
        let profile = BusinessProfile {
            name: "Soko Mart".into(),
            address: Some("Moi Avenue, Nairobi".into()),
            ..Default::default()
        };
        let text = compose_receipt(&sale(PaymentMethod::MobileMoney), &profile)
            .render_text(DEFAULT_RECEIPT_WIDTH);

        assert!(text.lines().all(|l| l.chars().count() <= DEFAULT_RECEIPT_WIDTH));
        assert!(text.contains("SOKO MART"));
        assert!(text.contains("Receipt: 260314-092653-0042"));
        assert!(text.contains("Points discount"));
        assert!(text.contains("VAT 16%"));
        assert!(text.contains("KES 928.00"));
        assert!(text.contains("Mobile Money"));
        assert!(text.contains("Points earned"));
    }

    #[test]
    fn test_columns_right_aligns() {
        let row = columns("Subtotal", "1,000.00", 20);
        assert_eq!(row.len(), 20);
        assert!(row.ends_with("1,000.00"));
    }
}
