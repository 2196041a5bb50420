use crate::bic::normalize_bic;
use crate::SwiftError;
use chrono::NaiveDate;
use corebank_types::{Currency, Money};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SWIFT name/address fields cap at 140 characters.
const NAME_LIMIT: usize = 140;
/// `:20:` transaction reference caps at 16 characters.
const REFERENCE_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeType {
    Our,
    Sha,
    Ben,
}

impl ChargeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Our => "OUR",
            Self::Sha => "SHA",
            Self::Ben => "BEN",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "OUR" => Some(Self::Our),
            "SHA" => Some(Self::Sha),
            "BEN" => Some(Self::Ben),
            _ => None,
        }
    }
}

impl fmt::Display for ChargeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field set of an MT103 single customer credit transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mt103Fields {
    pub sender_bic: String,
    pub receiver_bic: String,
    pub transaction_reference: String,
    pub bank_operation_code: String,
    pub value_date: NaiveDate,
    pub amount: Money,
    pub ordering_customer: String,
    pub ordering_institution: String,
    pub correspondent: Option<String>,
    pub beneficiary_bank: String,
    pub beneficiary: String,
    pub remittance_info: Option<String>,
    pub charge_type: ChargeType,
}

/// Fold to uppercase ASCII within the SWIFT X character set, dropping what
/// cannot be represented, and truncate to the field limit.
fn fold_name(text: &str, limit: usize) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars() {
        let mapped: Option<char> = match c {
            'a'..='z' => Some(c.to_ascii_uppercase()),
            'A'..='Z' | '0'..='9' | ' ' | '/' | '-' | '?' | ':' | '(' | ')' | '.' | ','
            | '\'' | '+' => Some(c),
            'à' | 'á' | 'â' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ä' | 'Å' => Some('A'),
            'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => Some('E'),
            'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => Some('I'),
            'ò' | 'ó' | 'ô' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Ö' => Some('O'),
            'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => Some('U'),
            'ç' | 'Ç' => Some('C'),
            'ñ' | 'Ñ' => Some('N'),
            'ş' | 'Ş' => Some('S'),
            'ğ' | 'Ğ' => Some('G'),
            'ß' => Some('S'),
            _ => None,
        };
        if let Some(mapped) = mapped {
            folded.push(mapped);
        }
    }
    folded.chars().take(limit).collect()
}

/// `:32A:` value: `yyMMdd<ccy><amount-with-comma>`.
fn format_32a(value_date: NaiveDate, amount: &Money) -> String {
    format!(
        "{}{}{}",
        value_date.format("%y%m%d"),
        amount.currency.as_str(),
        amount.to_decimal_string().replace('.', ",")
    )
}

/// Assemble the block-structured MT103 text.
pub fn build(fields: &Mt103Fields) -> Result<String, SwiftError> {
    let sender = normalize_bic(&fields.sender_bic)?;
    let receiver = normalize_bic(&fields.receiver_bic)?;
    let reference = fold_name(&fields.transaction_reference, REFERENCE_LIMIT);
    if reference.is_empty() {
        return Err(SwiftError::Validation(
            "transaction reference is required".to_string(),
        ));
    }
    if !fields.amount.is_positive() {
        return Err(SwiftError::Validation("amount must be positive".to_string()));
    }

    let mut block4 = String::new();
    let mut push_field = |tag: &str, value: &str| {
        block4.push('\n');
        block4.push(':');
        block4.push_str(tag);
        block4.push(':');
        block4.push_str(value);
    };

    push_field("20", &reference);
    push_field("23B", &fold_name(&fields.bank_operation_code, 4));
    push_field("32A", &format_32a(fields.value_date, &fields.amount));
    push_field("50K", &fold_name(&fields.ordering_customer, NAME_LIMIT));
    push_field("52A", &normalize_bic(&fields.ordering_institution)?);
    if let Some(correspondent) = &fields.correspondent {
        push_field("53A", &normalize_bic(correspondent)?);
    }
    push_field("57A", &normalize_bic(&fields.beneficiary_bank)?);
    push_field("59", &fold_name(&fields.beneficiary, NAME_LIMIT));
    if let Some(remittance) = &fields.remittance_info {
        push_field("70", &fold_name(remittance, NAME_LIMIT));
    }
    push_field("71A", fields.charge_type.as_str());
    block4.push('\n');

    let checksum = blake3::hash(block4.as_bytes()).to_hex().to_string();
    let check = checksum[..12].to_ascii_uppercase();

    Ok(format!(
        "{{1:F01{sender}0000000000}}{{2:I103{receiver}N}}{{3:{{108:MT103}}}}{{4:{block4}-}}{{5:{{CHK:{check}}}}}"
    ))
}

/// Parse a message produced by [`build`] back into its fields.
pub fn parse(message: &str) -> Result<Mt103Fields, SwiftError> {
    let malformed = |reason: &str| SwiftError::MalformedMessage(reason.to_string());

    let sender = extract(message, "{1:F01", 11).ok_or_else(|| malformed("missing block 1"))?;
    let receiver = extract(message, "{2:I103", 11).ok_or_else(|| malformed("missing block 2"))?;

    let body_start = message
        .find("{4:")
        .ok_or_else(|| malformed("missing block 4"))?;
    let body_end = message[body_start..]
        .find("-}")
        .map(|offset| body_start + offset)
        .ok_or_else(|| malformed("unterminated block 4"))?;
    let body = &message[body_start + 3..body_end];

    let mut reference = None;
    let mut operation_code = None;
    let mut value_32a = None;
    let mut ordering_customer = None;
    let mut ordering_institution = None;
    let mut correspondent = None;
    let mut beneficiary_bank = None;
    let mut beneficiary = None;
    let mut remittance = None;
    let mut charge_type = None;

    for line in body.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(':') else {
            continue;
        };
        let Some((tag, value)) = rest.split_once(':') else {
            continue;
        };
        match tag {
            "20" => reference = Some(value.to_string()),
            "23B" => operation_code = Some(value.to_string()),
            "32A" => value_32a = Some(value.to_string()),
            "50K" => ordering_customer = Some(value.to_string()),
            "52A" => ordering_institution = Some(value.to_string()),
            "53A" => correspondent = Some(value.to_string()),
            "57A" => beneficiary_bank = Some(value.to_string()),
            "59" => beneficiary = Some(value.to_string()),
            "70" => remittance = Some(value.to_string()),
            "71A" => {
                charge_type =
                    Some(ChargeType::parse(value).ok_or_else(|| malformed("unknown charge type"))?)
            }
            _ => {}
        }
    }

    let value_32a = value_32a.ok_or_else(|| malformed("missing :32A:"))?;
    if value_32a.len() < 10 {
        return Err(malformed("truncated :32A:"));
    }
    let (date_part, rest) = value_32a.split_at(6);
    let (currency_part, amount_part) = rest.split_at(3);
    let value_date = NaiveDate::parse_from_str(&format!("20{date_part}"), "%Y%m%d")
        .map_err(|_| malformed("bad :32A: date"))?;
    let currency = Currency::new(currency_part.to_string())
        .map_err(|_| malformed("bad :32A: currency"))?;
    let amount = Money::parse(&amount_part.replace(',', "."), currency)
        .map_err(|_| malformed("bad :32A: amount"))?;

    Ok(Mt103Fields {
        sender_bic: sender,
        receiver_bic: receiver,
        transaction_reference: reference.ok_or_else(|| malformed("missing :20:"))?,
        bank_operation_code: operation_code.ok_or_else(|| malformed("missing :23B:"))?,
        value_date,
        amount,
        ordering_customer: ordering_customer.ok_or_else(|| malformed("missing :50K:"))?,
        ordering_institution: ordering_institution.ok_or_else(|| malformed("missing :52A:"))?,
        correspondent,
        beneficiary_bank: beneficiary_bank.ok_or_else(|| malformed("missing :57A:"))?,
        beneficiary: beneficiary.ok_or_else(|| malformed("missing :59:"))?,
        remittance_info: remittance,
        charge_type: charge_type.ok_or_else(|| malformed("missing :71A:"))?,
    })
}

fn extract(message: &str, marker: &str, len: usize) -> Option<String> {
    let start = message.find(marker)? + marker.len();
    let slice = message.get(start..start + len)?;
    Some(slice.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::new("USD").unwrap())
    }

    fn fields() -> Mt103Fields {
        Mt103Fields {
            sender_bic: "DEUTDEFFXXX".to_string(),
            receiver_bic: "CHASUS33XXX".to_string(),
            transaction_reference: "TRX123456".to_string(),
            bank_operation_code: "CRED".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            amount: usd(1_000_000),
            ordering_customer: "ACME GMBH BERLIN".to_string(),
            ordering_institution: "DEUTDEFFXXX".to_string(),
            correspondent: Some("BNPAFRPPXXX".to_string()),
            beneficiary_bank: "CHASUS33XXX".to_string(),
            beneficiary: "JOHN DOE NEW YORK".to_string(),
            remittance_info: Some("INVOICE 42".to_string()),
            charge_type: ChargeType::Sha,
        }
    }

    #[test]
    fn thirty_two_a_is_exact() {
        assert_eq!(
            format_32a(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(), &usd(1_000_000)),
            "260115USD10000,00"
        );
    }

    #[test]
    fn build_produces_all_blocks() {
        let message = build(&fields()).unwrap();
        assert!(message.starts_with("{1:F01DEUTDEFFXXX0000000000}"));
        assert!(message.contains("{2:I103CHASUS33XXXN}"));
        assert!(message.contains("{3:{108:MT103}}"));
        assert!(message.contains(":20:TRX123456"));
        assert!(message.contains(":32A:260115USD10000,00"));
        assert!(message.contains(":71A:SHA"));
        assert!(message.contains("{5:{CHK:"));
    }

    #[test]
    fn parse_build_round_trips() {
        let original = fields();
        let parsed = parse(&build(&original).unwrap()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn eight_char_bics_round_trip_normalized() {
        let mut f = fields();
        f.sender_bic = "DEUTDEFF".to_string();
        f.receiver_bic = "CHASUS33".to_string();
        let parsed = parse(&build(&f).unwrap()).unwrap();
        assert_eq!(parsed.sender_bic, "DEUTDEFFXXX");
        assert_eq!(parsed.receiver_bic, "CHASUS33XXX");
    }

    #[test]
    fn names_fold_and_truncate() {
        let mut f = fields();
        f.beneficiary = format!("Ümit Şükrü {}", "X".repeat(200));
        let message = build(&f).unwrap();
        let parsed = parse(&message).unwrap();
        assert!(parsed.beneficiary.starts_with("UMIT SUKRU"));
        assert_eq!(parsed.beneficiary.chars().count(), 140);
    }

    #[test]
    fn overlong_reference_is_cut_to_sixteen() {
        let mut f = fields();
        f.transaction_reference = "ABCDEFGHIJKLMNOPQRSTU".to_string();
        let parsed = parse(&build(&f).unwrap()).unwrap();
        assert_eq!(parsed.transaction_reference, "ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse("{1:F01DEUTDEFFXXX0000000000}").is_err());
        assert!(parse("not a swift message").is_err());
    }
}
