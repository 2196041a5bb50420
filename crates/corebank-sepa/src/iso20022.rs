//! ISO 20022 message construction.
//!
//! pain.001 initiates customer credit transfers, pacs.008 carries the
//! interbank leg. The canonical XML for a batch is persisted with the batch
//! record; amounts always render with two fraction digits.

use crate::transfer::SepaCreditTransfer;
use chrono::{DateTime, SecondsFormat, Utc};

const PAIN_001_NAMESPACE: &str = "urn:iso:std:iso:20022:tech:xsd:pain.001.001.03";
const PACS_008_NAMESPACE: &str = "urn:iso:std:iso:20022:tech:xsd:pacs.008.001.02";
const INITIATING_PARTY: &str = "COREBANK";

/// Customer credit transfer initiation (SCT).
pub fn build_pain001(
    message_id: &str,
    transfers: &[SepaCreditTransfer],
    created_at: DateTime<Utc>,
) -> String {
    let mut xml = String::with_capacity(1024);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!(r#"<Document xmlns="{PAIN_001_NAMESPACE}">"#));
    xml.push_str("<CstmrCdtTrfInitn>");
    push_group_header(&mut xml, message_id, transfers, created_at, false);

    for transfer in transfers {
        xml.push_str("<PmtInf>");
        push_tag(&mut xml, "PmtInfId", &format!("{}-PI", transfer.sepa_reference));
        push_tag(&mut xml, "PmtMtd", "TRF");
        push_tag(
            &mut xml,
            "ReqdExctnDt",
            &created_at.date_naive().format("%Y-%m-%d").to_string(),
        );
        xml.push_str("<Dbtr>");
        push_tag(&mut xml, "Nm", &transfer.debtor_name);
        xml.push_str("</Dbtr>");
        xml.push_str("<DbtrAcct><Id>");
        push_tag(&mut xml, "IBAN", &transfer.debtor_iban);
        xml.push_str("</Id></DbtrAcct>");

        xml.push_str("<CdtTrfTxInf>");
        xml.push_str("<PmtId>");
        push_tag(&mut xml, "EndToEndId", &transfer.end_to_end_id);
        xml.push_str("</PmtId>");
        xml.push_str(&format!(
            r#"<Amt><InstdAmt Ccy="{}">{}</InstdAmt></Amt>"#,
            escape(transfer.amount.currency.as_str()),
            transfer.amount.to_decimal_string()
        ));
        xml.push_str("<Cdtr>");
        push_tag(&mut xml, "Nm", &transfer.creditor_name);
        xml.push_str("</Cdtr>");
        xml.push_str("<CdtrAcct><Id>");
        push_tag(&mut xml, "IBAN", &transfer.creditor_iban);
        xml.push_str("</Id></CdtrAcct>");
        if !transfer.remittance_info.is_empty() {
            xml.push_str("<RmtInf>");
            push_tag(&mut xml, "Ustrd", &transfer.remittance_info);
            xml.push_str("</RmtInf>");
        }
        xml.push_str("</CdtTrfTxInf>");
        xml.push_str("</PmtInf>");
    }

    xml.push_str("</CstmrCdtTrfInitn>");
    xml.push_str("</Document>");
    xml
}

/// Interbank customer credit transfer (the clearing leg).
pub fn build_pacs008(
    message_id: &str,
    transfers: &[SepaCreditTransfer],
    created_at: DateTime<Utc>,
) -> String {
    let mut xml = String::with_capacity(1024);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!(r#"<Document xmlns="{PACS_008_NAMESPACE}">"#));
    xml.push_str("<FIToFICstmrCdtTrf>");
    push_group_header(&mut xml, message_id, transfers, created_at, true);

    for transfer in transfers {
        xml.push_str("<CdtTrfTxInf>");
        xml.push_str("<PmtId>");
        push_tag(&mut xml, "EndToEndId", &transfer.end_to_end_id);
        push_tag(&mut xml, "TxId", &transfer.sepa_reference);
        xml.push_str("</PmtId>");
        xml.push_str(&format!(
            r#"<IntrBkSttlmAmt Ccy="{}">{}</IntrBkSttlmAmt>"#,
            escape(transfer.amount.currency.as_str()),
            transfer.amount.to_decimal_string()
        ));
        xml.push_str("<Dbtr>");
        push_tag(&mut xml, "Nm", &transfer.debtor_name);
        xml.push_str("</Dbtr>");
        xml.push_str("<DbtrAcct><Id>");
        push_tag(&mut xml, "IBAN", &transfer.debtor_iban);
        xml.push_str("</Id></DbtrAcct>");
        xml.push_str("<Cdtr>");
        push_tag(&mut xml, "Nm", &transfer.creditor_name);
        xml.push_str("</Cdtr>");
        xml.push_str("<CdtrAcct><Id>");
        push_tag(&mut xml, "IBAN", &transfer.creditor_iban);
        xml.push_str("</Id></CdtrAcct>");
        xml.push_str("</CdtTrfTxInf>");
    }

    xml.push_str("</FIToFICstmrCdtTrf>");
    xml.push_str("</Document>");
    xml
}

fn push_group_header(
    xml: &mut String,
    message_id: &str,
    transfers: &[SepaCreditTransfer],
    created_at: DateTime<Utc>,
    interbank: bool,
) {
    let control_sum_minor: i64 = transfers.iter().map(|t| t.amount.minor_units).sum();
    xml.push_str("<GrpHdr>");
    push_tag(xml, "MsgId", message_id);
    push_tag(
        xml,
        "CreDtTm",
        &created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    push_tag(xml, "NbOfTxs", &transfers.len().to_string());
    push_tag(
        xml,
        "CtrlSum",
        &format!("{}.{:02}", control_sum_minor / 100, control_sum_minor % 100),
    );
    if interbank {
        xml.push_str("<SttlmInf><SttlmMtd>CLRG</SttlmMtd></SttlmInf>");
    } else {
        xml.push_str("<InitgPty>");
        push_tag(xml, "Nm", INITIATING_PARTY);
        xml.push_str("</InitgPty>");
    }
    xml.push_str("</GrpHdr>");
}

fn push_tag(xml: &mut String, tag: &str, value: &str) {
    xml.push('<');
    xml.push_str(tag);
    xml.push('>');
    xml.push_str(&escape(value));
    xml.push_str("</");
    xml.push_str(tag);
    xml.push('>');
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::SepaTransferStatus;
    use chrono::TimeZone;
    use corebank_types::{Currency, Money};

    fn transfer(minor: i64, creditor_name: &str) -> SepaCreditTransfer {
        SepaCreditTransfer {
            sepa_reference: "SCT-1".to_string(),
            end_to_end_id: "E2E-1".to_string(),
            debtor_account: "ACC-1".to_string(),
            debtor_iban: "DE89370400440532013000".to_string(),
            debtor_name: "Acme GmbH".to_string(),
            creditor_iban: "FR1420041010050500013M02606".to_string(),
            creditor_name: creditor_name.to_string(),
            amount: Money::from_minor(minor, Currency::new("EUR").unwrap()),
            instant: false,
            status: SepaTransferStatus::Pending,
            batch_id: None,
            network_reference: None,
            remittance_info: "invoice 4711".to_string(),
            failure_reason: None,
            created_at: Utc.with_ymd_and_hms(2026, 2, 10, 9, 30, 0).unwrap(),
            settled_at: None,
        }
    }

    #[test]
    fn pain001_carries_header_counts_and_amounts() {
        let created = Utc.with_ymd_and_hms(2026, 2, 10, 9, 30, 0).unwrap();
        let members = vec![transfer(10_000, "Fournisseur SA"), transfer(2_550, "B V")];
        let xml = build_pain001("MSG-1", &members, created);

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains("pain.001.001.03"));
        assert!(xml.contains("<MsgId>MSG-1</MsgId>"));
        assert!(xml.contains("<NbOfTxs>2</NbOfTxs>"));
        assert!(xml.contains("<CtrlSum>125.50</CtrlSum>"));
        assert!(xml.contains(r#"<InstdAmt Ccy="EUR">100.00</InstdAmt>"#));
        assert!(xml.contains("<IBAN>DE89370400440532013000</IBAN>"));
    }

    #[test]
    fn pacs008_is_the_interbank_shape() {
        let created = Utc.with_ymd_and_hms(2026, 2, 10, 9, 30, 0).unwrap();
        let members = vec![transfer(10_000, "Fournisseur SA")];
        let xml = build_pacs008("MSG-2", &members, created);

        assert!(xml.contains("pacs.008.001.02"));
        assert!(xml.contains("<SttlmMtd>CLRG</SttlmMtd>"));
        assert!(xml.contains(r#"<IntrBkSttlmAmt Ccy="EUR">100.00</IntrBkSttlmAmt>"#));
        assert!(!xml.contains("<InitgPty>"));
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let created = Utc.with_ymd_and_hms(2026, 2, 10, 9, 30, 0).unwrap();
        let members = vec![transfer(5_000, "M&uuml;ller <und> S\u{f6}hne")];
        let xml = build_pain001("MSG-3", &members, created);
        assert!(xml.contains("M&amp;uuml;ller &lt;und&gt;"));
        assert!(!xml.contains("<und>"));
    }
}
