use crate::SwiftError;

/// ISO country codes accepted in the BIC country position.
const KNOWN_COUNTRIES: &[&str] = &[
    "AD", "AE", "AT", "AU", "BE", "BG", "BR", "CA", "CH", "CN", "CY", "CZ", "DE", "DK", "EE",
    "ES", "FI", "FR", "GB", "GR", "HK", "HR", "HU", "IE", "IN", "IS", "IT", "JP", "KR", "LI",
    "LT", "LU", "LV", "MC", "MT", "MX", "NL", "NO", "NZ", "PL", "PT", "QA", "RO", "SA", "SE",
    "SG", "SI", "SK", "SM", "TR", "US", "ZA",
];

/// Structural BIC validation: bank(4 alpha) + country(2 alpha, known) +
/// location(2 alnum) + optional branch(3 alnum).
pub fn validate_bic(bic: &str) -> Result<(), SwiftError> {
    let invalid = |reason: &str| SwiftError::InvalidBic {
        bic: bic.to_string(),
        reason: reason.to_string(),
    };

    if bic.len() != 8 && bic.len() != 11 {
        return Err(invalid("length must be 8 or 11"));
    }
    let bytes = bic.as_bytes();
    if !bytes[..4].iter().all(|b| b.is_ascii_uppercase()) {
        return Err(invalid("bank code must be four uppercase letters"));
    }
    let country = &bic[4..6];
    if !country.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(invalid("country code must be two uppercase letters"));
    }
    if !KNOWN_COUNTRIES.contains(&country) {
        return Err(invalid("unknown country code"));
    }
    if !bytes[6..8]
        .iter()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(invalid("location code must be alphanumeric"));
    }
    if bic.len() == 11
        && !bytes[8..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(invalid("branch code must be alphanumeric"));
    }
    Ok(())
}

/// Validate and normalize to the 11-character form; an 8-character BIC gets
/// the `XXX` head-office branch appended.
pub fn normalize_bic(bic: &str) -> Result<String, SwiftError> {
    let bic = bic.trim().to_ascii_uppercase();
    validate_bic(&bic)?;
    if bic.len() == 8 {
        Ok(format!("{bic}XXX"))
    } else {
        Ok(bic)
    }
}
