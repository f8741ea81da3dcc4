//! Kubernetes quantity canonicalization
//!
//! The API server stores resource quantities in a canonical form, so the
//! manifest text `"1000m"` and the stored `"1"` describe the same value.
//! Projection compares canonical forms to keep such rewrites from showing
//! up as drift. Values are modeled in nano-units (1e-9), which covers the
//! full `n`..`Ei` suffix range without floating point.

/// Nano-units per whole unit.
const NANO: i128 = 1_000_000_000;

/// Parse a Kubernetes quantity into nano-units.
///
/// Accepts decimal SI suffixes (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`),
/// binary suffixes (`Ki`..`Ei`), scientific notation (`e3`/`E3`), and plain
/// decimals. Returns `None` for anything malformed or out of range.
pub fn parse_quantity(input: &str) -> Option<i128> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    let (s, negative) = match s.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (s.strip_prefix('+').unwrap_or(s), false),
    };

    // Split off the suffix: the trailing run that is not a digit or '.',
    // except an exponent marker which consumes the rest of the string.
    let number_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);
    if number.is_empty() {
        return None;
    }

    let multiplier: i128 = match suffix {
        "" => NANO,
        "n" => 1,
        "u" => 1_000,
        "m" => 1_000_000,
        "k" => NANO * 1_000,
        "M" => NANO * 1_000_000,
        "G" => NANO * 1_000_000_000,
        "T" => NANO * 1_000_000_000_000,
        "P" => NANO * 1_000_000_000_000_000,
        "E" => NANO * 1_000_000_000_000_000_000,
        "Ki" => NANO * (1 << 10),
        "Mi" => NANO * (1 << 20),
        "Gi" => NANO * (1 << 30),
        "Ti" => NANO * (1i128 << 40),
        "Pi" => NANO * (1i128 << 50),
        "Ei" => NANO * (1i128 << 60),
        _ => {
            // Scientific notation: "12e3", "1.5E2".
            let exp: i32 = suffix
                .strip_prefix(['e', 'E'])
                .and_then(|e| e.parse().ok())?;
            if !(-9..=18).contains(&exp) {
                return None;
            }
            if exp >= 0 {
                NANO.checked_mul(10i128.checked_pow(exp as u32)?)?
            } else {
                NANO / 10i128.pow((-exp) as u32)
            }
        }
    };

    // Split integral and fractional digits.
    let mut parts = number.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let int_value: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let mut total = int_value.checked_mul(multiplier)?;

    // Fractional digits contribute multiplier / 10^i each.
    let mut scale = multiplier;
    for c in frac_part.chars() {
        scale /= 10;
        if scale == 0 {
            // Finer than the representable resolution; only exact zeros keep
            // the value canonical.
            if c != '0' {
                return None;
            }
            continue;
        }
        let digit = (c as u8 - b'0') as i128;
        total = total.checked_add(digit.checked_mul(scale)?)?;
    }

    Some(if negative { -total } else { total })
}

/// Render nano-units in the canonical form the API server would store.
///
/// Whole values render as a plain integer ("1", "2147483648"); sub-unit
/// values use the largest sub-unit suffix that renders integrally
/// ("1500m", "500u", "25n").
pub fn canonical_quantity(nanos: i128) -> String {
    let (sign, magnitude) = if nanos < 0 { ("-", -nanos) } else { ("", nanos) };

    if magnitude % NANO == 0 {
        format!("{}{}", sign, magnitude / NANO)
    } else if magnitude % 1_000_000 == 0 {
        format!("{}{}m", sign, magnitude / 1_000_000)
    } else if magnitude % 1_000 == 0 {
        format!("{}{}u", sign, magnitude / 1_000)
    } else {
        format!("{}{}n", sign, magnitude)
    }
}

/// Canonicalize a quantity string, or `None` when it does not parse.
pub fn normalize(input: &str) -> Option<String> {
    parse_quantity(input).map(canonical_quantity)
}

/// Map members whose string values are resource quantities.
const QUANTITY_PARENTS: &[&str] = &["limits", "requests", "hard", "used", "capacity", "allocatable"];

/// Leaf member names that hold quantities regardless of parent.
const QUANTITY_FIELDS: &[&str] = &["cpu", "memory", "storage", "ephemeral-storage"];

/// Heuristic for "this string leaf is a Kubernetes quantity".
///
/// `parent` is the name of the map holding the leaf, `field` the leaf's own
/// member name. Dotted resource names like `requests.memory` (ResourceQuota
/// `spec.hard`) count through their final component.
pub fn is_quantity_position(parent: Option<&str>, field: &str) -> bool {
    if parent.is_some_and(|p| QUANTITY_PARENTS.contains(&p)) {
        return true;
    }
    let last = field.rsplit('.').next().unwrap_or(field);
    QUANTITY_FIELDS.contains(&last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_milli_collapses_to_whole() {
        assert_eq!(normalize("1000m").as_deref(), Some("1"));
        assert_eq!(normalize("2000m").as_deref(), Some("2"));
    }

    #[test]
    fn test_sub_unit_keeps_smallest_suffix() {
        assert_eq!(normalize("500m").as_deref(), Some("500m"));
        assert_eq!(normalize("1500m").as_deref(), Some("1500m"));
        assert_eq!(normalize("250u").as_deref(), Some("250u"));
        assert_eq!(normalize("0.5").as_deref(), Some("500m"));
        assert_eq!(normalize("0.1").as_deref(), Some("100m"));
    }

    #[test]
    fn test_binary_suffixes() {
        assert_eq!(normalize("2Gi").as_deref(), Some("2147483648"));
        assert_eq!(normalize("1Ki").as_deref(), Some("1024"));
        assert_eq!(normalize("128Mi").as_deref(), Some("134217728"));
    }

    #[test]
    fn test_decimal_suffixes() {
        assert_eq!(normalize("1k").as_deref(), Some("1000"));
        assert_eq!(normalize("2M").as_deref(), Some("2000000"));
        assert_eq!(normalize("3G").as_deref(), Some("3000000000"));
    }

    #[test]
    fn test_equivalent_spellings_share_canonical_form() {
        assert_eq!(normalize("2Gi"), normalize("2147483648"));
        assert_eq!(normalize("1000m"), normalize("1"));
        assert_eq!(normalize("1024"), normalize("1Ki"));
        assert_eq!(normalize("100m"), normalize("0.1"));
    }

    #[test]
    fn test_scientific_notation() {
        assert_eq!(normalize("12e3").as_deref(), Some("12000"));
        assert_eq!(normalize("1.5E2").as_deref(), Some("150"));
    }

    #[test]
    fn test_negative_and_signed() {
        assert_eq!(normalize("-500m").as_deref(), Some("-500m"));
        assert_eq!(normalize("+2").as_deref(), Some("2"));
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(normalize("").is_none());
        assert!(normalize("abc").is_none());
        assert!(normalize("1Xi").is_none());
        assert!(normalize("1.2.3").is_none());
        assert!(normalize("m").is_none());
        assert!(normalize("nginx:1.27").is_none());
    }

    #[test]
    fn test_quantity_positions() {
        assert!(is_quantity_position(Some("limits"), "cpu"));
        assert!(is_quantity_position(Some("hard"), "requests.memory"));
        assert!(is_quantity_position(None, "memory"));
        assert!(is_quantity_position(None, "ephemeral-storage"));
        assert!(!is_quantity_position(Some("labels"), "app"));
        assert!(!is_quantity_position(None, "image"));
    }
}
