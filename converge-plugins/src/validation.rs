//! Input validation for plugin parameters.

use ipnet::Ipv4Net;
use thiserror::Error;

/// Validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Invalid IPv4 CIDR block: {0}")]
    InvalidCidr(String),

    #[error("CIDR block {0} has host bits set")]
    HostBitsSet(String),

    #[error("Subnet {0} is not within VPC CIDR block {1}")]
    SubnetOutsideVpc(String, String),

    #[error("Subnets {0} and {1} overlap")]
    SubnetOverlap(String, String),

    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Invalid record type: {0}")]
    InvalidRecordType(String),

    #[error("Record {0} cannot be managed, it belongs to the provider")]
    ProviderRecord(String),

    #[error("Invalid job name: {0:?}")]
    InvalidJobName(String),

    #[error("Invalid {field} field for job {job}: {value:?}")]
    InvalidScheduleField {
        job: String,
        field: &'static str,
        value: String,
    },

    #[error("Job {0} has no command")]
    JobCommandRequired(String),

    #[error("wait_timeout must be greater than zero")]
    InvalidWaitTimeout,
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Parse an IPv4 CIDR block, rejecting host bits.
pub fn parse_ipv4_cidr(cidr: &str) -> Result<Ipv4Net> {
    let net: Ipv4Net = cidr
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidCidr(cidr.to_string()))?;
    if net.addr() != net.network() {
        return Err(ValidationError::HostBitsSet(cidr.to_string()));
    }
    Ok(net)
}

/// Check if two IPv4 subnets overlap.
pub fn ipv4_subnets_overlap(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Validate and normalize a domain name (lowercase, no trailing dot).
pub fn normalize_domain(name: &str) -> Result<String> {
    let name = name.trim().trim_end_matches('.').to_ascii_lowercase();
    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };
    if name.is_empty() || name.len() > 253 || !name.contains('.') || !name.split('.').all(valid_label)
    {
        return Err(ValidationError::InvalidDomain(name));
    }
    Ok(name)
}

/// Validate one of the five crontab time fields.
pub fn validate_schedule_field(job: &str, field: &'static str, value: &str) -> Result<()> {
    if !is_schedule_field(value) {
        return Err(ValidationError::InvalidScheduleField {
            job: job.to_string(),
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Numbers, names, `*` and the `,` `-` `/` operators.
pub fn is_schedule_field(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_cidr() {
        let net = parse_ipv4_cidr("10.0.1.0/24").unwrap();
        assert_eq!(net.to_string(), "10.0.1.0/24");

        assert!(matches!(
            parse_ipv4_cidr("10.0.1.5/24"),
            Err(ValidationError::HostBitsSet(_))
        ));
        assert!(matches!(
            parse_ipv4_cidr("10.0.1.0"),
            Err(ValidationError::InvalidCidr(_))
        ));
        assert!(parse_ipv4_cidr("fd00::/64").is_err());
    }

    #[test]
    fn test_ipv4_subnets_overlap() {
        let a = parse_ipv4_cidr("10.0.0.0/24").unwrap();
        let b = parse_ipv4_cidr("10.0.0.0/16").unwrap();
        assert!(ipv4_subnets_overlap(&a, &b));

        let c = parse_ipv4_cidr("10.0.1.0/24").unwrap();
        assert!(!ipv4_subnets_overlap(&a, &c));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("Example.COM.").unwrap(), "example.com");
        assert_eq!(normalize_domain("a-b.example.org").unwrap(), "a-b.example.org");
        assert!(normalize_domain("localhost").is_err());
        assert!(normalize_domain("-bad.example.com").is_err());
        assert!(normalize_domain("bad..example.com").is_err());
        assert!(normalize_domain("").is_err());
    }

    #[test]
    fn test_validate_schedule_field() {
        assert!(validate_schedule_field("j", "minute", "*/5").is_ok());
        assert!(validate_schedule_field("j", "weekday", "mon-fri").is_ok());
        assert!(validate_schedule_field("j", "hour", "1,2,3").is_ok());
        assert!(validate_schedule_field("j", "hour", "").is_err());
        assert!(validate_schedule_field("j", "hour", "1 2").is_err());
    }
}
