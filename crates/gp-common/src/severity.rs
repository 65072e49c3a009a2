//! Check severities.
//!
//! Severities follow the monitoring-plugin convention (0 OK, 1 WARNING,
//! 2 CRITICAL, 3 UNKNOWN). The derived ordering is the one used for every
//! "worse-of" comparison: `Ok < Warning < Critical < Unknown`.

use serde::{Deserialize, Serialize};

/// Verdict of a single check or of a composite.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Severity {
    /// All severities in ascending order.
    pub const ALL: [Severity; 4] = [
        Severity::Ok,
        Severity::Warning,
        Severity::Critical,
        Severity::Unknown,
    ];

    /// Map a plugin return code to a severity.
    ///
    /// Anything outside `0..=2` is UNKNOWN.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Severity::Ok,
            1 => Severity::Warning,
            2 => Severity::Critical,
            _ => Severity::Unknown,
        }
    }

    /// Lenient name parsing: unrecognised names map to UNKNOWN.
    pub fn parse(name: &str) -> Self {
        name.parse().unwrap_or(Severity::Unknown)
    }

    /// Plugin exit code for this severity.
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Ok => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
            Severity::Unknown => 3,
        }
    }

    /// Upper-case token used in summaries and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
            Severity::Unknown => "UNKNOWN",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Severity::Ok
    }

    /// The worse of two severities.
    pub fn worse(self, other: Severity) -> Severity {
        self.max(other)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OK" | "0" => Ok(Severity::Ok),
            "WARNING" | "WARN" | "1" => Ok(Severity::Warning),
            "CRITICAL" | "CRIT" | "2" => Ok(Severity::Critical),
            "UNKNOWN" | "3" => Ok(Severity::Unknown),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

impl From<i32> for Severity {
    fn from(code: i32) -> Self {
        Severity::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_total_order() {
        assert!(Severity::Ok < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert!(Severity::Critical < Severity::Unknown);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Severity::from_code(0), Severity::Ok);
        assert_eq!(Severity::from_code(1), Severity::Warning);
        assert_eq!(Severity::from_code(2), Severity::Critical);
        assert_eq!(Severity::from_code(3), Severity::Unknown);
        assert_eq!(Severity::from_code(-1), Severity::Unknown);
        assert_eq!(Severity::from_code(42), Severity::Unknown);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("ok"), Severity::Ok);
        assert_eq!(Severity::parse("Warning"), Severity::Warning);
        assert_eq!(Severity::parse("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse("bogus"), Severity::Unknown);
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn test_exit_code_roundtrip() {
        for sev in Severity::ALL {
            assert_eq!(Severity::from_code(sev.exit_code()), sev);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
        assert_eq!(Severity::Ok.to_string(), "OK");
    }

    #[test]
    fn test_serde_uppercase() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"WARNING\"");
        let back: Severity = serde_json::from_str("\"UNKNOWN\"").unwrap();
        assert_eq!(back, Severity::Unknown);
    }

    fn any_severity() -> impl Strategy<Value = Severity> {
        (0usize..4).prop_map(|i| Severity::ALL[i])
    }

    proptest! {
        #[test]
        fn worse_is_commutative_and_monotone(a in any_severity(), b in any_severity()) {
            prop_assert_eq!(a.worse(b), b.worse(a));
            prop_assert!(a.worse(b) >= a);
            prop_assert!(a.worse(b) >= b);
        }

        #[test]
        fn ordering_matches_exit_codes(a in any_severity(), b in any_severity()) {
            prop_assert_eq!(a.cmp(&b), a.exit_code().cmp(&b.exit_code()));
        }
    }
}
