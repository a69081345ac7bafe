//! Masking of credential values before rendered manifests reach the logs

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement for masked values
pub const REDACTED: &str = "<redacted>";

static SECRET_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)(["']?(?:brokerK8sApiServerToken|ceIPSecPSK|psk|token|aws_secret_access_key|clientSecret|password)["']?\s*:\s*)("[^"]*"|'[^']*'|[^\s,}]+)"#,
    )
    .expect("redaction pattern is a valid regex")
});

/// Replace the values of credential-bearing fields in YAML or JSON text
pub fn redact_secrets(text: &str) -> String {
    SECRET_FIELD
        .replace_all(text, format!("${{1}}{REDACTED}").as_str())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_yaml_fields() {
        let text = "spec:\n  brokerK8sApiServerToken: abc.def\n  ceIPSecPSK: c2VjcmV0\n  clusterID: cluster1\n";
        let out = redact_secrets(text);
        assert!(!out.contains("abc.def"));
        assert!(!out.contains("c2VjcmV0"));
        assert!(out.contains("brokerK8sApiServerToken: <redacted>"));
        assert!(out.contains("clusterID: cluster1"));
    }

    #[test]
    fn masks_json_fields() {
        let text = r#"{"ceIPSecPSK":"c2VjcmV0","clusterID":"c1"}"#;
        let out = redact_secrets(text);
        assert_eq!(out, r#"{"ceIPSecPSK":<redacted>,"clusterID":"c1"}"#);
    }

    #[test]
    fn leaves_unrelated_text_alone() {
        let text = "metadata:\n  name: submariner-ipsec-psk\n";
        assert_eq!(redact_secrets(text), text);
    }
}
