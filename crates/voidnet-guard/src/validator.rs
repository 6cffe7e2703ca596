//! Manifest validation.

use serde_yaml::Value;
use tracing::debug;

use crate::paths;

/// Directives rejected wherever they appear in the raw manifest text.
pub const FORBIDDEN_PATTERNS: [&str; 8] = [
    "privileged: true",
    "network_mode: host",
    "pid: host",
    "user: root",
    "/:/ ",
    "/root:",
    "/home:",
    "/var/run/docker.sock",
];

/// Manifests larger than this are rejected without being parsed.
pub const DEFAULT_MAX_MANIFEST_BYTES: usize = 512 * 1024;

/// Outcome of validating one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    /// Violations in discovery order. Empty means accepted.
    pub violations: Vec<String>,
}

impl Verdict {
    /// Whether the manifest may be sent to a satellite.
    pub fn accepted(&self) -> bool {
        self.violations.is_empty()
    }

    /// Consume the verdict, yielding the violation list.
    pub fn into_violations(self) -> Vec<String> {
        self.violations
    }
}

/// Compose manifest validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    max_bytes: usize,
    strict: bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Textual scan plus the host mount rule.
    pub fn new() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_MANIFEST_BYTES,
            strict: false,
        }
    }

    /// Adds structural service checks and canonical mount paths.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::new()
        }
    }

    /// Override the input size bound.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Whether structural checks are enabled.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Validate a compose manifest.
    pub fn validate(&self, manifest: &str) -> Verdict {
        let mut violations = Vec::new();

        if manifest.len() > self.max_bytes {
            violations.push(format!(
                "manifest is {} bytes, limit is {} bytes",
                manifest.len(),
                self.max_bytes
            ));
            return Verdict { violations };
        }

        for pattern in FORBIDDEN_PATTERNS {
            if manifest.contains(pattern) {
                violations.push(format!("forbidden directive: {pattern}"));
            }
        }

        let document: Value = match serde_yaml::from_str(manifest) {
            Ok(doc) => doc,
            Err(e) => {
                violations.push(format!("manifest is not valid YAML: {e}"));
                return Verdict { violations };
            }
        };

        if let Some(services) = document.get("services").and_then(Value::as_mapping) {
            for (name, service) in services {
                let name = service_name(name);
                self.check_volumes(&name, service, &mut violations);
                if self.strict {
                    check_service_settings(&name, service, &mut violations);
                }
            }
        }

        debug!(
            violations = violations.len(),
            strict = self.strict,
            "manifest validated"
        );
        Verdict { violations }
    }

    fn check_volumes(&self, service: &str, spec: &Value, violations: &mut Vec<String>) {
        let Some(volumes) = spec.get("volumes").and_then(Value::as_sequence) else {
            return;
        };

        for volume in volumes {
            match volume {
                Value::String(entry) if entry.contains('/') => {
                    let host = paths::host_side(entry);
                    if !self.host_allowed(host) {
                        violations.push(format!(
                            "service '{service}' mounts disallowed host path: {entry}"
                        ));
                    }
                }
                // Long syntax is only understood in strict mode.
                Value::Mapping(_) if self.strict => {
                    let is_bind = volume.get("type").and_then(Value::as_str) == Some("bind");
                    if let Some(source) = volume.get("source").and_then(Value::as_str) {
                        if (is_bind || source.contains('/')) && !self.host_allowed(source) {
                            violations.push(format!(
                                "service '{service}' mounts disallowed host path: {source}"
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.strict {
            paths::is_allowed_canonical(host)
        } else {
            paths::is_allowed_prefix(host)
        }
    }
}

fn service_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "<unnamed>".to_string()),
    }
}

/// Structural equivalents of the forbidden directives, plus capability grants.
fn check_service_settings(service: &str, spec: &Value, violations: &mut Vec<String>) {
    if is_truthy(spec.get("privileged")) {
        violations.push(format!("service '{service}' requests privileged mode"));
    }

    for key in ["network_mode", "pid", "ipc"] {
        if let Some(mode) = spec.get(key).and_then(Value::as_str) {
            if mode.trim().eq_ignore_ascii_case("host") {
                violations.push(format!("service '{service}' shares the host {key}"));
            }
        }
    }

    if let Some(user) = spec.get("user").map(scalar_text) {
        let principal = user.split(':').next().unwrap_or_default().trim();
        if principal == "root" || principal == "0" {
            violations.push(format!("service '{service}' runs as root"));
        }
    }

    for key in ["cap_add", "devices"] {
        let granted = spec
            .get(key)
            .and_then(Value::as_sequence)
            .is_some_and(|items| !items.is_empty());
        if granted {
            violations.push(format!("service '{service}' declares {key}"));
        }
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "on")
        }
        _ => false,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "\
services:
  web:
    image: nginx:1.27
    ports:
      - \"8080:80\"
    volumes:
      - ./html:/usr/share/nginx/html:ro
      - /tmp/cache:/cache
      - named-data
";

    #[test]
    fn clean_manifest_is_accepted() {
        let verdict = Validator::new().validate(CLEAN);
        assert!(verdict.accepted(), "{:?}", verdict.violations);
    }

    #[test]
    fn every_forbidden_pattern_is_reported_verbatim() {
        for pattern in FORBIDDEN_PATTERNS {
            let manifest = format!("services:\n  app:\n    image: x\n# {pattern}\n");
            let verdict = Validator::new().validate(&manifest);
            assert!(!verdict.accepted(), "pattern not caught: {pattern}");
            assert!(
                verdict.violations.iter().any(|v| v.contains(pattern)),
                "pattern missing from violations: {pattern}"
            );
        }
    }

    #[test]
    fn privileged_service_is_rejected() {
        let manifest = "services:\n  app:\n    image: x\n    privileged: true\n";
        let verdict = Validator::new().validate(manifest);
        assert_eq!(verdict.violations, vec!["forbidden directive: privileged: true"]);
    }

    #[test]
    fn docker_socket_mount_reports_pattern_and_mount() {
        let manifest = "services:\n  app:\n    image: x\n    volumes:\n      - /var/run/docker.sock:/var/run/docker.sock\n";
        let verdict = Validator::new().validate(manifest);
        assert_eq!(verdict.violations.len(), 2);
        assert_eq!(verdict.violations[0], "forbidden directive: /var/run/docker.sock");
        assert!(verdict.violations[1].contains("'app'"));
        assert!(verdict.violations[1].contains("/var/run/docker.sock:/var/run/docker.sock"));
    }

    #[test]
    fn disallowed_host_path_names_service_and_mount() {
        let manifest = "services:\n  db:\n    image: postgres\n    volumes:\n      - /srv/pg:/var/lib/postgresql/data\n";
        let verdict = Validator::new().validate(manifest);
        assert_eq!(
            verdict.violations,
            vec!["service 'db' mounts disallowed host path: /srv/pg:/var/lib/postgresql/data"]
        );
    }

    #[test]
    fn invalid_yaml_is_single_violation() {
        let verdict = Validator::new().validate("services: [unclosed\n  - /srv:/x");
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].starts_with("manifest is not valid YAML"));
    }

    #[test]
    fn parse_failure_still_keeps_textual_hits_first() {
        let verdict = Validator::new().validate("pid: host\nservices: [unclosed\n");
        assert_eq!(verdict.violations.len(), 2);
        assert_eq!(verdict.violations[0], "forbidden directive: pid: host");
    }

    #[test]
    fn oversized_manifest_is_rejected_unread() {
        let validator = Validator::new().with_max_bytes(16);
        let verdict = validator.validate("services:\n  web:\n    image: nginx\n");
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].contains("limit is 16 bytes"));
    }

    #[test]
    fn validation_is_deterministic() {
        let manifest = "services:\n  a:\n    volumes:\n      - /etc:/etc\n  b:\n    volumes:\n      - /opt:/opt\n";
        let first = Validator::new().validate(manifest);
        let second = Validator::new().validate(manifest);
        assert_eq!(first, second);
        assert_eq!(first.violations.len(), 2);
        assert!(first.violations[0].contains("'a'"));
        assert!(first.violations[1].contains("'b'"));
    }

    #[test]
    fn named_volume_with_container_path_is_a_host_mount() {
        let manifest = "services:\n  app:\n    volumes:\n      - pgdata:/var/lib/postgresql\n";
        let verdict = Validator::new().validate(manifest);
        assert_eq!(verdict.violations.len(), 1);
    }

    #[test]
    fn manifest_without_services_is_accepted() {
        assert!(Validator::new().validate("version: '3'\n").accepted());
    }

    #[test]
    fn default_mode_misses_reformatted_privileged() {
        let manifest = "services:\n  app:\n    image: x\n    privileged:   yes\n";
        assert!(Validator::new().validate(manifest).accepted());
        assert!(!Validator::strict().validate(manifest).accepted());
    }

    #[test]
    fn strict_mode_checks_structure() {
        let manifest = "\
services:
  app:
    image: x
    network_mode: \"host\"
    user: \"0:0\"
    cap_add:
      - SYS_ADMIN
    volumes:
      - type: bind
        source: /etc
        target: /host-etc
";
        let verdict = Validator::strict().validate(manifest);
        assert_eq!(verdict.violations.len(), 4, "{:?}", verdict.violations);
        assert!(verdict.violations.iter().any(|v| v.contains("host network_mode")));
        assert!(verdict.violations.iter().any(|v| v.contains("runs as root")));
        assert!(verdict.violations.iter().any(|v| v.contains("cap_add")));
        assert!(verdict.violations.iter().any(|v| v.contains("/etc")));
    }

    #[test]
    fn strict_mode_canonicalizes_mounts() {
        let manifest = "services:\n  app:\n    volumes:\n      - ./data/../../etc:/etc\n";
        assert!(Validator::new().validate(manifest).accepted());
        let verdict = Validator::strict().validate(manifest);
        assert_eq!(verdict.violations.len(), 1);
    }
}
