//! Registry-safe names and deterministic service identifiers.
//!
//! Every identifier is a `:`-joined sequence of stable inputs, so two cycles
//! over unchanged cluster state produce byte-identical identifiers.

/// Sanitise `raw` for use inside a registry identifier.
///
/// Characters outside `[A-Za-z0-9_-]` become `separator`, underscores are
/// dropped and the result is lowercased.
pub fn clean_name(raw: &str, separator: &str) -> String {
    let mut replaced = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            replaced.push(c);
        } else {
            replaced.push_str(separator);
        }
    }
    replaced.replace('_', "").to_lowercase()
}

/// Separators that keep `clean_name` idempotent.
pub fn is_valid_separator(separator: &str) -> bool {
    separator
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn agent_service_id(prefix: &str, service: &str, agent_id: &str, hostname: &str) -> String {
    format!("{prefix}:{service}:{agent_id}:{hostname}")
}

pub fn master_service_id(prefix: &str, service: &str, ip: &str, port: u16) -> String {
    format!("{prefix}:{service}:{ip}:{port}")
}

/// Identifier for a task that declares no discovery ports.
pub fn task_service_id(prefix: &str, agent: &str, name: &str, address: &str) -> String {
    format!("{prefix}:{agent}-{name}:{address}")
}

/// Identifier for the primary entry built from a task's first discovery port.
pub fn primary_port_service_id(prefix: &str, agent: &str, name: &str, port: u16) -> String {
    format!("{prefix}:{agent}:{name}:{port}")
}

/// Identifier for the entry built from a named discovery port.
pub fn named_port_service_id(
    prefix: &str,
    agent: &str,
    name: &str,
    address: &str,
    port: u16,
) -> String {
    format!("{prefix}:{agent}:{name}:{address}:{port}")
}
