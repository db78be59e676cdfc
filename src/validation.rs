//! Input validation and sanitization
//!
//! Everything that ends up on an external command line or inside the hostapd
//! configuration passes through here first.

use crate::error::{HotspotError, HotspotResult};
use std::net::Ipv4Addr;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Maximum length for configuration values
const MAX_CONFIG_VALUE_LEN: usize = 255;

/// Maximum length for command output carried inside errors
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> HotspotResult<()> {
    if name.is_empty() {
        return Err(HotspotError::InvalidParameter(
            "Interface name cannot be empty".to_string()
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(HotspotError::InvalidParameter(
            format!("Interface name too long (max {} characters)", MAX_INTERFACE_NAME_LEN)
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(HotspotError::InvalidParameter(
                format!("Invalid interface name '{}': contains invalid character '{}'", name, c)
            ));
        }
    }

    // Could be read as an option by ip/iptables
    if name.starts_with('-') {
        return Err(HotspotError::InvalidParameter(
            "Interface name cannot start with dash".to_string()
        ));
    }

    Ok(())
}

/// Validate an IPv4 address in dotted-quad form
pub fn validate_ipv4_address(addr: &str) -> HotspotResult<Ipv4Addr> {
    addr.trim().parse::<Ipv4Addr>()
        .map_err(|_| HotspotError::InvalidParameter(
            format!("Non valid IP address: {}", addr)
        ))
}

/// Convert a dotted netmask to a prefix length
///
/// Rejects masks whose one-bits are not contiguous.
pub fn netmask_prefix_len(netmask: Ipv4Addr) -> HotspotResult<u8> {
    let bits = u32::from(netmask);
    let ones = bits.leading_ones();
    if bits.checked_shl(ones).unwrap_or(0) != 0 {
        return Err(HotspotError::InvalidParameter(
            format!("Netmask {} is not contiguous", netmask)
        ));
    }
    Ok(ones as u8)
}

/// Validate a MAC address and return its canonical form
///
/// Accepts six hex pairs separated consistently by either ':' or '-', in any
/// letter case. The canonical form is lowercase and colon-separated.
pub fn normalize_mac_address(mac: &str) -> HotspotResult<String> {
    let invalid = || HotspotError::InvalidParameter(format!("Non valid MAC address: {}", mac));

    let lower = mac.trim().to_ascii_lowercase();
    if lower.len() != 17 {
        return Err(invalid());
    }

    let separator = lower.as_bytes()[2] as char;
    if separator != ':' && separator != '-' {
        return Err(invalid());
    }

    let parts: Vec<&str> = lower.split(separator).collect();
    if parts.len() != 6 {
        return Err(invalid());
    }

    for part in &parts {
        if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
    }

    Ok(parts.join(":"))
}

/// Sanitize configuration values to prevent injection
///
/// hostapd reads one `key=value` per line, so anything that could start a new
/// line is refused.
pub fn sanitize_config_value(value: &str) -> HotspotResult<String> {
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(HotspotError::InvalidParameter(
            "Configuration value contains invalid control characters".to_string()
        ));
    }

    if value.contains('\0') {
        return Err(HotspotError::InvalidParameter(
            "Configuration value contains null byte".to_string()
        ));
    }

    if value.len() > MAX_CONFIG_VALUE_LEN {
        return Err(HotspotError::InvalidParameter(
            format!("Configuration value too long (max {} characters)", MAX_CONFIG_VALUE_LEN)
        ));
    }

    Ok(value.to_string())
}

/// Validate WiFi SSID
///
/// SSIDs can be 1-32 bytes
pub fn validate_ssid(ssid: &str) -> HotspotResult<()> {
    if ssid.is_empty() {
        return Err(HotspotError::InvalidParameter(
            "SSID cannot be empty".to_string()
        ));
    }

    if ssid.len() > 32 {
        return Err(HotspotError::InvalidParameter(
            "SSID cannot exceed 32 bytes".to_string()
        ));
    }

    if ssid.chars().any(|c| c.is_control()) {
        return Err(HotspotError::InvalidParameter(
            "SSID contains invalid control characters".to_string()
        ));
    }

    Ok(())
}

/// Validate WiFi password (WPA2 passphrase)
///
/// WPA2 requirements: 8-63 ASCII characters
pub fn validate_wifi_password(password: &str) -> HotspotResult<()> {
    if password.len() < 8 {
        return Err(HotspotError::InvalidParameter(
            "WiFi password must be 8 chars length minimum".to_string()
        ));
    }

    if password.len() > 63 {
        return Err(HotspotError::InvalidParameter(
            "WiFi password cannot exceed 63 characters".to_string()
        ));
    }

    if !password.is_ascii() {
        return Err(HotspotError::InvalidParameter(
            "WiFi password must contain only ASCII characters".to_string()
        ));
    }

    if password.chars().any(|c| c.is_control()) {
        return Err(HotspotError::InvalidParameter(
            "WiFi password contains invalid control characters".to_string()
        ));
    }

    Ok(())
}

/// Check that `name` is one of `known`, reporting `what` on failure
pub fn validate_member(name: &str, known: &[String], what: &str) -> HotspotResult<()> {
    validate_interface_name(name)?;
    if known.iter().any(|k| k == name) {
        Ok(())
    } else {
        Err(HotspotError::InvalidParameter(format!("Non valid {} interface: {}", what, name)))
    }
}

/// Limit command output kept in errors and reports
pub fn sanitize_error_message(stderr: &str) -> String {
    let mut sanitized = stderr.trim_end().to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("... (truncated)");
    }

    sanitized
}
