//! Configuration validation
//!
//! Every problem found is reported, not just the first one.

use std::collections::HashSet;
use std::net::IpAddr;

use super::types::{ChannelAction, ChannelConfig, LogoConfig, LogoSrvConfig, StatusConfig};
use super::{MEMORY_MAX, MEMORY_MIN, POLLING_CYCLE_MIN_MS};
use crate::core::device::ValueType;
use crate::core::mqtt::QualityOfService;
use crate::error::{LogoSrvError, Result};

/// Check `config`; the error lists every violation
pub fn validate(config: &LogoSrvConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.mqtt_broker.host.trim().is_empty() {
        errors.push("mqtt_broker.host must not be empty".to_string());
    }
    if config.mqtt_broker.port == 0 {
        errors.push("mqtt_broker.port must not be 0".to_string());
    }

    let mut client_ids = HashSet::new();
    for (index, logo) in config.logos.iter().enumerate() {
        validate_logo(&format!("logos[{}]", index), logo, &mut client_ids, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(LogoSrvError::config(errors.join("; ")))
    }
}

fn validate_logo(
    path: &str,
    logo: &LogoConfig,
    client_ids: &mut HashSet<String>,
    errors: &mut Vec<String>,
) {
    if logo.ip_address.parse::<IpAddr>().is_err() {
        errors.push(format!(
            "{}.ip_address '{}' is not an IP address",
            path, logo.ip_address
        ));
    }
    if logo.port == 0 {
        errors.push(format!("{}.port must not be 0", path));
    }

    let max_size = (MEMORY_MAX - MEMORY_MIN) as i32;
    for (index, range) in logo.memory_ranges.iter().enumerate() {
        let range_path = format!("{}.memory_ranges[{}]", path, index);
        if range.start < MEMORY_MIN as i32 {
            errors.push(format!("{}.start must be >= {}", range_path, MEMORY_MIN));
        }
        if range.end > MEMORY_MAX as i32 {
            errors.push(format!("{}.end must be <= {}", range_path, MEMORY_MAX));
        }
        if range.size() < 1 || range.size() > max_size {
            errors.push(format!(
                "{} size {} not in [1, {}]",
                range_path,
                range.size(),
                max_size
            ));
        }
        if range.polling_cycle_ms < POLLING_CYCLE_MIN_MS {
            errors.push(format!(
                "{}.polling_cycle_ms must be >= {}",
                range_path, POLLING_CYCLE_MIN_MS
            ));
        }
        for (other_index, other) in logo.memory_ranges.iter().enumerate().skip(index + 1) {
            if range.start < other.end && other.start < range.end {
                errors.push(format!(
                    "{} overlaps {}.memory_ranges[{}]",
                    range_path, path, other_index
                ));
            }
        }
    }

    for (index, client) in logo.mqtt.iter().enumerate() {
        let client_path = format!("{}.mqtt[{}]", path, index);
        if client.client_id.trim().is_empty() {
            errors.push(format!("{}.client_id must not be empty", client_path));
        } else if !client_ids.insert(client.client_id.clone()) {
            errors.push(format!(
                "{}.client_id '{}' is used twice",
                client_path, client.client_id
            ));
        }

        if let Some(status) = &client.status {
            validate_status(&format!("{}.status", client_path), status, errors);
        }
        for (channel_index, channel) in client.channels.iter().enumerate() {
            validate_channel(
                &format!("{}.channels[{}]", client_path, channel_index),
                logo,
                channel,
                errors,
            );
        }
    }
}

fn validate_status(path: &str, status: &StatusConfig, errors: &mut Vec<String>) {
    if let Err(reason) = validate_topic(&status.topic) {
        errors.push(format!("{}.topic: {}", path, reason));
    }
    if status.qos != QualityOfService::ExactlyOnce {
        errors.push(format!("{}.qos must be ExactlyOnce", path));
    }
    if !status.retain {
        errors.push(format!("{}.retain must be true", path));
    }
}

fn validate_channel(path: &str, logo: &LogoConfig, channel: &ChannelConfig, errors: &mut Vec<String>) {
    if let Err(reason) = validate_topic(&channel.topic) {
        errors.push(format!("{}.topic: {}", path, reason));
    }

    let width = channel.value_type.width() as i32;
    let address = channel.logo_address;
    if address < MEMORY_MIN as i32 || address > MEMORY_MAX as i32 {
        errors.push(format!(
            "{}.logo_address {} not in [{}, {}]",
            path, address, MEMORY_MIN, MEMORY_MAX
        ));
    } else if !logo.memory_ranges.iter().any(|r| r.contains(address, width)) {
        errors.push(format!(
            "{}: {} bytes at address {} are not inside one memory range",
            path, width, address
        ));
    }

    if channel.action == ChannelAction::SubscribePulse {
        if channel.value_type != ValueType::Byte {
            errors.push(format!(
                "{}: SubscribePulse needs type Byte, got {}",
                path, channel.value_type
            ));
        }
        if channel.duration_ms == 0 {
            errors.push(format!("{}.duration_ms must be > 0", path));
        }
    }
}

/// Topic rules shared by channels and status topics
pub fn validate_topic(topic: &str) -> std::result::Result<(), String> {
    if topic.is_empty() {
        return Err("topic must not be empty".to_string());
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(format!("'{}' contains whitespace", topic));
    }
    if topic.starts_with('/') {
        return Err(format!("'{}' starts with '/'", topic));
    }
    if let Some(pos) = topic.find('#') {
        if pos != topic.len() - 1 {
            return Err(format!("'{}' has '#' before the end", topic));
        }
    }
    if topic.contains("//") {
        return Err(format!("'{}' has an empty level", topic));
    }
    Ok(())
}
