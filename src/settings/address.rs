//! Per-address policy payload stored in the settings repository.

use serde::{Deserialize, Serialize};

use super::Mergeable;

/// What to do with producers once an address exceeds `max_size_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressFullPolicy {
    /// Silently drop further messages.
    Drop,
    /// Move further messages to paged storage.
    Page,
    /// Block producers until space frees up.
    Block,
}

/// Policies applied to every queue bound under a matching address.
///
/// Every field is optional: a pattern only pins down the policies it sets
/// explicitly, and resolution fills the rest from broader patterns and the
/// repository default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressSettings {
    pub dead_letter_address: Option<String>,
    pub expiry_address: Option<String>,
    pub redelivery_delay_ms: Option<u64>,
    pub max_delivery_attempts: Option<u32>,
    pub max_size_bytes: Option<i64>,
    pub page_size_bytes: Option<u64>,
    pub address_full_policy: Option<AddressFullPolicy>,
    pub last_value_queue: Option<bool>,
}

impl Mergeable for AddressSettings {
    fn merge(&mut self, other: &Self) {
        if self.dead_letter_address.is_none() {
            self.dead_letter_address = other.dead_letter_address.clone();
        }
        if self.expiry_address.is_none() {
            self.expiry_address = other.expiry_address.clone();
        }
        if self.redelivery_delay_ms.is_none() {
            self.redelivery_delay_ms = other.redelivery_delay_ms;
        }
        if self.max_delivery_attempts.is_none() {
            self.max_delivery_attempts = other.max_delivery_attempts;
        }
        if self.max_size_bytes.is_none() {
            self.max_size_bytes = other.max_size_bytes;
        }
        if self.page_size_bytes.is_none() {
            self.page_size_bytes = other.page_size_bytes;
        }
        if self.address_full_policy.is_none() {
            self.address_full_policy = other.address_full_policy;
        }
        if self.last_value_queue.is_none() {
            self.last_value_queue = other.last_value_queue;
        }
    }
}
