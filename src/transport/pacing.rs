//! Destination-specific pacing for strict mailbox providers

use crate::config::{DeliveryConfig, RetryConfig};
use std::time::Duration;

/// Delays applied to one send
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    /// Wait before the first attempt
    pub pre_send_delay: Duration,
    /// Wait after the first failed attempt (doubles afterwards)
    pub base_delay: Duration,
}

/// Decides how gently a destination must be treated
///
/// Domains in the strict set (and their sub-domains) get a fixed pre-send
/// delay and a multiplied base backoff; every other domain gets neither.
#[derive(Clone, Debug)]
pub struct StrictProviderPolicy {
    domains: Vec<String>,
    pre_send_delay: Duration,
    backoff_multiplier: f64,
    base_delay: Duration,
}

impl StrictProviderPolicy {
    /// Policy with an explicit domain list
    pub fn new(
        domains: impl IntoIterator<Item = impl Into<String>>,
        pre_send_delay: Duration,
        backoff_multiplier: f64,
        base_delay: Duration,
    ) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.into().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            pre_send_delay,
            backoff_multiplier: backoff_multiplier.max(1.0),
            base_delay,
        }
    }

    /// Policy from the delivery and retry settings
    pub fn from_config(delivery: &DeliveryConfig, retry: &RetryConfig) -> Self {
        Self::new(
            delivery.strict_domains.iter().cloned(),
            delivery.strict_pre_send_delay,
            delivery.strict_backoff_multiplier,
            retry.base_delay,
        )
    }

    /// True when the destination's domain is in the strict set
    pub fn is_strict(&self, destination: &str) -> bool {
        let Some((_, domain)) = destination.trim().rsplit_once('@') else {
            return false;
        };
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        self.domains.iter().any(|strict| {
            domain == *strict
                || domain
                    .strip_suffix(strict.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Delays for a send to `destination`
    pub fn pacing_for(&self, destination: &str) -> Pacing {
        if self.is_strict(destination) {
            Pacing {
                pre_send_delay: self.pre_send_delay,
                base_delay: scale(self.base_delay, self.backoff_multiplier),
            }
        } else {
            Pacing {
                pre_send_delay: Duration::ZERO,
                base_delay: self.base_delay,
            }
        }
    }
}

/// `delay * factor`, saturating instead of panicking on overflow
fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
