//! Trigger gates: which modules apply to a call.
//!
//! Gates are checked in a fixed order and the first failing gate is the
//! reported skip reason:
//!
//! | Order | Gate | Skips when |
//! |-------|------|------------|
//! | 1 | enabled | module disabled or not configured |
//! | 2 | talk time | effective talk time < `min_talk_time` |
//! | 3 | disposition | allow-list present and disposition not listed |
//! | 4 | campaign | allow-list present, campaign set and not listed |
//!
//! A module that fails gate 1 is inactive rather than skipped: it is not
//! switched on for anyone, so it is kept out of per-call skip reports.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ModuleConfig, ModuleConfigs};
use crate::types::{CallMetadata, ModuleName};

/// Why a module was not run for a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No config exists for the module
    NotConfigured,
    Disabled,
    TalkTimeBelowMinimum { talk_time: u32, min_talk_time: u32 },
    DispositionNotAllowed { disposition: Option<String> },
    CampaignNotAllowed { campaign: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotConfigured => write!(f, "module has no configuration"),
            SkipReason::Disabled => write!(f, "module disabled"),
            SkipReason::TalkTimeBelowMinimum {
                talk_time,
                min_talk_time,
            } => write!(f, "talk time {}s below minimum {}s", talk_time, min_talk_time),
            SkipReason::DispositionNotAllowed { disposition } => match disposition {
                Some(d) => write!(f, "disposition '{}' not in allow-list", d),
                None => write!(f, "call has no disposition but module requires one"),
            },
            SkipReason::CampaignNotAllowed { campaign } => {
                write!(f, "campaign '{}' not in allow-list", campaign)
            }
        }
    }
}

/// A module that was not run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedModule {
    pub module_name: ModuleName,
    #[serde(flatten)]
    pub reason: SkipReason,
}

impl SkipReason {
    /// The module is switched off, independent of the call.
    pub fn is_inactive(&self) -> bool {
        matches!(self, SkipReason::NotConfigured | SkipReason::Disabled)
    }
}

/// Result of resolving modules for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub eligible: Vec<ModuleName>,
    /// Enabled modules whose gates rejected this call
    pub skipped: Vec<SkippedModule>,
    /// Modules with no config or disabled
    #[serde(default)]
    pub inactive: Vec<SkippedModule>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

/// Check one module's gates against call metadata.
pub fn check_gates(config: Option<&ModuleConfig>, metadata: &CallMetadata) -> Result<(), SkipReason> {
    let config = config.ok_or(SkipReason::NotConfigured)?;

    if !config.enabled {
        return Err(SkipReason::Disabled);
    }

    let talk_time = metadata.effective_talk_time();
    if talk_time < config.min_talk_time {
        return Err(SkipReason::TalkTimeBelowMinimum {
            talk_time,
            min_talk_time: config.min_talk_time,
        });
    }

    if let Some(allowed) = non_empty(&config.allowed_dispositions) {
        let listed = metadata
            .disposition
            .as_deref()
            .is_some_and(|d| contains_ignore_case(allowed, d));
        if !listed {
            return Err(SkipReason::DispositionNotAllowed {
                disposition: metadata.disposition.clone(),
            });
        }
    }

    if let (Some(allowed), Some(campaign)) = (
        non_empty(&config.allowed_campaigns),
        metadata.campaign.as_deref(),
    ) {
        if !contains_ignore_case(allowed, campaign) {
            return Err(SkipReason::CampaignNotAllowed {
                campaign: campaign.to_string(),
            });
        }
    }

    Ok(())
}

/// Resolve which of `modules` run for a call, preserving their order.
pub fn resolve<I>(modules: I, configs: &ModuleConfigs, metadata: &CallMetadata) -> Resolution
where
    I: IntoIterator<Item = ModuleName>,
{
    let mut resolution = Resolution::default();

    for module in modules {
        match check_gates(configs.get(module), metadata) {
            Ok(()) => resolution.eligible.push(module),
            Err(reason) if reason.is_inactive() => {
                tracing::trace!(module = %module, reason = %reason, "Module inactive");
                resolution.inactive.push(SkippedModule {
                    module_name: module,
                    reason,
                });
            }
            Err(reason) => {
                tracing::debug!(module = %module, reason = %reason, "Module skipped");
                resolution.skipped.push(SkippedModule {
                    module_name: module,
                    reason,
                });
            }
        }
    }

    resolution
}

fn non_empty(list: &Option<Vec<String>>) -> Option<&[String]> {
    list.as_deref().filter(|l| !l.is_empty())
}

fn contains_ignore_case(list: &[String], value: &str) -> bool {
    let value = value.trim();
    list.iter().any(|item| item.trim().eq_ignore_ascii_case(value))
}
