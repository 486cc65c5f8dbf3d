//! Precedence rules for configuration resolution.
//!
//! Every logical setting is read from an ordered list of sources, each
//! source being an attribute key within a metadata tier. Lists are
//! ordered from highest to lowest precedence and the first usable
//! value wins: instance beats project, current key names beat legacy
//! ones. Values which are empty or cannot be parsed are skipped.
//!
//! Feature flags are the exception, as each tier applies a sequence of
//! partial updates (per-feature toggles, master switch, deny-list) on
//! top of the result of the previous tier.

use super::metadata::{Attributes, RawMetadataDocument};
use super::{FeatureFlags, FlagOverrides, ResolvedConfig};

/// Metadata tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tier {
    Project,
    Instance,
}

/// Attribute key, within a tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Key {
    InventoryEnabled,
    InventoryEnabledLegacy,
    PrereleaseFeatures,
    PrereleaseFeaturesLegacy,
    OsConfigEnabled,
    DisabledFeatures,
    DebugEnabledLegacy,
    LogLevel,
    Endpoint,
    EndpointLegacy,
    PollInterval,
    PollIntervalLegacy,
}

impl Key {
    /// Look up this key, ignoring blank values.
    fn lookup(self, attrs: &Attributes) -> Option<&str> {
        let value = match self {
            Key::InventoryEnabled => &attrs.inventory_enabled,
            Key::InventoryEnabledLegacy => &attrs.inventory_enabled_legacy,
            Key::PrereleaseFeatures => &attrs.prerelease_features,
            Key::PrereleaseFeaturesLegacy => &attrs.prerelease_features_legacy,
            Key::OsConfigEnabled => &attrs.osconfig_enabled,
            Key::DisabledFeatures => &attrs.disabled_features,
            Key::DebugEnabledLegacy => &attrs.debug_enabled_legacy,
            Key::LogLevel => &attrs.log_level,
            Key::Endpoint => &attrs.endpoint,
            Key::EndpointLegacy => &attrs.endpoint_legacy,
            Key::PollInterval => &attrs.poll_interval,
            Key::PollIntervalLegacy => &attrs.poll_interval_legacy,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

type Source = (Tier, Key);

static ENDPOINT_SOURCES: &[Source] = &[
    (Tier::Instance, Key::Endpoint),
    (Tier::Instance, Key::EndpointLegacy),
    (Tier::Project, Key::Endpoint),
    (Tier::Project, Key::EndpointLegacy),
];

static POLL_INTERVAL_SOURCES: &[Source] = &[
    (Tier::Instance, Key::PollInterval),
    (Tier::Instance, Key::PollIntervalLegacy),
    (Tier::Project, Key::PollInterval),
    (Tier::Project, Key::PollIntervalLegacy),
];

static LOG_LEVEL_SOURCES: &[Source] = &[
    (Tier::Instance, Key::LogLevel),
    (Tier::Project, Key::LogLevel),
];

static DEBUG_SOURCES: &[Source] = &[
    (Tier::Instance, Key::DebugEnabledLegacy),
    (Tier::Project, Key::DebugEnabledLegacy),
];

static INVENTORY_KEYS: &[Key] = &[Key::InventoryEnabled, Key::InventoryEnabledLegacy];
static PRERELEASE_KEYS: &[Key] = &[Key::PrereleaseFeatures, Key::PrereleaseFeaturesLegacy];

/// Compute a new configuration from metadata and process flags.
///
/// This never fails: anything missing or malformed in `doc` falls back
/// to defaults, or to `previous` for instance identity fields.
pub fn resolve(
    previous: &ResolvedConfig,
    doc: &RawMetadataDocument,
    flags: &FlagOverrides,
) -> ResolvedConfig {
    let mut cfg = ResolvedConfig::default();

    carry_identity(&mut cfg, previous, doc);

    let mut features = FeatureFlags::default();
    apply_feature_tier(&mut features, &doc.project.attributes);
    apply_feature_tier(&mut features, &doc.instance.attributes);
    cfg.set_features(features);

    if let Some(minutes) = first_usable(doc, POLL_INTERVAL_SOURCES, parse_poll_interval) {
        cfg.poll_interval_minutes = minutes;
    }

    if let Some(debug) = first_usable(doc, DEBUG_SOURCES, parse_bool) {
        cfg.debug_enabled = debug;
    }
    if let Some(debug) = first_usable(doc, LOG_LEVEL_SOURCES, parse_log_level) {
        cfg.debug_enabled = debug;
    }
    if flags.debug {
        cfg.debug_enabled = true;
    }

    cfg.svc_endpoint = match flags.endpoint_override() {
        Some(endpoint) => endpoint.to_string(),
        None => first_usable(doc, ENDPOINT_SOURCES, |v| Some(v.to_string()))
            .unwrap_or(cfg.svc_endpoint),
    };

    cfg
}

/// Instance identity is sticky: once learned, it survives documents omitting it.
fn carry_identity(
    cfg: &mut ResolvedConfig,
    previous: &ResolvedConfig,
    doc: &RawMetadataDocument,
) {
    fn sticky(previous: &str, fresh: &Option<String>) -> String {
        match fresh.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => previous.to_string(),
        }
    }

    cfg.project_id = sticky(&previous.project_id, &doc.project.project_id);
    cfg.instance_zone = sticky(&previous.instance_zone, &doc.instance.zone);
    cfg.instance_name = sticky(&previous.instance_name, &doc.instance.name);
    cfg.instance_id = sticky(&previous.instance_id, &doc.instance.id);
    cfg.numeric_project_id = doc
        .project
        .numeric_project_id
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id != 0)
        .unwrap_or(previous.numeric_project_id);
}

/// Apply one tier of feature settings, in increasing precedence order.
fn apply_feature_tier(features: &mut FeatureFlags, attrs: &Attributes) {
    if let Some(enabled) = first_usable_key(attrs, INVENTORY_KEYS, parse_bool) {
        features.os_inventory = enabled;
    }
    if let Some(list) = first_usable_key(attrs, PRERELEASE_KEYS, Some) {
        set_listed_features(features, list, true);
    }
    if let Some(enabled) = Key::OsConfigEnabled.lookup(attrs).and_then(parse_bool) {
        *features = FeatureFlags::all(enabled);
    }
    if let Some(list) = Key::DisabledFeatures.lookup(attrs) {
        set_listed_features(features, list, false);
    }
}

/// Return the first value, across tiers, accepted by `parse`.
fn first_usable<'a, T, F>(
    doc: &'a RawMetadataDocument,
    sources: &[Source],
    parse: F,
) -> Option<T>
where
    F: Fn(&'a str) -> Option<T>,
{
    sources.iter().find_map(|(tier, key)| {
        let attrs = match tier {
            Tier::Project => &doc.project.attributes,
            Tier::Instance => &doc.instance.attributes,
        };
        key.lookup(attrs).and_then(&parse)
    })
}

/// Return the first value, within a single tier, accepted by `parse`.
fn first_usable_key<'a, T, F>(attrs: &'a Attributes, keys: &[Key], parse: F) -> Option<T>
where
    F: Fn(&'a str) -> Option<T>,
{
    keys.iter().find_map(|key| key.lookup(attrs).and_then(&parse))
}

/// Agent features which can be toggled from metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Feature {
    OsInventory,
    GuestPolicies,
    Tasks,
}

impl Feature {
    /// Parse a feature token, including deprecated aliases.
    fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "osinventory" | "inventory" => Some(Feature::OsInventory),
            "guestpolicies" | "ospackage" => Some(Feature::GuestPolicies),
            "tasks" | "ospatch" => Some(Feature::Tasks),
            _ => None,
        }
    }
}

/// Set all features named in a comma-separated list; unknown tokens are ignored.
fn set_listed_features(features: &mut FeatureFlags, list: &str, enabled: bool) {
    for feature in list.split(',').filter_map(Feature::parse) {
        match feature {
            Feature::OsInventory => features.os_inventory = enabled,
            Feature::GuestPolicies => features.guest_policies = enabled,
            Feature::Tasks => features.task_notification = enabled,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn parse_log_level(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "debug" => Some(true),
        "info" => Some(false),
        _ => None,
    }
}

fn parse_poll_interval(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|minutes| *minutes > 0)
}
