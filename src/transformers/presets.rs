//! Named, immutable bundles of [`super::TransformerSpec`]s. A channel or
//! routing rule references a preset by name instead of repeating the same
//! five-entry pipeline in every seed file; presets are concatenated, not
//! merged, so a channel can layer a preset plus its own trailing entries.

use serde_json::json;

use super::TransformerSpec;

fn spec(name: &str, options: serde_json::Value) -> TransformerSpec {
    TransformerSpec { name: name.into(), options, condition: None, skip_on_error: false }
}

/// Conservative defaults: clamp tokens and sampling params, no format
/// translation.
pub fn safe() -> Vec<TransformerSpec> {
    vec![
        spec("maxtoken", json!({"limit": 4096})),
        spec("sampling", json!({"temperature_min": 0.0, "temperature_max": 1.0})),
    ]
}

/// Same as `safe`, but refuses oversized requests instead of clamping.
pub fn strict() -> Vec<TransformerSpec> {
    vec![
        spec("maxtoken", json!({"limit": 4096, "strict": true})),
        spec("sampling", json!({"temperature_min": 0.0, "temperature_max": 1.0})),
    ]
}

/// Moderate limits plus cache-control stripping, suitable for most
/// third-party channels.
pub fn balanced() -> Vec<TransformerSpec> {
    vec![
        spec("maxtoken", json!({"limit": 8192})),
        spec("sampling", json!({"temperature_min": 0.0, "temperature_max": 1.2})),
        spec("cleancache", json!({})),
    ]
}

/// High ceilings, no clamping beyond provider-breaking values; favors
/// fidelity over cost control.
pub fn quality() -> Vec<TransformerSpec> {
    vec![spec("maxtoken", json!({"limit": 65536})), spec("cleancache", json!({}))]
}

pub fn by_name(name: &str) -> Option<Vec<TransformerSpec>> {
    match name {
        "safe" => Some(safe()),
        "strict" => Some(strict()),
        "balanced" => Some(balanced()),
        "quality" => Some(quality()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_preset_has_no_strict_clamp() {
        let specs = safe();
        assert_eq!(specs[0].options["strict"].as_bool().unwrap_or(false), false);
    }

    #[test]
    fn strict_preset_enables_strict_max_token_enforcement() {
        let specs = strict();
        assert!(specs[0].options["strict"].as_bool().unwrap());
    }

    #[test]
    fn by_name_returns_none_for_unknown_preset() {
        assert!(by_name("nonexistent").is_none());
    }

    #[test]
    fn by_name_round_trips_known_presets() {
        assert!(by_name("balanced").is_some());
        assert!(by_name("quality").is_some());
    }
}
