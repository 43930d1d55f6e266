use anyhow::{bail, Result};
use std::collections::HashMap;
use yard_core::{Constants, TrackSelection};

const VALID_KEYS: &[&str] = &[
    "reclamation_period_secs",
    "interop_yield_secs",
    "job_destroy_sqr_distance",
    "abandonment_multiplier",
    "delete_sqr_distance",
    "loaded_cargo_threshold",
    "car_separation_m",
    "shunting_distance_per_track_m",
    "track_selection",
    "suppress_inbound_generation",
    "preserve_unabsorbed_cars",
    "station_jobs_per_visit",
    "max_cars_base",
    "max_cars_train_length1",
    "max_cars_train_length2",
];

pub fn apply_overrides(
    constants: &mut Constants,
    overrides: &HashMap<String, serde_json::Value>,
) -> Result<()> {
    for (key, value) in overrides {
        match key.as_str() {
            "reclamation_period_secs" => constants.reclamation_period_secs = as_f32(key, value)?,
            "interop_yield_secs" => constants.interop_yield_secs = as_f32(key, value)?,
            "job_destroy_sqr_distance" => {
                constants.job_destroy_sqr_distance = as_f32(key, value)?;
            }
            "abandonment_multiplier" => constants.abandonment_multiplier = as_f32(key, value)?,
            "delete_sqr_distance" => constants.delete_sqr_distance = as_f32(key, value)?,
            "loaded_cargo_threshold" => constants.loaded_cargo_threshold = as_f32(key, value)?,
            "car_separation_m" => constants.car_separation_m = as_f32(key, value)?,
            "shunting_distance_per_track_m" => {
                constants.shunting_distance_per_track_m = as_f32(key, value)?;
            }
            "track_selection" => constants.track_selection = as_track_selection(key, value)?,
            "suppress_inbound_generation" => {
                constants.suppress_inbound_generation = as_bool(key, value)?;
            }
            "preserve_unabsorbed_cars" => {
                constants.preserve_unabsorbed_cars = as_bool(key, value)?;
            }
            "station_jobs_per_visit" => constants.station_jobs_per_visit = as_u32(key, value)?,
            "max_cars_base" => constants.licensing.max_cars_base = as_u32(key, value)?,
            "max_cars_train_length1" => {
                constants.licensing.max_cars_train_length1 = as_u32(key, value)?;
            }
            "max_cars_train_length2" => {
                constants.licensing.max_cars_train_length2 = as_u32(key, value)?;
            }
            _ => bail!(
                "unknown override key '{key}'. Valid keys: {}",
                VALID_KEYS.join(", ")
            ),
        }
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // JSON f64→f32 is intentional
fn as_f32(key: &str, value: &serde_json::Value) -> Result<f32> {
    value
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| anyhow::anyhow!("override '{key}': expected a number, got {value}"))
}

fn as_u32(key: &str, value: &serde_json::Value) -> Result<u32> {
    let val = value.as_u64().ok_or_else(|| {
        anyhow::anyhow!("override '{key}': expected a positive integer, got {value}")
    })?;
    u32::try_from(val)
        .map_err(|_| anyhow::anyhow!("override '{key}': value {val} exceeds u32 range"))
}

fn as_bool(key: &str, value: &serde_json::Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow::anyhow!("override '{key}': expected true or false, got {value}"))
}

fn as_track_selection(key: &str, value: &serde_json::Value) -> Result<TrackSelection> {
    serde_json::from_value(value.clone())
        .map_err(|_| anyhow::anyhow!("override '{key}': expected \"BestFit\" or \"Random\", got {value}"))
}
