//! Wire layouts of the structures the session itself synchronizes.
//!
//! All multi-byte fields are little-endian unless declared with
//! [`Field::be`].  Sizes are the packed firmware structure sizes; a
//! notification shorter than its layout is rejected, a longer one is
//! accepted and the tail ignored.

use crate::layout::{Field, FieldKind, Layout};

use FieldKind::{Bool, F32, I16, Text, U8, U16, U32};

// ── Main service ─────────────────────────────────────────────

/// Setup-completion flags. Read first on every connection (Phase 0).
pub static ONBOARDING: Layout = Layout {
    name: "onboarding",
    size: 6,
    fields: &[
        Field::le("completion_pct", 0, U8),
        Field::le("channels_configured", 1, U8),
        Field::le("system_configured", 2, Bool),
        Field::le("schedules_configured", 3, Bool),
        Field::le("setup_complete", 4, Bool),
        Field::le("wizard_step", 5, U8),
    ],
};

pub static VALVE_STATUS: Layout = Layout {
    name: "valve_status",
    size: 4,
    fields: &[
        Field::le("channel_id", 0, U8),
        Field::le("state", 1, U8),
        Field::le("duration_s", 2, U16),
    ],
};

pub static SYSTEM_STATUS: Layout = Layout {
    name: "system_status",
    size: 1,
    fields: &[Field::le("status", 0, U8)],
};

pub static FLOW: Layout = Layout {
    name: "flow",
    size: 4,
    fields: &[Field::le("pulses", 0, U32)],
};

pub static SYSTEM_CONFIG: Layout = Layout {
    name: "system_config",
    size: 16,
    fields: &[
        Field::le("version", 0, U8),
        Field::le("power_mode", 1, U8),
        Field::le("flow_calibration", 2, U32),
        Field::le("max_active_valves", 6, U8),
        Field::le("channel_count", 7, U8),
        Field::le("master_valve_enabled", 8, Bool),
        Field::le("master_pre_delay_s", 9, I16),
        Field::le("master_post_delay_s", 11, I16),
        Field::le("sensor_flags", 13, U8),
        Field::le("compensation_enabled", 14, Bool),
        Field::le("reserved", 15, U8),
    ],
};

/// Per-channel configuration. Selected by writing the channel id, then read.
pub static CHANNEL_CONFIG: Layout = Layout {
    name: "channel_config",
    size: 76,
    fields: &[
        Field::le("channel_id", 0, U8),
        Field::le("name_len", 1, U8),
        Field::le("name", 2, Text(64)),
        Field::le("auto_enabled", 66, Bool),
        Field::le("plant_type", 67, U8),
        Field::le("soil_type", 68, U8),
        Field::le("irrigation_method", 69, U8),
        Field::le("coverage_type", 70, U8),
        Field::le("coverage_value", 71, F32),
        Field::le("sun_pct", 75, U8),
    ],
};

pub static ALARM: Layout = Layout {
    name: "alarm",
    size: 7,
    fields: &[
        Field::le("code", 0, U8),
        Field::le("data", 1, U16),
        Field::le("timestamp", 3, U32),
    ],
};

pub static CURRENT_TASK: Layout = Layout {
    name: "current_task",
    size: 21,
    fields: &[
        Field::le("channel_id", 0, U8),
        Field::le("start_time", 1, U32),
        Field::le("target", 5, U32),
        Field::le("elapsed", 9, U32),
        Field::le("mode", 13, U8),
        Field::le("volume_ml", 14, U32),
        Field::le("status", 18, U8),
        Field::le("reserved", 19, U16),
    ],
};

// ── Environmental service ────────────────────────────────────

pub const ENVIRONMENT_SIZE: usize = 24;

/// BME280 snapshot, delivered through the legacy 3-byte fragment header.
pub static ENVIRONMENT: Layout = Layout {
    name: "environment",
    size: ENVIRONMENT_SIZE,
    fields: &[
        Field::le("temperature_c", 0, F32),
        Field::le("humidity_pct", 4, F32),
        Field::le("pressure_hpa", 8, F32),
        Field::le("timestamp", 12, U32),
        Field::le("sensor_status", 16, U8),
        Field::le("interval_s", 17, U16),
        Field::le("quality", 19, U8),
        Field::le("dew_point_c", 20, F32),
    ],
};

pub static RAIN: Layout = Layout {
    name: "rain",
    size: 15,
    fields: &[
        Field::le("hour_mm_x100", 0, U32),
        Field::le("today_mm_x100", 4, U32),
        Field::le("last_pulse", 8, U32),
        Field::le("status", 12, U8),
        Field::le("quality", 13, U8),
        Field::le("sensor_present", 14, Bool),
    ],
};

pub static COMPENSATION: Layout = Layout {
    name: "compensation",
    size: 8,
    fields: &[
        Field::le("channel_id", 0, U8),
        Field::le("active", 1, Bool),
        Field::le("reduction_pct", 2, U8),
        Field::le("skip", 3, Bool),
        Field::le("last_calc", 4, U32),
    ],
};

pub static ALL: &[&Layout] = &[
    &ONBOARDING,
    &VALVE_STATUS,
    &SYSTEM_STATUS,
    &FLOW,
    &SYSTEM_CONFIG,
    &CHANNEL_CONFIG,
    &ALARM,
    &CURRENT_TASK,
    &ENVIRONMENT,
    &RAIN,
    &COMPENSATION,
];
