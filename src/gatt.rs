//! GATT catalog — every characteristic the session talks to.
//!
//! ```text
//!  Irrigation service   12345678-1234-5678-1234-56789abcdef0
//!  ├── def1 valve control     raw      notify  essential
//!  ├── def2 flow              raw      notify
//!  ├── def3 system status     raw      notify
//!  ├── def4 channel config    raw      select+read, chunked write
//!  ├── def6 system config     raw      read, chunked write
//!  ├── defa alarm             raw      notify  essential
//!  ├── defc history           unified  paged
//!  ├── deff current task      raw      notify  essential
//!  └── de20 onboarding        raw      read (Phase 0)
//!
//!  Environmental service 12345678-1234-5678-9abc-def123456780 (optional)
//!  ├── 6781 environment       legacy 3-byte fragments
//!  ├── 6782 rain              raw
//!  ├── 6783 env history       unified  streamed
//!  └── 6784 compensation      raw
//! ```
//!
//! The endpoint a notification arrives on decides its framing, its layout
//! and the resource it updates.

use crate::framing::Framing;
use crate::layout::Layout;
use crate::link::Endpoint;
use crate::model;
use crate::state::{Capability, Resource};

pub const IRRIGATION_SERVICE: u128 = 0x12345678_1234_5678_1234_56789abcdef0;
pub const ENVIRONMENT_SERVICE: u128 = 0x12345678_1234_5678_9abc_def123456780;

const fn irrigation(short: u128) -> Endpoint {
    Endpoint::new(IRRIGATION_SERVICE, (IRRIGATION_SERVICE & !0xFFFF) | short)
}

const fn environmental(short: u128) -> Endpoint {
    Endpoint::new(ENVIRONMENT_SERVICE, (ENVIRONMENT_SERVICE & !0xFFFF) | short)
}

pub const VALVE_CONTROL: Endpoint = irrigation(0xdef1);
pub const FLOW: Endpoint = irrigation(0xdef2);
pub const SYSTEM_STATUS: Endpoint = irrigation(0xdef3);
pub const CHANNEL_CONFIG: Endpoint = irrigation(0xdef4);
pub const SYSTEM_CONFIG: Endpoint = irrigation(0xdef6);
pub const ALARM: Endpoint = irrigation(0xdefa);
pub const HISTORY: Endpoint = irrigation(0xdefc);
pub const CURRENT_TASK: Endpoint = irrigation(0xdeff);
pub const ONBOARDING: Endpoint = irrigation(0xde20);

pub const ENVIRONMENT: Endpoint = environmental(0x6781);
pub const RAIN: Endpoint = environmental(0x6782);
pub const ENV_HISTORY: Endpoint = environmental(0x6783);
pub const COMPENSATION: Endpoint = environmental(0x6784);

/// Static description of one characteristic.
#[derive(Debug)]
pub struct CharacteristicInfo {
    pub name: &'static str,
    pub endpoint: Endpoint,
    pub framing: Framing,
    /// Structure carried by reads and notifications, when fixed.
    pub layout: Option<&'static Layout>,
    /// State slot the decoded structure lands in.
    pub resource: Option<Resource>,
    /// Optional feature gating this endpoint.
    pub capability: Option<Capability>,
}

pub static CATALOG: &[CharacteristicInfo] = &[
    CharacteristicInfo {
        name: "valve_control",
        endpoint: VALVE_CONTROL,
        framing: Framing::Raw,
        layout: Some(&model::VALVE_STATUS),
        resource: Some(Resource::ValveStatus),
        capability: None,
    },
    CharacteristicInfo {
        name: "flow",
        endpoint: FLOW,
        framing: Framing::Raw,
        layout: Some(&model::FLOW),
        resource: Some(Resource::Flow),
        capability: None,
    },
    CharacteristicInfo {
        name: "system_status",
        endpoint: SYSTEM_STATUS,
        framing: Framing::Raw,
        layout: Some(&model::SYSTEM_STATUS),
        resource: Some(Resource::SystemStatus),
        capability: None,
    },
    CharacteristicInfo {
        name: "channel_config",
        endpoint: CHANNEL_CONFIG,
        framing: Framing::Raw,
        layout: Some(&model::CHANNEL_CONFIG),
        // Channel filled in from the decoded record.
        resource: Some(Resource::ChannelConfig(0)),
        capability: None,
    },
    CharacteristicInfo {
        name: "system_config",
        endpoint: SYSTEM_CONFIG,
        framing: Framing::Raw,
        layout: Some(&model::SYSTEM_CONFIG),
        resource: Some(Resource::SystemConfig),
        capability: None,
    },
    CharacteristicInfo {
        name: "alarm",
        endpoint: ALARM,
        framing: Framing::Raw,
        layout: Some(&model::ALARM),
        resource: Some(Resource::Alarm),
        capability: None,
    },
    CharacteristicInfo {
        name: "history",
        endpoint: HISTORY,
        framing: Framing::UnifiedPaged,
        layout: None,
        resource: None,
        capability: Some(Capability::History),
    },
    CharacteristicInfo {
        name: "current_task",
        endpoint: CURRENT_TASK,
        framing: Framing::Raw,
        layout: Some(&model::CURRENT_TASK),
        resource: Some(Resource::CurrentTask),
        capability: None,
    },
    CharacteristicInfo {
        name: "onboarding",
        endpoint: ONBOARDING,
        framing: Framing::Raw,
        layout: Some(&model::ONBOARDING),
        resource: Some(Resource::Onboarding),
        capability: None,
    },
    CharacteristicInfo {
        name: "environment",
        endpoint: ENVIRONMENT,
        framing: Framing::Legacy,
        layout: Some(&model::ENVIRONMENT),
        resource: Some(Resource::Environment),
        capability: Some(Capability::EnvironmentSensor),
    },
    CharacteristicInfo {
        name: "rain",
        endpoint: RAIN,
        framing: Framing::Raw,
        layout: Some(&model::RAIN),
        resource: Some(Resource::Rain),
        capability: Some(Capability::RainSensor),
    },
    CharacteristicInfo {
        name: "env_history",
        endpoint: ENV_HISTORY,
        framing: Framing::UnifiedStream,
        layout: None,
        resource: None,
        capability: Some(Capability::History),
    },
    CharacteristicInfo {
        name: "compensation",
        endpoint: COMPENSATION,
        framing: Framing::Raw,
        layout: Some(&model::COMPENSATION),
        resource: Some(Resource::Compensation),
        capability: Some(Capability::Compensation),
    },
];

pub fn lookup(endpoint: Endpoint) -> Option<&'static CharacteristicInfo> {
    CATALOG.iter().find(|c| c.endpoint == endpoint)
}

pub fn for_resource(resource: Resource) -> Option<&'static CharacteristicInfo> {
    let wanted = match resource {
        Resource::ChannelConfig(_) => Resource::ChannelConfig(0),
        other => other,
    };
    CATALOG.iter().find(|c| c.resource == Some(wanted))
}

/// Subscriptions restored after an exclusive window; the UI is blind
/// without them.
pub const ESSENTIAL_SUBSCRIPTIONS: &[Endpoint] = &[VALVE_CONTROL, CURRENT_TASK, ALARM];

/// Subscribed by the background sync once the UI is interactive.
pub const BACKGROUND_SUBSCRIPTIONS: &[Endpoint] = &[
    SYSTEM_STATUS,
    FLOW,
    CHANNEL_CONFIG,
    HISTORY,
    ENVIRONMENT,
    RAIN,
    ENV_HISTORY,
    COMPENSATION,
];

/// Phase 1 reads, in order.
pub const ESSENTIAL_READS: &[Resource] = &[
    Resource::Environment,
    Resource::Rain,
    Resource::CurrentTask,
    Resource::SystemConfig,
];

/// Phase 2 auxiliary reads after the channel configurations.
pub const AUXILIARY_READS: &[Resource] = &[
    Resource::SystemStatus,
    Resource::ValveStatus,
    Resource::Alarm,
    Resource::Compensation,
];
