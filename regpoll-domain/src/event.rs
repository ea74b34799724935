use super::requester::RequesterHandle;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Register number of the system channel.
pub const SYSTEM_REGISTER: u16 = 0;

/// Node id reserved for connection-level system events.
pub const SENTINEL_NODE: u8 = 255;

// ---------------------------------------------------------------------------
// SystemRegister
// ---------------------------------------------------------------------------

/// Values carried on the system register (register 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SystemRegister {
    // ---
    DeviceIdPollComplete = 0,
    CustomPollComplete = 1,
    MetadataStepComplete = 2,
    WriteComplete = 3,
    Connected = 4,
    Disconnected = 5,
}

// ---

impl SystemRegister {
    // ---
    pub fn value(self) -> u16 {
        self as u16
    }

    pub fn from_value(value: u16) -> Option<Self> {
        // ---
        match value {
            0 => Some(Self::DeviceIdPollComplete),
            1 => Some(Self::CustomPollComplete),
            2 => Some(Self::MetadataStepComplete),
            3 => Some(Self::WriteComplete),
            4 => Some(Self::Connected),
            5 => Some(Self::Disconnected),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceIdentity
// ---------------------------------------------------------------------------

/// Result of a device identity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    // ---
    pub node: u8,

    /// Identification text reported by the device.
    pub text: String,

    /// RUN/STOP indicator (`true` = running).
    pub running: bool,
}

// ---

impl DeviceIdentity {
    // ---
    /// Parse identity bytes as returned by the transport (one byte per
    /// value). The last two bytes are the NUL terminator and the RUN/STOP
    /// indicator; everything before them is text.
    pub fn from_values(node: u8, values: &[u16]) -> Self {
        // ---
        let bytes: Vec<u8> = values.iter().map(|v| *v as u8).collect();
        let text_len = bytes.len().saturating_sub(2);
        let text = String::from_utf8_lossy(&bytes[..text_len])
            .trim_end_matches('\0')
            .to_string();
        let running = bytes.len() >= 2 && bytes[bytes.len() - 1] != 0;

        Self {
            node,
            text,
            running,
        }
    }
}

// ---------------------------------------------------------------------------
// PollEvent
// ---------------------------------------------------------------------------

/// Events broadcast by the scheduler to any number of listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    // ---
    /// New register data. `register == 0` is the system channel and `value`
    /// is a [`SystemRegister`].
    RegisterData { register: u16, value: u16, node: u8 },

    /// The read-demand queue drained (or was cleared).
    PollingComplete,

    /// A transaction failed. `requester` is the consumer it was attributed
    /// to, if that reference is still held.
    PollException {
        requester: Option<RequesterHandle>,
        reason: String,
    },

    /// A device identity probe completed.
    DeviceIdentity(DeviceIdentity),
}

// ---

impl PollEvent {
    // ---
    pub fn system(value: SystemRegister, node: u8) -> Self {
        Self::RegisterData {
            register: SYSTEM_REGISTER,
            value: value.value(),
            node,
        }
    }

    /// The system register value if this is a system channel event.
    pub fn as_system(&self) -> Option<(SystemRegister, u8)> {
        // ---
        match self {
            Self::RegisterData {
                register: SYSTEM_REGISTER,
                value,
                node,
            } => SystemRegister::from_value(*value).map(|s| (s, *node)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// PollCounts / Activity
// ---------------------------------------------------------------------------

/// Success and error totals since the connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollCounts {
    pub success: u64,
    pub error: u64,
}

/// Snapshot of the in-flight slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Activity {
    // ---
    /// A transaction is outstanding.
    pub active: bool,

    /// Consumer the outstanding transaction is attributed to.
    pub requester: Option<RequesterHandle>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
