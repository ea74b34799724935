//! Event output: JSON lines on stdout or structured log lines.

use serde::Serialize;

// ---

use regpoll_domain::{PollCounts, PollEvent, RegisterMetadata, SystemRegister};

// ---

use super::control::ControlStatus;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One output line in `--json` mode.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Record<'a> {
    // ---
    Value {
        node: u8,
        register: u16,
        value: u16,
    },

    System {
        node: u8,
        status: &'static str,
    },

    BatchComplete {
        cycle: u64,
    },

    Exception {
        reason: &'a str,
    },

    Identity {
        node: u8,
        text: &'a str,
        running: bool,
    },

    Metadata {
        node: u8,
        #[serde(flatten)]
        metadata: MetadataRecord<'a>,
    },

    Summary {
        success: u64,
        error: u64,
        cycles: u64,
    },
}

// ---

#[derive(Debug, Serialize)]
pub struct MetadataRecord<'a> {
    // ---
    pub register: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<(i32, i32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<i32>,
    pub encoding: String,
}

impl<'a> From<&'a RegisterMetadata> for MetadataRecord<'a> {
    fn from(md: &'a RegisterMetadata) -> Self {
        // ---
        Self {
            register: md.register,
            label: md.label.as_deref(),
            limits: md.limits,
            default: md.default,
            encoding: format!("{:?}", md.encoding).to_lowercase(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

pub struct Reporter {
    json: bool,
}

// ---

impl Reporter {
    // ---
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    // ---

    /// Record for `event`. `cycle` is the batch number a completion closes.
    pub fn record(event: &PollEvent, cycle: u64) -> Record<'_> {
        // ---
        match event {
            PollEvent::RegisterData {
                register,
                value,
                node,
            } => match event.as_system() {
                Some((status, node)) => Record::System {
                    node,
                    status: system_name(status),
                },
                None => Record::Value {
                    node: *node,
                    register: *register,
                    value: *value,
                },
            },
            PollEvent::PollingComplete => Record::BatchComplete { cycle },
            PollEvent::PollException { reason, .. } => Record::Exception { reason },
            PollEvent::DeviceIdentity(id) => Record::Identity {
                node: id.node,
                text: &id.text,
                running: id.running,
            },
        }
    }

    // ---

    pub fn event(&self, event: &PollEvent, cycle: u64) {
        // ---
        let record = Self::record(event, cycle);
        if self.json {
            self.emit(&record);
            return;
        }

        match record {
            Record::Value {
                node,
                register,
                value,
            } => tracing::info!(node, register, value, "value"),
            Record::System { node, status } => tracing::debug!(node, status, "system"),
            Record::BatchComplete { cycle } => tracing::info!(cycle, "batch complete"),
            Record::Exception { reason } => tracing::warn!("poll exception: {reason}"),
            Record::Identity {
                node,
                text,
                running,
            } => tracing::info!(node, text, running, "device identity"),
            Record::Metadata { .. } | Record::Summary { .. } => {}
        }
    }

    // ---

    pub fn metadata(&self, node: u8, md: &RegisterMetadata) {
        // ---
        if self.json {
            self.emit(&Record::Metadata {
                node,
                metadata: md.into(),
            });
        } else {
            tracing::info!(
                node,
                register = md.register,
                label = md.label.as_deref().unwrap_or(""),
                limits = ?md.limits,
                default = ?md.default,
                encoding = ?md.encoding,
                "metadata"
            );
        }
    }

    // ---

    pub fn summary(&self, counts: PollCounts, cycles: u64) {
        // ---
        if self.json {
            self.emit(&Record::Summary {
                success: counts.success,
                error: counts.error,
                cycles,
            });
        } else {
            tracing::info!(
                success = counts.success,
                error = counts.error,
                cycles,
                "session summary"
            );
        }
    }

    // ---

    fn emit(&self, record: &Record<'_>) {
        // ---
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("json encode failed: {e}"),
        }
    }
}

// ---

/// Periodic status line.
pub fn status_line(status: &ControlStatus) -> String {
    // ---
    if !status.connected {
        "Disconnected".to_string()
    } else if status.active {
        format!(
            "Polling ({} / {})",
            status.counts.success, status.counts.error
        )
    } else {
        "Idle".to_string()
    }
}

// ---

fn system_name(status: SystemRegister) -> &'static str {
    // ---
    match status {
        SystemRegister::DeviceIdPollComplete => "device_id_complete",
        SystemRegister::CustomPollComplete => "custom_complete",
        SystemRegister::MetadataStepComplete => "metadata_step_complete",
        SystemRegister::WriteComplete => "write_complete",
        SystemRegister::Connected => "connected",
        SystemRegister::Disconnected => "disconnected",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
