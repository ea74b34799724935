//! CLI configuration for `regpoll-agent`.
//!
//! Examples:
//!   regpoll-agent --host 192.168.1.20 --poll 40001:8@3 --poll 1:16@3
//!   regpoll-agent --simulate --poll 40001:4 --metadata --continuous --cycles 10
//!   regpoll-agent --host plc --write 40010=1,2,3@1 --device-id 1

use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use regpoll_domain::DEFAULT_TIMEOUT;

/// Registers read per poll when no count is given.
pub const DEFAULT_POLL_COUNT: u16 = 32;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "regpoll-agent", about = "Field-bus register polling agent")]
pub struct Config {
    // ---
    /// Modbus/TCP device or gateway host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Modbus/TCP port.
    #[arg(long, default_value_t = 502)]
    pub port: u16,

    /// Talk to an in-process simulated device instead of the network.
    #[arg(long)]
    pub simulate: bool,

    /// Per-transaction watchdog in milliseconds. Values below 1 use the
    /// default.
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: i64,

    /// Node addressed by `--poll` and `--write` targets without `@NODE`.
    #[arg(long, default_value_t = 0)]
    pub node: u8,

    /// Register block to poll: REG[:COUNT][@NODE]. Repeatable.
    #[arg(long = "poll", value_name = "REG[:COUNT][@NODE]")]
    pub polls: Vec<PollTarget>,

    /// Values to write: REG=V[,V...][@NODE]. Repeatable; contiguous
    /// values are merged into block writes.
    #[arg(long = "write", value_name = "REG=V[,V...][@NODE]")]
    pub writes: Vec<WriteSpec>,

    /// Fetch register metadata for every polled block.
    #[arg(long)]
    pub metadata: bool,

    /// Re-poll every block each time a batch completes.
    #[arg(long)]
    pub continuous: bool,

    /// Stop after this many completed batches (continuous mode).
    #[arg(long)]
    pub cycles: Option<u64>,

    /// Seconds between status lines. 0 disables them.
    #[arg(long, default_value_t = 5)]
    pub status_secs: u64,

    /// Probe device identity on these nodes after connecting. Repeatable.
    #[arg(long = "device-id", value_name = "NODE")]
    pub device_ids: Vec<u8>,

    /// Print events as JSON lines on stdout.
    #[arg(long)]
    pub json: bool,
}

// ---

impl Config {
    // ---
    pub fn timeout(&self) -> Duration {
        // ---
        if self.timeout_ms < 1 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_millis(self.timeout_ms as u64)
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// PollTarget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTarget {
    // ---
    pub register: u16,
    pub count: u16,

    /// `None` = use `--node`.
    pub node: Option<u8>,
}

// ---

impl FromStr for PollTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let (body, node) = split_node(s)?;
        let (register, count) = match body.split_once(':') {
            Some((reg, count)) => (reg, parse_num::<u16>(count, "count")?),
            None => (body, DEFAULT_POLL_COUNT),
        };
        if count == 0 {
            return Err("count must be at least 1".into());
        }
        Ok(Self {
            register: parse_num(register, "register")?,
            count,
            node,
        })
    }
}

// ---------------------------------------------------------------------------
// WriteSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSpec {
    // ---
    pub register: u16,
    pub values: Vec<u16>,
    pub node: Option<u8>,
}

// ---

impl FromStr for WriteSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let (body, node) = split_node(s)?;
        let (register, values) = body
            .split_once('=')
            .ok_or_else(|| format!("expected REG=V[,V...], got {s:?}"))?;
        let values = values
            .split(',')
            .map(|v| parse_num::<u16>(v, "value"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            register: parse_num(register, "register")?,
            values,
            node,
        })
    }
}

// ---

fn split_node(s: &str) -> Result<(&str, Option<u8>), String> {
    // ---
    match s.rsplit_once('@') {
        Some((body, node)) => Ok((body, Some(parse_num(node, "node")?))),
        None => Ok((s, None)),
    }
}

fn parse_num<T: FromStr>(s: &str, what: &str) -> Result<T, String> {
    s.trim().parse().map_err(|_| format!("invalid {what}: {s:?}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
