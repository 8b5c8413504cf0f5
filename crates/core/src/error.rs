use std::fmt;

use thiserror::Error;

/// Device operation exposed by the switch control interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    EstablishSession,
    PushConfig,
    Teardown,
    ReadTableEntries,
    WriteTableEntry,
    ReadRegister,
    WriteRegister,
    ClearCounter,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceOp::EstablishSession => "establish_session",
            DeviceOp::PushConfig => "push_config",
            DeviceOp::Teardown => "teardown",
            DeviceOp::ReadTableEntries => "read_table_entries",
            DeviceOp::WriteTableEntry => "write_table_entry",
            DeviceOp::ReadRegister => "read_register",
            DeviceOp::WriteRegister => "write_register",
            DeviceOp::ClearCounter => "clear_counter",
        };
        f.write_str(name)
    }
}

/// Failure of a single call through [`crate::SwitchControl`].
///
/// `target` names the table or register (plus key, where one applies) so an
/// operator can tell which device object the call was addressing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device read failed: {op} on {target}: {reason}")]
    Read {
        op: DeviceOp,
        target: String,
        reason: String,
    },

    #[error("device write failed: {op} on {target}: {reason}")]
    Write {
        op: DeviceOp,
        target: String,
        reason: String,
    },

    #[error("device session error during {op}: {reason}")]
    Session { op: DeviceOp, reason: String },
}

impl DeviceError {
    pub fn read(op: DeviceOp, target: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::Read {
            op,
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn write(op: DeviceOp, target: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::Write {
            op,
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn session(op: DeviceOp, reason: impl Into<String>) -> Self {
        DeviceError::Session {
            op,
            reason: reason.into(),
        }
    }

    /// The operation that failed.
    pub fn op(&self) -> DeviceOp {
        match self {
            DeviceError::Read { op, .. }
            | DeviceError::Write { op, .. }
            | DeviceError::Session { op, .. } => *op,
        }
    }
}

/// Startup configuration problems. Always fatal, raised before a device
/// session is opened.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("required input not found: {0}")]
    InputNotFound(String),
}
