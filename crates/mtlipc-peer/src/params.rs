use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Payload sent with commands that take no parameters.
pub const NO_PARAMS: &str = "\"\"";

/// Parameters for commands addressed at a single player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerParams {
    pub player: i32,
}

/// Parameters for `IPC_LIST_PLAYERS`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListPlayersParams {
    pub include_enemy: bool,
}

/// Parameters for `IPC_GET_VARIABLES`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariablesParams {
    pub player: i32,
    #[serde(rename = "type")]
    pub scope: VariableScope,
}

/// Parameters for `IPC_CLEAR_BREAKPOINTS`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearBreakpointsParams {
    pub path: String,
}

/// Parameters for `IPC_SET_BREAKPOINT`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetBreakpointParams {
    pub path: String,
    pub line: u32,
    pub mode: BreakpointMode,
}

/// Which group of variables to fetch for a player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableScope {
    Global,
    Local,
    Auto,
    IndexedInt,
    IndexedFloat,
    IndexedSysint,
    IndexedSysfloat,
    All,
}

impl VariableScope {
    pub fn as_str(self) -> &'static str {
        match self {
            VariableScope::Global => "GLOBAL",
            VariableScope::Local => "LOCAL",
            VariableScope::Auto => "AUTO",
            VariableScope::IndexedInt => "INDEXED_INT",
            VariableScope::IndexedFloat => "INDEXED_FLOAT",
            VariableScope::IndexedSysint => "INDEXED_SYSINT",
            VariableScope::IndexedSysfloat => "INDEXED_SYSFLOAT",
            VariableScope::All => "ALL",
        }
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "GLOBAL" => Ok(VariableScope::Global),
            "LOCAL" => Ok(VariableScope::Local),
            "AUTO" => Ok(VariableScope::Auto),
            "INDEXED_INT" => Ok(VariableScope::IndexedInt),
            "INDEXED_FLOAT" => Ok(VariableScope::IndexedFloat),
            "INDEXED_SYSINT" => Ok(VariableScope::IndexedSysint),
            "INDEXED_SYSFLOAT" => Ok(VariableScope::IndexedSysfloat),
            "ALL" => Ok(VariableScope::All),
            other => Err(format!("unknown variable scope: {other}")),
        }
    }
}

/// Breakpoint flavour: `bp` stops execution, `pp` only reports the hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum BreakpointMode {
    #[default]
    #[serde(rename = "bp")]
    Break,
    #[serde(rename = "pp")]
    Pass,
}
