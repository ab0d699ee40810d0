// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Guest CPU architectures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target architecture of the guest image set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Arm,
    Arm64,
    RiscV64,
    X86,
    X86_64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::RiscV64 => "riscv64",
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm" => Ok(Arch::Arm),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "riscv64" => Ok(Arch::RiscV64),
            "x86" => Ok(Arch::X86),
            "x86_64" => Ok(Arch::X86_64),
            other => Err(format!("unknown architecture: {other}")),
        }
    }
}
