// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot flows and hypervisor modes.
//!
//! The boot flow decides which partitions the composite disk carries and
//! which bootloader entrypoint the environment image programs.

use serde::{Deserialize, Serialize};

/// How the guest OS is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootFlow {
    Android,
    AndroidEfiLoader,
    ChromeOs,
    ChromeOsDisk,
    Linux,
    Fuchsia,
}

impl BootFlow {
    /// Partition number the EFI loader scan is pinned to, when any.
    pub fn efi_partition(self) -> Option<u16> {
        match self {
            BootFlow::AndroidEfiLoader => Some(1),
            BootFlow::ChromeOs => Some(2),
            BootFlow::ChromeOsDisk => Some(12),
            BootFlow::Android | BootFlow::Linux | BootFlow::Fuchsia => None,
        }
    }

    /// Whether this flow needs an EFI system partition on the OS disk.
    pub fn requires_esp(self) -> bool {
        matches!(
            self,
            BootFlow::AndroidEfiLoader | BootFlow::ChromeOs | BootFlow::Linux | BootFlow::Fuchsia
        )
    }
}

/// Boot flow of the access point companion VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApBootFlow {
    #[default]
    None,
    Grub,
    LegacyDirect,
}

/// The hypervisor that will consume the assembled disks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmmMode {
    Crosvm,
    Qemu,
    Gem5,
}

impl VmmMode {
    /// QEMU cannot boot the raw composite directly; it needs a qcow2 overlay.
    pub fn requires_overlay(self) -> bool {
        matches!(self, VmmMode::Qemu)
    }
}
