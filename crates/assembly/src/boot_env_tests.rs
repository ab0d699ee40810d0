// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cvd_core::test_support;
use std::collections::BTreeMap;
use std::path::Path;
use yare::parameterized;

fn instance() -> InstanceConfig {
    test_support::instance_config(Path::new("/tmp"), 1)
}

#[test]
fn android_environment_layout() {
    let env = environment_text(&instance(), BootFlow::Android, "console=hvc0");
    let entries: Vec<&str> = env.split('\0').collect();
    assert_eq!(entries[0], "ethprime=eth1");
    assert_eq!(
        entries[1],
        "uenvcmd=setenv bootargs \"$cbootargs console=hvc0\" && run bootcmd_android"
    );
    // Android flow ends with an empty entry plus the final split remainder.
    assert_eq!(&entries[entries.len() - 2..], &["", ""]);
}

#[test]
fn empty_kernel_args_omit_the_space() {
    let env = environment_text(&instance(), BootFlow::Android, "");
    assert!(env.contains("uenvcmd=setenv bootargs \"$cbootargs\" && "));
}

#[test]
fn boot_slot_adds_suffix_entry() {
    let mut inst = instance();
    inst.boot_slot = Some("b".to_string());
    let env = environment_text(&inst, BootFlow::Android, "");
    assert!(env.contains("android_slot_suffix=_b\0"));
}

#[parameterized(
    android_efi = { BootFlow::AndroidEfiLoader, "setenv devplist 1;" },
    chrome_os = { BootFlow::ChromeOs, "setenv devplist 2;" },
    chrome_os_disk = { BootFlow::ChromeOsDisk, "setenv devplist c;" },
)]
fn efi_flows_pin_partition(flow: BootFlow, prefix: &str) {
    let env = environment_text(&instance(), flow, "");
    assert!(env.contains(prefix), "missing {prefix:?} in {env:?}");
    assert!(env.contains("efi/boot/bootaa64.efi"));
    assert!(env.contains("efi/boot/bootriscv64.efi"));
}

#[test]
fn linux_flow_has_no_partition_pin() {
    let env = environment_text(&instance(), BootFlow::Linux, "");
    assert!(!env.contains("setenv devplist"));
    assert!(env.contains("efi/boot/bootx64.efi"));
}

#[test]
fn paused_bootloader_wraps_entrypoint() {
    let mut inst = instance();
    inst.pause_in_bootloader = true;
    let env = environment_text(&inst, BootFlow::Android, "");
    assert!(env
        .contains("if test $paused -ne 1; then paused=1; else run bootcmd_android; fi"));
}

#[test]
fn bootconfig_args_fold_into_cmdline_when_unsupported() {
    let mut inst = instance();
    inst.bootconfig_supported = false;
    inst.kernel_cmdline = vec!["console=hvc0".to_string()];
    inst.bootconfig_args = BTreeMap::from([
        ("hardware".to_string(), "cutf_cvm".to_string()),
        ("kernel.vivid.n_devs".to_string(), "2".to_string()),
    ]);
    let args = kernel_args_for_env(&inst);
    assert!(args.contains("androidboot.hardware=cutf_cvm"));
    // kernel.-prefixed module parameters drop the prefix on the cmdline.
    assert!(args.contains(" vivid.n_devs=2"));
    assert!(!args.contains("kernel.vivid"));
}

#[test]
fn bootconfig_args_ignored_when_supported() {
    let mut inst = instance();
    inst.bootconfig_args = BTreeMap::from([("a".to_string(), "b".to_string())]);
    assert_eq!(kernel_args_for_env(&inst), "");
}

#[parameterized(
    exact = { 1 << 20, 1 << 20 },
    round_up = { (1 << 20) + 1, 2 << 20 },
    small = { 1, 1 << 20 },
)]
fn alignment(value: u64, expected: u64) {
    assert_eq!(align_to_power_of_2(value, 20), expected);
}

#[test]
fn env_partition_size_is_one_mib() {
    assert_eq!(
        align_to_power_of_2(MAX_AVB_METADATA_SIZE + 4096, PARTITION_SIZE_SHIFT),
        1 << 20
    );
}
